//! Correcting the locally predicted vehicle against server snapshots

use tracing::debug;

use crate::game::snapshot::Snapshot;
use crate::game::vehicle::Vehicle;
use crate::util::delta::{rotation_angle, ChangeThreshold};

/// Thresholds for the owned-vehicle correction policy
#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// Per-axis position error at or below which the server is ignored
    pub negligible_position: f32,
    /// Per-component quaternion error at or below which the server is ignored
    pub negligible_rotation: f32,
    /// Per-axis position error above which prediction is thrown away
    pub hard_snap_position: f32,
    /// Per-component quaternion error above which prediction is thrown away
    pub hard_snap_rotation: f32,
    /// Fraction of the error removed per received snapshot
    pub blend: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            negligible_position: 0.1,
            negligible_rotation: 0.01,
            hard_snap_position: 5.0,
            hard_snap_rotation: 0.25,
            blend: 0.05,
        }
    }
}

/// What a snapshot did to the predicted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Error was noise
    Ignored,
    /// Nudged toward the server by the blend fraction
    Blended,
    /// Prediction diverged; overwritten with the server state
    HardSnap,
}

/// Applies [`ReconcileConfig`] to an owned, physics-backed vehicle
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnedReconciler {
    config: ReconcileConfig,
}

impl OwnedReconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    /// Decide how to treat the gap between prediction and server
    pub fn classify(&self, predicted: &Snapshot, server: &Snapshot) -> Correction {
        let c = &self.config;

        if server.position.exceeds(&predicted.position, c.hard_snap_position)
            || server.orientation.exceeds(&predicted.orientation, c.hard_snap_rotation)
        {
            return Correction::HardSnap;
        }

        if server.position.exceeds(&predicted.position, c.negligible_position)
            || server.orientation.exceeds(&predicted.orientation, c.negligible_rotation)
        {
            Correction::Blended
        } else {
            Correction::Ignored
        }
    }

    /// Correct `vehicle` in place and report what happened
    pub fn reconcile(&self, vehicle: &mut Vehicle, server: &Snapshot) -> Correction {
        let predicted = vehicle.state();
        let correction = self.classify(&predicted, server);

        match correction {
            Correction::Ignored => {}
            Correction::Blended => {
                vehicle.sync_from_snapshot(&self.blended(&predicted, server));
            }
            Correction::HardSnap => {
                debug!(
                    user_id = %vehicle.user_id(),
                    error = predicted.position.distance(server.position),
                    angle = rotation_angle(predicted.orientation, server.orientation),
                    "Prediction diverged, snapping to server state"
                );
                vehicle.sync_from_snapshot(server);
            }
        }

        correction
    }

    /// Predicted state moved `blend` of the way toward the server
    pub fn blended(&self, predicted: &Snapshot, server: &Snapshot) -> Snapshot {
        let t = self.config.blend.clamp(0.0, 1.0);
        Snapshot {
            position: predicted.position.lerp(server.position, t),
            orientation: predicted.orientation.slerp(server.orientation, t).normalize(),
            linear_velocity: predicted.linear_velocity.lerp(server.linear_velocity, t),
            angular_velocity: predicted.angular_velocity.lerp(server.angular_velocity, t),
            wheels: predicted.wheels,
            timestamp: server.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::circuit::SpawnPose;
    use crate::game::ids::{RoomId, UserId};
    use crate::game::vehicle::VehicleTuning;
    use glam::{Quat, Vec3};

    fn vehicle_at(position: Vec3) -> Vehicle {
        let mut vehicle = Vehicle::simulated(
            RoomId::from("R1"),
            UserId::from("U1"),
            SpawnPose::default(),
            VehicleTuning::default(),
        );
        vehicle.sync_from_snapshot(&Snapshot::at_rest(position, Quat::IDENTITY));
        vehicle
    }

    fn server_at(position: Vec3) -> Snapshot {
        Snapshot::at_rest(position, Quat::IDENTITY)
    }

    #[test]
    fn negligible_error_is_ignored() {
        let reconciler = OwnedReconciler::default();
        let mut vehicle = vehicle_at(Vec3::new(10.0, 0.0, 0.0));

        let outcome = reconciler.reconcile(&mut vehicle, &server_at(Vec3::new(10.05, 0.0, 0.0)));
        assert_eq!(outcome, Correction::Ignored);
        assert_eq!(vehicle.position(), Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn large_error_snaps_exactly() {
        let reconciler = OwnedReconciler::default();
        let mut vehicle = vehicle_at(Vec3::new(10.0, 0.0, 0.0));

        let mut server = server_at(Vec3::new(50.0, 0.0, 0.0));
        server.linear_velocity = Vec3::new(3.0, 0.0, 0.0);
        server.orientation = Quat::from_rotation_y(1.0);

        let outcome = reconciler.reconcile(&mut vehicle, &server);
        assert_eq!(outcome, Correction::HardSnap);
        assert_eq!(vehicle.position(), Vec3::new(50.0, 0.0, 0.0));
        assert_eq!(vehicle.linear_velocity(), Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(vehicle.orientation(), Quat::from_rotation_y(1.0));
    }

    #[test]
    fn moderate_error_blends_a_fixed_fraction() {
        let reconciler = OwnedReconciler::default();
        let mut vehicle = vehicle_at(Vec3::new(10.0, 0.0, 0.0));

        let outcome = reconciler.reconcile(&mut vehicle, &server_at(Vec3::new(12.0, 0.0, 0.0)));
        assert_eq!(outcome, Correction::Blended);
        assert!((vehicle.position().x - 10.1).abs() < 1e-4);
    }

    #[test]
    fn repeated_blends_converge() {
        let reconciler = OwnedReconciler::default();
        let mut vehicle = vehicle_at(Vec3::new(10.0, 0.0, 0.0));
        let server = server_at(Vec3::new(12.0, 0.0, 0.0));

        let mut last = Correction::Blended;
        for _ in 0..200 {
            last = reconciler.reconcile(&mut vehicle, &server);
            if last == Correction::Ignored {
                break;
            }
        }
        assert_eq!(last, Correction::Ignored);
        assert!((vehicle.position().x - 12.0).abs() <= 0.1);
    }

    #[test]
    fn rotation_alone_can_trigger_a_blend() {
        let reconciler = OwnedReconciler::default();
        let predicted = server_at(Vec3::ZERO);
        let mut server = predicted.clone();
        server.orientation = Quat::from_rotation_y(0.1);
        assert_eq!(reconciler.classify(&predicted, &server), Correction::Blended);

        let blended = reconciler.blended(&predicted, &server);
        let angle = rotation_angle(predicted.orientation, blended.orientation);
        assert!((angle - 0.005).abs() < 2e-3);
    }
}
