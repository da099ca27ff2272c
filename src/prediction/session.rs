//! Client-side view of one room: owned prediction plus remote tracking

use std::collections::HashMap;

use tracing::{debug, warn};

use super::interpolation::{RemoteSmoothing, RemoteTracker, VisualTransform};
use super::reconciliation::{Correction, OwnedReconciler, ReconcileConfig};
use crate::game::circuit::Circuit;
use crate::game::ids::{RoomId, UserId};
use crate::game::input::InputState;
use crate::game::leaderboard::CheckpointEntry;
use crate::game::physics::PhysicsWorld;
use crate::game::snapshot::Snapshot;
use crate::game::vehicle::{Vehicle, VehicleTuning};
use crate::ws::protocol::ServerMsg;

/// A car this client only observes
#[derive(Debug, Clone)]
pub struct RemotePeer {
    /// Snapshot-backed vehicle holding the last authoritative state
    pub vehicle: Vehicle,
    pub tracker: RemoteTracker,
}

/// Correction counters for diagnostics overlays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionStats {
    pub ignored: u64,
    pub blended: u64,
    pub hard_snaps: u64,
}

impl CorrectionStats {
    fn record(&mut self, correction: Correction) {
        match correction {
            Correction::Ignored => self.ignored += 1,
            Correction::Blended => self.blended += 1,
            Correction::HardSnap => self.hard_snaps += 1,
        }
    }
}

/// Everything a client keeps about the room it is connected to
pub struct ClientSession {
    user_id: UserId,
    room_id: RoomId,
    world: PhysicsWorld,
    circuit: Circuit,
    tuning: VehicleTuning,
    own: Option<Vehicle>,
    reconciler: OwnedReconciler,
    smoothing: RemoteSmoothing,
    remotes: HashMap<UserId, RemotePeer>,
    leaderboard: Vec<CheckpointEntry>,
    stats: CorrectionStats,
    last_rtt_ms: Option<u64>,
    last_error: Option<String>,
}

impl ClientSession {
    pub fn new(user_id: UserId, room_id: RoomId, circuit: Circuit, tuning: VehicleTuning) -> Self {
        Self::with_policies(
            user_id,
            room_id,
            circuit,
            tuning,
            ReconcileConfig::default(),
            RemoteSmoothing::default(),
        )
    }

    pub fn with_policies(
        user_id: UserId,
        room_id: RoomId,
        circuit: Circuit,
        tuning: VehicleTuning,
        reconcile: ReconcileConfig,
        smoothing: RemoteSmoothing,
    ) -> Self {
        Self {
            user_id,
            room_id,
            world: PhysicsWorld::new(circuit.colliders.clone()),
            circuit,
            tuning,
            own: None,
            reconciler: OwnedReconciler::new(reconcile),
            smoothing,
            remotes: HashMap::new(),
            leaderboard: Vec::new(),
            stats: CorrectionStats::default(),
            last_rtt_ms: None,
            last_error: None,
        }
    }

    pub fn own_vehicle(&self) -> Option<&Vehicle> {
        self.own.as_ref()
    }

    pub fn remote(&self, user_id: &UserId) -> Option<&RemotePeer> {
        self.remotes.get(user_id)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn leaderboard(&self) -> &[CheckpointEntry] {
        &self.leaderboard
    }

    pub fn stats(&self) -> CorrectionStats {
        self.stats
    }

    pub fn last_rtt_ms(&self) -> Option<u64> {
        self.last_rtt_ms
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Parse and apply one server frame; `now` is the client clock in ms
    pub fn handle_text(&mut self, text: &str, now: u64) -> Result<(), serde_json::Error> {
        let msg: ServerMsg = serde_json::from_str(text)?;
        self.handle_message(msg, now);
        Ok(())
    }

    pub fn handle_message(&mut self, msg: ServerMsg, now: u64) {
        match msg {
            ServerMsg::Welcome {
                user_id, room_id, ..
            } => {
                if user_id != self.user_id || room_id != self.room_id {
                    warn!(user_id = %user_id, room_id = %room_id, "Welcome for a different session");
                }
            }
            ServerMsg::State {
                timestamp,
                vehicles,
            } => {
                for (user_id, state) in vehicles {
                    self.apply_state(UserId::from(user_id), state.into_snapshot(timestamp), now);
                }
            }
            ServerMsg::Roster { users } => self.apply_roster(&users),
            ServerMsg::Leaderboard { entries } => self.leaderboard = entries,
            ServerMsg::Error { code, message } => {
                warn!(code = %code, message = %message, "Server reported an error");
                self.last_error = Some(message);
            }
            ServerMsg::Pong { t } => {
                self.last_rtt_ms = Some(now.saturating_sub(t));
            }
        }
    }

    fn apply_state(&mut self, user_id: UserId, snapshot: Snapshot, now: u64) {
        if user_id == self.user_id {
            self.reconcile_own(&snapshot);
            return;
        }

        match self.remotes.get_mut(&user_id) {
            Some(peer) => {
                peer.vehicle.sync_from_snapshot(&snapshot);
                peer.tracker.push(snapshot, now);
            }
            None => {
                debug!(user_id = %user_id, "Tracking new remote vehicle");
                let vehicle = Vehicle::remote(self.room_id.clone(), user_id.clone(), snapshot.clone());
                let mut tracker = RemoteTracker::new(self.smoothing);
                tracker.push(snapshot, now);
                self.remotes.insert(user_id, RemotePeer { vehicle, tracker });
            }
        }
    }

    fn reconcile_own(&mut self, snapshot: &Snapshot) {
        match &mut self.own {
            Some(vehicle) => {
                let correction = self.reconciler.reconcile(vehicle, snapshot);
                self.stats.record(correction);
            }
            None => {
                // First authoritative state: start predicting from it
                let mut vehicle = Vehicle::simulated(
                    self.room_id.clone(),
                    self.user_id.clone(),
                    self.circuit.spawn,
                    self.tuning.clone(),
                );
                vehicle.sync_from_snapshot(snapshot);
                self.own = Some(vehicle);
            }
        }
    }

    /// Drop trackers for users that are gone
    fn apply_roster(&mut self, users: &[UserId]) {
        self.remotes.retain(|user_id, _| {
            let keep = users.contains(user_id);
            if !keep {
                debug!(user_id = %user_id, "Remote vehicle left");
            }
            keep
        });
        if !users.contains(&self.user_id) {
            self.own = None;
        }
    }

    /// Run local physics for the owned car with the keys currently held
    pub fn predict(&mut self, input: &InputState, dt: f32) {
        let Some(vehicle) = self.own.as_mut() else {
            return;
        };
        vehicle.apply_input(input, dt);
        vehicle.step(&self.world, dt);
        self.world.step(vehicle.body_mut(), dt);
        vehicle.after_step();
    }

    /// Smoothed transforms for every remote car at `now`
    pub fn remote_transforms(&mut self, now: u64) -> Vec<(UserId, VisualTransform)> {
        let mut out: Vec<(UserId, VisualTransform)> = self
            .remotes
            .iter_mut()
            .filter_map(|(user_id, peer)| peer.tracker.update(now).map(|t| (user_id.clone(), t)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::circuit::{CircuitSource, FlatCircuit};
    use glam::{Quat, Vec3};

    fn session() -> ClientSession {
        let room = RoomId::from("R1");
        let circuit = FlatCircuit.generate(&room);
        ClientSession::new(UserId::from("me"), room, circuit, VehicleTuning::default())
    }

    fn state_msg(timestamp: u64, entries: &[(&str, Vec3)]) -> ServerMsg {
        let snapshots: Vec<(UserId, Snapshot)> = entries
            .iter()
            .map(|(u, p)| (UserId::from(*u), Snapshot::at_rest(*p, Quat::IDENTITY)))
            .collect();
        ServerMsg::state(timestamp, snapshots.iter().map(|(u, s)| (u, s)))
    }

    #[test]
    fn state_routes_to_own_and_remote() {
        let mut session = session();
        session.handle_message(
            state_msg(1, &[("me", Vec3::new(0.0, 0.9, 0.0)), ("other", Vec3::new(5.0, 0.9, 0.0))]),
            1000,
        );

        let own = session.own_vehicle().unwrap();
        assert!(own.is_simulated());
        assert_eq!(own.position(), Vec3::new(0.0, 0.9, 0.0));

        let peer = session.remote(&UserId::from("other")).unwrap();
        assert!(!peer.vehicle.is_simulated());
        assert!(peer.tracker.is_tracking());
        assert_eq!(session.remote_count(), 1);
    }

    #[test]
    fn later_states_are_reconciled() {
        let mut session = session();
        session.handle_message(state_msg(1, &[("me", Vec3::new(10.0, 0.9, 0.0))]), 0);
        session.handle_message(state_msg(2, &[("me", Vec3::new(10.05, 0.9, 0.0))]), 100);
        session.handle_message(state_msg(3, &[("me", Vec3::new(50.0, 0.9, 0.0))]), 200);

        assert_eq!(
            session.stats(),
            CorrectionStats {
                ignored: 1,
                blended: 0,
                hard_snaps: 1,
            }
        );
        assert_eq!(session.own_vehicle().unwrap().position(), Vec3::new(50.0, 0.9, 0.0));
    }

    #[test]
    fn roster_removal_drops_tracker() {
        let mut session = session();
        session.handle_message(
            state_msg(1, &[("a", Vec3::ZERO), ("b", Vec3::X)]),
            0,
        );
        assert_eq!(session.remote_count(), 2);

        session.handle_message(
            ServerMsg::Roster {
                users: vec![UserId::from("a"), UserId::from("me")],
            },
            50,
        );
        assert!(session.remote(&UserId::from("a")).is_some());
        assert!(session.remote(&UserId::from("b")).is_none());

        let transforms = session.remote_transforms(60);
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].0, UserId::from("a"));
    }

    #[test]
    fn prediction_moves_own_car_forward() {
        let mut session = session();
        let spawn_height = VehicleTuning::default().ride_height();
        session.handle_message(state_msg(1, &[("me", Vec3::new(0.0, spawn_height, 0.0))]), 0);

        let throttle = InputState {
            forward: true,
            ..Default::default()
        };
        for _ in 0..30 {
            session.predict(&throttle, 1.0 / 60.0);
        }
        assert!(session.own_vehicle().unwrap().forward_speed() > 1.0);
    }

    #[test]
    fn pong_measures_round_trip() {
        let mut session = session();
        session.handle_text(r#"{"type":"pong","t":1000}"#, 1042).unwrap();
        assert_eq!(session.last_rtt_ms(), Some(42));
        assert!(session.handle_text("{", 0).is_err());
    }
}
