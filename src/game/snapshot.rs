//! Point-in-time vehicle state

use glam::{Quat, Vec3};

use super::vehicle::WHEEL_COUNT;

/// Per-wheel data carried in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelSummary {
    /// Steering angle (radians, + = left)
    pub steering: f32,
    /// Accumulated roll angle (radians)
    pub roll: f32,
    pub engine_force: f32,
    pub brake: f32,
    /// 0 = full grip, 1 = sliding at the friction limit
    pub slip: f32,
    pub suspension_length: f32,
}

/// Serializable capture of one vehicle's transform, velocities and wheels
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub wheels: [WheelSummary; WHEEL_COUNT],
    /// Milliseconds on the server's monotonic clock
    pub timestamp: u64,
}

impl Snapshot {
    /// Motionless state at a pose
    pub fn at_rest(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            wheels: [WheelSummary::default(); WHEEL_COUNT],
            timestamp: 0,
        }
    }

    /// Transform and velocities equal, ignoring wheels and timestamp
    pub fn same_motion(&self, other: &Snapshot) -> bool {
        self.position == other.position
            && self.orientation == other.orientation
            && self.linear_velocity == other.linear_velocity
            && self.angular_velocity == other.angular_velocity
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::at_rest(Vec3::ZERO, Quat::IDENTITY)
    }
}
