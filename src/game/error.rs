//! Simulation core error taxonomy

use super::ids::{RoomId, UserId};

/// Errors raised by the room registry and vehicle model
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    /// No registered room with this id (surfaced to the caller)
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Create called for an id that already exists
    #[error("Room already exists: {0}")]
    DuplicateRoom(RoomId),

    /// Integrator produced an unusable transform; recovered by a spawn reset
    #[error("Invalid vehicle state for {user_id}: {reason}")]
    InvalidVehicleState { user_id: UserId, reason: String },

    /// Input for a user that has no vehicle in the room; dropped
    #[error("Stale input from {user_id} in room {room_id}")]
    StaleInput { room_id: RoomId, user_id: UserId },
}
