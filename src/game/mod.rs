//! Authoritative simulation: rooms, vehicles, physics and the two periodic loops

pub mod broadcast;
pub mod circuit;
pub mod error;
pub mod ids;
pub mod input;
pub mod leaderboard;
pub mod physics;
pub mod registry;
pub mod room;
pub mod simulation;
pub mod snapshot;
pub mod vehicle;

pub use broadcast::{BroadcastLoop, BroadcastPolicy};
pub use error::GameError;
pub use ids::{RoomId, UserId, VehicleId};
pub use registry::{RoomHandle, RoomRegistry};
pub use simulation::SimulationLoop;
pub use snapshot::Snapshot;
pub use vehicle::{Vehicle, VehicleTuning};
