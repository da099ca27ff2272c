//! HTTP surface: health, room management, leaderboard and the WebSocket upgrade

pub mod routes;

pub use routes::{build_router, AppError};
