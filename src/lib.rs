//! Racing sync server
//!
//! Authoritative per-room vehicle physics, delta-threshold state broadcast and
//! the client-side prediction model that consumes it.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod prediction;
pub mod util;
pub mod ws;
