//! Shared helpers

pub mod delta;
pub mod rate_limit;
pub mod time;
