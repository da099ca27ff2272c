//! Time utilities for simulation and snapshots

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking and monotonic snapshot stamps
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Milliseconds since server start. Never goes backwards, unlike wall time.
pub fn monotonic_millis() -> u64 {
    SERVER_START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Default simulation rate
pub const DEFAULT_SIMULATION_HZ: u32 = 60;
/// Default interval between state broadcasts
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 100;

/// Fixed physics timestep for a given tick rate (in seconds)
pub fn tick_delta(tick_hz: u32) -> f32 {
    1.0 / tick_hz.max(1) as f32
}
