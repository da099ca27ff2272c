//! Fixed-cadence authoritative simulation

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::registry::RoomRegistry;
use crate::util::time::tick_delta;

/// Steps every live room at a fixed rate
pub struct SimulationLoop {
    registry: Arc<RoomRegistry>,
    tick_hz: u32,
}

impl SimulationLoop {
    pub fn new(registry: Arc<RoomRegistry>, tick_hz: u32) -> Self {
        Self {
            registry,
            tick_hz: tick_hz.max(1),
        }
    }

    /// Fixed step length in seconds
    pub fn dt(&self) -> f32 {
        tick_delta(self.tick_hz)
    }

    /// Advance every room by one step. Each room is locked only for its own step.
    pub fn step_all(&self) -> usize {
        let dt = self.dt();
        let handles = self.registry.handles();
        for handle in &handles {
            handle.room.lock().simulate(dt);
        }
        handles.len()
    }

    /// Run the authoritative tick loop
    pub async fn run(self) {
        info!(tick_hz = self.tick_hz, "Simulation loop started");

        let tick_duration = Duration::from_micros(1_000_000 / self.tick_hz as u64);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;
            self.step_all();
        }
    }
}
