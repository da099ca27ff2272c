//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::vehicle::VehicleTuning;
use crate::game::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let tuning = VehicleTuning {
            drift_scope: config.sim.drift_scope,
            ..VehicleTuning::default()
        };

        let registry = RoomRegistry::new(tuning);
        let registry = if config.auto_teardown_rooms {
            registry
        } else {
            registry.keep_empty_rooms()
        };

        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
        }
    }

    /// State around an existing registry; used by tests with custom circuits
    pub fn with_registry(config: Config, registry: RoomRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
        }
    }
}
