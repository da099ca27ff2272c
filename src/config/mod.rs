//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::vehicle::DriftFrictionScope;
use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::{DEFAULT_BROADCAST_INTERVAL_MS, DEFAULT_SIMULATION_HZ};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS ("*" allows any)
    pub client_origin: String,

    /// Simulation and broadcast tuning
    pub sim: SimulationConfig,

    /// Create a room on first connection instead of rejecting it
    pub auto_create_rooms: bool,
    /// Tear a room down once its last vehicle leaves
    pub auto_teardown_rooms: bool,
    /// Inbound WebSocket messages allowed per second per connection
    pub input_rate_limit: u32,
}

/// Cadence and threshold settings for the two periodic drivers
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Physics ticks per second
    pub tick_hz: u32,
    /// Milliseconds between state broadcasts
    pub broadcast_interval_ms: u64,
    /// Per-axis position change that triggers a broadcast
    pub position_epsilon: f32,
    /// Per-component quaternion change that triggers a broadcast
    pub rotation_epsilon: f32,
    /// Which wheels lose grip while drifting
    pub drift_scope: DriftFrictionScope,
    /// Empty rooms older than this are swept by the broadcast loop
    pub idle_room_grace_secs: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_SIMULATION_HZ,
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
            position_epsilon: 0.01,
            rotation_epsilon: 0.001,
            drift_scope: DriftFrictionScope::RearWheels,
            idle_room_grace_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup (env, tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let defaults = SimulationConfig::default();
        let sim = SimulationConfig {
            tick_hz: parse_or(&lookup, "SIM_TICK_HZ", defaults.tick_hz)?,
            broadcast_interval_ms: parse_or(
                &lookup,
                "BROADCAST_INTERVAL_MS",
                defaults.broadcast_interval_ms,
            )?,
            position_epsilon: parse_or(
                &lookup,
                "BROADCAST_POSITION_EPSILON",
                defaults.position_epsilon,
            )?,
            rotation_epsilon: parse_or(
                &lookup,
                "BROADCAST_ROTATION_EPSILON",
                defaults.rotation_epsilon,
            )?,
            drift_scope: parse_or(&lookup, "DRIFT_FRICTION_SCOPE", defaults.drift_scope)?,
            idle_room_grace_secs: parse_or(
                &lookup,
                "IDLE_ROOM_GRACE_SECS",
                defaults.idle_room_grace_secs,
            )?,
        };

        if sim.tick_hz == 0 {
            return Err(ConfigError::Invalid("SIM_TICK_HZ"));
        }
        if sim.broadcast_interval_ms == 0 {
            return Err(ConfigError::Invalid("BROADCAST_INTERVAL_MS"));
        }

        let input_rate_limit = parse_or(&lookup, "INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?;
        if input_rate_limit == 0 {
            return Err(ConfigError::Invalid("INPUT_RATE_LIMIT"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),

            sim,

            auto_create_rooms: parse_or(&lookup, "AUTO_CREATE_ROOMS", true)?,
            auto_teardown_rooms: parse_or(&lookup, "AUTO_TEARDOWN_ROOMS", true)?,
            input_rate_limit,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.sim.tick_hz, 60);
        assert_eq!(config.sim.broadcast_interval_ms, 100);
        assert_eq!(config.sim.drift_scope, DriftFrictionScope::RearWheels);
        assert!(config.auto_create_rooms);
        assert_eq!(config.input_rate_limit, 60);
        assert_eq!(config.sim.idle_room_grace_secs, 60);
    }

    #[test]
    fn port_overrides_server_addr() {
        let config =
            Config::from_lookup(lookup_from(&[("PORT", "9000"), ("SERVER_ADDR", "1.2.3.4:1")]))
                .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("SIM_TICK_HZ", "120"),
            ("BROADCAST_POSITION_EPSILON", "0.5"),
            ("DRIFT_FRICTION_SCOPE", "all"),
            ("AUTO_TEARDOWN_ROOMS", "false"),
            ("INPUT_RATE_LIMIT", "20"),
            ("IDLE_ROOM_GRACE_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.sim.tick_hz, 120);
        assert_eq!(config.sim.position_epsilon, 0.5);
        assert_eq!(config.sim.drift_scope, DriftFrictionScope::AllWheels);
        assert!(!config.auto_teardown_rooms);
        assert_eq!(config.input_rate_limit, 20);
        assert_eq!(config.sim.idle_room_grace_secs, 5);
    }

    #[test]
    fn garbage_values_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SIM_TICK_HZ", "fast")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SIM_TICK_HZ")));

        let err = Config::from_lookup(lookup_from(&[("SIM_TICK_HZ", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SIM_TICK_HZ")));

        let err = Config::from_lookup(lookup_from(&[("INPUT_RATE_LIMIT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("INPUT_RATE_LIMIT")));
    }
}
