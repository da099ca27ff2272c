//! Racing Sync Server - authoritative multiplayer racing server
//!
//! Entry point. Runs:
//! - the fixed-rate simulation loop over every room
//! - the delta-threshold broadcast loop
//! - HTTP endpoints for rooms, leaderboards and the WebSocket upgrade

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use racing_sync_server::app::AppState;
use racing_sync_server::config::Config;
use racing_sync_server::game::{BroadcastLoop, SimulationLoop};
use racing_sync_server::http::build_router;
use racing_sync_server::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Racing Sync Server");
    info!("Server address: {}", config.server_addr);
    info!(
        tick_hz = config.sim.tick_hz,
        broadcast_interval_ms = config.sim.broadcast_interval_ms,
        drift_scope = %config.sim.drift_scope,
        "Simulation settings"
    );

    // Create application state
    let state = AppState::new(config.clone());

    // The two periodic drivers share nothing but the registry
    let simulation = SimulationLoop::new(state.registry.clone(), config.sim.tick_hz);
    let simulation_task = tokio::spawn(simulation.run());

    let broadcaster = BroadcastLoop::new(state.registry.clone(), &config.sim);
    let broadcast_task = tokio::spawn(broadcaster.run());

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws?room_id=..&user_id=..", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    simulation_task.abort();
    broadcast_task.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
