//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::leaderboard::CheckpointEntry;
use crate::game::{GameError, RoomId};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Upper bound for plain HTTP handlers; a WebSocket upgrade answers immediately
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/rooms", get(list_rooms_handler).post(create_room_handler))
        .route("/rooms/:room_id", delete(delete_room_handler))
        .route("/rooms/:room_id/leaderboard", get(leaderboard_handler))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origin))
        .with_state(state)
}

/// CORS from a comma-separated origin list; "*" allows any origin
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed_origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub active_rooms: usize,
    pub active_vehicles: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.registry.stats();

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: uptime_secs(),
        active_rooms: stats.rooms,
        active_vehicles: stats.vehicles,
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomId>,
}

async fn list_rooms_handler(State(state): State<AppState>) -> Json<RoomListResponse> {
    Json(RoomListResponse {
        rooms: state.registry.room_ids(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    /// Generated when absent
    pub room_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room_id: RoomId,
    pub ws_path: String,
}

async fn create_room_handler(
    State(state): State<AppState>,
    body: Option<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), AppError> {
    let Json(req) = body.unwrap_or_default();
    let room_id = match req.room_id {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::BadRequest("room_id must not be empty".to_string()))
        }
        Some(id) => RoomId::from(id),
        None => RoomId::from(Uuid::new_v4().to_string()),
    };

    state.registry.create_room(room_id.clone())?;
    info!(room_id = %room_id, "Room created over HTTP");

    let ws_path = format!("/ws?room_id={room_id}");
    Ok((StatusCode::CREATED, Json(CreateRoomResponse { room_id, ws_path })))
}

async fn delete_room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let room_id = RoomId::from(room_id);
    state.registry.destroy_room(&room_id)?;
    info!(room_id = %room_id, "Room destroyed over HTTP");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub room_id: RoomId,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<CheckpointEntry>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let room_id = RoomId::from(room_id);
    let entries = state.registry.leaderboard(&room_id)?;

    Ok(Json(LeaderboardResponse {
        room_id,
        generated_at: Utc::now(),
        entries,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GameError> for AppError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::RoomNotFound(_) => AppError::NotFound(err.to_string()),
            GameError::DuplicateRoom(_) => AppError::Conflict(err.to_string()),
            GameError::StaleInput { .. } => AppError::BadRequest(err.to_string()),
            GameError::InvalidVehicleState { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
