//! WebSocket upgrade handler

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{GameError, RoomId, RoomRegistry, UserId};
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Replies addressed to this connection only (pong, errors)
const DIRECT_CHANNEL_CAPACITY: usize = 16;

/// How long queued replies get to flush once the reader is done
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub room_id: String,
    /// Opaque, stable identity handed over by whatever authenticated the client
    pub user_id: String,
    /// Display name for the leaderboard
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    if query.room_id.is_empty() || query.user_id.is_empty() {
        return Err(AppError::BadRequest(
            "room_id and user_id are required".to_string(),
        ));
    }

    let room_id = RoomId::from(query.room_id);
    let user_id = UserId::from(query.user_id);

    if state.config.auto_create_rooms {
        state.registry.ensure_room(&room_id);
    } else if state.registry.get(&room_id).is_none() {
        warn!(room_id = %room_id, user_id = %user_id, "WebSocket upgrade for unknown room");
        return Err(GameError::RoomNotFound(room_id).into());
    }

    let display_name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| user_id.to_string());

    info!(room_id = %room_id, user_id = %user_id, "WebSocket upgrade");
    let connection = Connection {
        registry: state.registry.clone(),
        room_id,
        user_id,
        display_name,
        input_rate_limit: state.config.input_rate_limit,
    };
    Ok(ws.on_upgrade(move |socket| connection.handle_socket(socket)))
}

/// One client in one room
struct Connection {
    registry: Arc<RoomRegistry>,
    room_id: RoomId,
    user_id: UserId,
    display_name: String,
    input_rate_limit: u32,
}

impl Connection {
    /// Handle the upgraded WebSocket connection
    async fn handle_socket(self, socket: WebSocket) {
        let (mut ws_sink, ws_stream) = socket.split();

        // Subscribe before joining so the roster change reaches us too
        let room_rx = match self.registry.subscribe(&self.room_id) {
            Ok(rx) => rx,
            Err(e) => {
                self.reject(&mut ws_sink, e).await;
                return;
            }
        };

        let vehicle_id = match self
            .registry
            .join_room(&self.room_id, &self.user_id, &self.display_name)
        {
            Ok(id) => id,
            Err(e) => {
                self.reject(&mut ws_sink, e).await;
                return;
            }
        };

        info!(
            room_id = %self.room_id,
            user_id = %self.user_id,
            vehicle_id = %vehicle_id,
            "New WebSocket connection"
        );

        let welcome = ServerMsg::Welcome {
            user_id: self.user_id.clone(),
            room_id: self.room_id.clone(),
            server_time: unix_millis(),
        };

        if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
            error!(user_id = %self.user_id, error = %e, "Failed to send welcome");
        } else {
            self.run_session(ws_sink, ws_stream, room_rx).await;
        }

        // Cleanup on disconnect
        self.registry.leave_room(&self.room_id, &self.user_id);

        info!(room_id = %self.room_id, user_id = %self.user_id, "WebSocket connection closed");
    }

    async fn reject(&self, sink: &mut SplitSink<WebSocket, Message>, err: GameError) {
        warn!(room_id = %self.room_id, user_id = %self.user_id, error = %err, "Rejecting connection");
        let _ = send_msg(sink, &ServerMsg::error("room_not_found", err.to_string())).await;
        let _ = sink.close().await;
    }

    /// Run the WebSocket session with read/write split
    async fn run_session(
        &self,
        ws_sink: SplitSink<WebSocket, Message>,
        ws_stream: SplitStream<WebSocket>,
        room_rx: broadcast::Receiver<ServerMsg>,
    ) {
        let (direct_tx, direct_rx) = mpsc::channel(DIRECT_CHANNEL_CAPACITY);
        let mut writer = tokio::spawn(write_loop(self.user_id.clone(), ws_sink, room_rx, direct_rx));

        let writer_done = tokio::select! {
            _ = self.read_loop(ws_stream, direct_tx) => false,
            _ = &mut writer => {
                debug!(user_id = %self.user_id, "Writer finished before reader");
                true
            }
        };

        if !writer_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
    }

    /// Reader loop: WebSocket -> room input buffer
    async fn read_loop(&self, mut ws_stream: SplitStream<WebSocket>, direct_tx: mpsc::Sender<ServerMsg>) {
        let mut rate_limiter = ConnectionRateLimiter::new(self.input_rate_limit);
        let user_id = &self.user_id;

        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check_input() {
                        // First drop, then every hundredth
                        if rate_limiter.dropped() % 100 == 1 {
                            warn!(
                                user_id = %user_id,
                                dropped = rate_limiter.dropped(),
                                "Rate limited input message"
                            );
                        }
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(ClientMsg::Input { keys }) => {
                            match self.registry.submit_input(&self.room_id, user_id, &keys) {
                                Ok(()) => {}
                                Err(e @ GameError::StaleInput { .. }) => {
                                    debug!(error = %e, "Dropping stale input");
                                }
                                Err(e) => {
                                    warn!(user_id = %user_id, error = %e, "Room gone, closing session");
                                    let _ = direct_tx
                                        .send(ServerMsg::error("room_not_found", e.to_string()))
                                        .await;
                                    break;
                                }
                            }
                        }
                        Ok(ClientMsg::Ping { t }) => {
                            let _ = direct_tx.send(ServerMsg::Pong { t }).await;
                        }
                        Ok(ClientMsg::Leave) => {
                            info!(room_id = %self.room_id, user_id = %user_id, "Client left room");
                            break;
                        }
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(user_id = %user_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(user_id = %user_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }
}

/// Writer task: room broadcasts and direct replies -> WebSocket
async fn write_loop(
    user_id: UserId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut room_rx: broadcast::Receiver<ServerMsg>,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
) {
    loop {
        let msg = tokio::select! {
            biased;

            direct = direct_rx.recv() => match direct {
                Some(msg) => msg,
                // Reader finished and everything queued went out
                None => break,
            },
            room = room_rx.recv() => match room {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(user_id = %user_id, lagged_count = n, "Client lagged, skipping {} messages", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(user_id = %user_id, "Room channel closed");
                    break;
                }
            },
        };

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
            break;
        }
    }

    let _ = ws_sink.close().await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
