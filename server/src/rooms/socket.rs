//! Socket Session Loop
//!
//! One session per participant: authenticate the upgrade, admit into the
//! room, pump inbound frames through the router, tear down exactly once.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use super::events::ClientMessage;
use super::handlers::RoomDescriptor;
use super::participant::{OutboundFrame, PeerSender};
use super::router;
use crate::api::AppState;
use crate::auth::jwt;
use crate::db::keys;

/// Depth of the per-socket outbound queue. A participant this far behind is
/// treated as dead.
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Evict when no pong arrives within this window.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Socket upgrade query params.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer access token.
    pub token: String,
}

/// `GET /rooms/ws/{room_id}` upgrade handler.
///
/// The token is checked before anything else; a bad token completes the
/// upgrade only to close immediately with 1008, since a close code cannot be
/// delivered on an unaccepted socket.
pub async fn handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match jwt::verify_access_token(&query.token, &state.config) {
        Ok(claims) => ws.on_upgrade(move |socket| {
            run_session(socket, state, room_id, claims.sub, claims.username)
        }),
        Err(e) => {
            debug!(error = %e, "Socket rejected: invalid token");
            ws.on_upgrade(reject_invalid_token)
        }
    }
}

async fn reject_invalid_token(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "Invalid token".into(),
        })))
        .await;
}

async fn run_session(
    socket: WebSocket,
    state: AppState,
    room_id: String,
    user_id: String,
    username: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_DEPTH);

    // The writer task is the socket's only writer; everything outbound is an
    // enqueue onto its channel.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                OutboundFrame::Text(payload) => sink.send(Message::Text(payload.into())).await,
                OutboundFrame::Ping => sink.send(Message::Ping(axum::body::Bytes::new())).await,
                OutboundFrame::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    return;
                }
            };
            if result.is_err() {
                return;
            }
        }
        // Sender dropped without an explicit close frame.
        let _ = sink.send(Message::Close(None)).await;
    });

    let capacity = room_capacity(&state, &room_id).await;

    let admitted = state
        .registry
        .admit(&room_id, &user_id, &username, PeerSender::new(tx.clone()), capacity)
        .await;

    if !admitted {
        // The registry already enqueued the refusal close; let it flush.
        drop(tx);
        let _ = writer.await;
        return;
    }

    info!(user_id = %user_id, username = %username, room_id = %room_id, "Session established");

    let mut ping = interval(PING_INTERVAL);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &room_id, &user_id, text.as_str()).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    last_pong = Instant::now();
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(user_id = %user_id, "Socket closed by remote");
                    break;
                }
                // Binary frames are not part of the protocol; inbound pings
                // are answered by the library.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(user_id = %user_id, error = %e, "Socket read error");
                    break;
                }
            },
            _ = ping.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    info!(user_id = %user_id, room_id = %room_id, "Heartbeat timed out");
                    break;
                }
                if tx.try_send(OutboundFrame::Ping).is_err() {
                    break;
                }
            }
        }
    }

    // The single eviction point for this session, however the loop ended.
    state.registry.evict(&user_id).await;

    info!(user_id = %user_id, room_id = %room_id, "Session ended");
}

/// Parse and dispatch one inbound frame. Malformed or unknown frames are
/// logged and skipped; the session stays open.
async fn handle_frame(state: &AppState, room_id: &str, user_id: &str, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Unknown) => {
            warn!(
                user_id = %user_id,
                message_type = %unknown_type(text),
                "Unknown message type"
            );
        }
        Ok(message) => router::dispatch(state, room_id, user_id, message).await,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Malformed frame, skipping");
        }
    }
}

fn unknown_type(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("type").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| "<missing>".into())
}

/// Room capacity from the persisted descriptor, when one exists.
async fn room_capacity(state: &AppState, room_id: &str) -> Option<usize> {
    match state.kv.get(&keys::room(room_id)).await {
        Ok(Some(json)) => match serde_json::from_str::<RoomDescriptor>(&json) {
            Ok(descriptor) => Some(descriptor.max_participants),
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Malformed room descriptor");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            debug!(room_id = %room_id, error = %e, "Room descriptor unavailable");
            None
        }
    }
}
