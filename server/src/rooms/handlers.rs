//! Room HTTP Handlers
//!
//! Descriptor CRUD, history queries, ICE configuration, and file uploads.

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{RoomError, RoomResult};
use super::events::ServerEvent;
use super::participant::ParticipantSnapshot;
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::config::Config;
use crate::db::keys;

/// Persisted room descriptor. Outlives the runtime room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDescriptor {
    /// Server-minted room ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Creator's user ID.
    pub created_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Room capacity.
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
    /// Whether the room is publicly listed.
    #[serde(default = "default_is_public")]
    pub is_public: bool,
    /// Optional join password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

const fn default_max_participants() -> usize {
    10
}

const fn default_is_public() -> bool {
    true
}

/// Room creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    /// Display name.
    pub name: String,
    /// Room capacity (default 10).
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
    /// Optional join password.
    #[serde(default)]
    pub password: Option<String>,
    /// Whether the room is publicly listed (default true).
    #[serde(default = "default_is_public")]
    pub is_public: bool,
}

/// `POST /rooms/`
pub async fn create_room(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateRoomRequest>,
) -> Json<RoomDescriptor> {
    let descriptor = RoomDescriptor {
        id: Uuid::new_v4().to_string(),
        name: request.name,
        created_by: auth_user.user_id,
        created_at: Utc::now(),
        max_participants: request.max_participants,
        is_public: request.is_public,
        password: request.password,
    };

    match serde_json::to_string(&descriptor) {
        Ok(json) => {
            if let Err(e) = state.kv.put(&keys::room(&descriptor.id), &json).await {
                warn!(room_id = %descriptor.id, error = %e, "Failed to persist room descriptor");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize room descriptor"),
    }

    info!(room_id = %descriptor.id, name = %descriptor.name, "Room created");

    Json(descriptor)
}

/// Descriptor enriched with live membership.
#[derive(Debug, Serialize)]
pub struct RoomDetails {
    #[serde(flatten)]
    descriptor: RoomDescriptor,
    current_participants: Vec<ParticipantSnapshot>,
    participant_count: usize,
}

/// `GET /rooms/{room_id}`
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> RoomResult<Json<RoomDetails>> {
    let json = match state.kv.get(&keys::room(&room_id)).await {
        Ok(Some(json)) => json,
        Ok(None) => return Err(RoomError::RoomNotFound(room_id)),
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "Room descriptor lookup failed");
            return Err(RoomError::RoomNotFound(room_id));
        }
    };

    let descriptor: RoomDescriptor = serde_json::from_str(&json)
        .map_err(|e| RoomError::Internal(format!("Malformed room descriptor: {e}")))?;

    let current_participants = state.registry.snapshot(&room_id).await;
    let participant_count = current_participants.len();

    Ok(Json(RoomDetails {
        descriptor,
        current_participants,
        participant_count,
    }))
}

/// ICE configuration handed to clients.
#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    #[serde(rename = "iceServers")]
    ice_servers: Vec<Value>,
}

/// `GET /rooms/{room_id}/ice-servers`
pub async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    Json(build_ice_servers(&state.config))
}

fn build_ice_servers(config: &Config) -> IceServersResponse {
    let mut ice_servers = Vec::new();

    if !config.stun_servers.is_empty() {
        ice_servers.push(json!({ "urls": config.stun_servers }));
    }

    for turn in &config.turn_servers {
        ice_servers.push(json!({
            "urls": turn.urls,
            "username": turn.username,
            "credential": turn.credential,
        }));
    }

    IceServersResponse { ice_servers }
}

/// History query params.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Number of most-recent records to return.
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

const fn default_history_limit() -> i64 {
    50
}

/// Chat history response body.
#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    /// Decrypted chat records, oldest first.
    pub messages: Vec<Value>,
}

/// `GET /rooms/{room_id}/messages`
///
/// Records are stored newest-first; the newest `limit` are served
/// oldest-first with contents decrypted.
pub async fn get_chat_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<ChatHistoryResponse> {
    let raw = match state.kv.head(&keys::chat(&room_id), query.limit.max(0)).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "Chat history unavailable");
            Vec::new()
        }
    };

    let mut messages: Vec<Value> = raw
        .iter()
        .filter_map(|entry| match serde_json::from_str::<Value>(entry) {
            Ok(mut record) => {
                if let Some(ciphertext) = record.get("content").and_then(Value::as_str) {
                    record["content"] = Value::String(state.cipher.decrypt(ciphertext));
                }
                Some(record)
            }
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Skipping malformed chat record");
                None
            }
        })
        .collect();
    messages.reverse();

    Json(ChatHistoryResponse { messages })
}

/// Whiteboard history response body.
#[derive(Debug, Serialize)]
pub struct WhiteboardResponse {
    /// Persisted events, oldest first.
    pub events: Vec<Value>,
}

/// `GET /rooms/{room_id}/whiteboard`
pub async fn get_whiteboard_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<WhiteboardResponse> {
    let raw = match state.kv.all(&keys::whiteboard(&room_id)).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "Whiteboard history unavailable");
            Vec::new()
        }
    };

    let mut events: Vec<Value> = raw
        .iter()
        .filter_map(|entry| serde_json::from_str(entry).ok())
        .collect();
    events.reverse();

    Json(WhiteboardResponse { events })
}

/// Upload response body.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Human-readable status.
    pub message: String,
    /// Metadata echoed into the `file_shared` broadcast.
    pub file_info: Value,
}

/// `POST /rooms/{room_id}/upload`
///
/// Streams one multipart file to `{upload_directory}/{room_id}/{filename}`,
/// then announces it to the room.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    auth_user: AuthUser,
    mut multipart: Multipart,
) -> RoomResult<Json<UploadResponse>> {
    if room_id.contains(['/', '\\']) || room_id == ".." {
        return Err(RoomError::InvalidUpload("invalid room id".into()));
    }

    let mut filename = None;
    let mut content_type = None;
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RoomError::InvalidUpload(e.to_string()))?
    {
        if field.name() == Some("file") || field.file_name().is_some() {
            filename = field.file_name().map(String::from);
            content_type = field.content_type().map(String::from);
            data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| RoomError::InvalidUpload(e.to_string()))?,
            );
            break;
        }
    }

    let data = data.ok_or_else(|| RoomError::InvalidUpload("missing file field".into()))?;
    let filename = sanitize_filename(filename.as_deref())
        .ok_or_else(|| RoomError::InvalidUpload("missing filename".into()))?;

    if data.len() > state.config.max_file_size {
        return Err(RoomError::FileTooLarge {
            max_bytes: state.config.max_file_size,
        });
    }

    let dir = std::path::Path::new(&state.config.upload_directory).join(&room_id);
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join(&filename), &data).await?;

    let file_info = json!({
        "filename": filename,
        "file_size": data.len(),
        "file_type": content_type,
        "uploaded_by": auth_user.username,
        "download_url": format!("/rooms/{room_id}/download/{filename}"),
    });

    state
        .registry
        .broadcast(
            &room_id,
            &ServerEvent::FileShared {
                file_info: file_info.clone(),
                timestamp: Utc::now(),
            },
            None,
        )
        .await;

    info!(room_id = %room_id, filename = %filename, "File uploaded");

    Ok(Json(UploadResponse {
        message: "File uploaded successfully".into(),
        file_info,
    }))
}

/// Keep only the final path component of a client-supplied filename.
fn sanitize_filename(raw: Option<&str>) -> Option<String> {
    let name = std::path::Path::new(raw?).file_name()?.to_str()?;
    if name.is_empty() || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
