//! Socket Protocol
//!
//! UTF-8 JSON text frames in both directions, tagged by a top-level `type`
//! field. Server-originated frames always carry a UTC timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::participant::{ParticipantSummary, VideoQuality};

/// Client-to-server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opaque WebRTC signaling payload to relay.
    WebrtcSignal {
        #[serde(default)]
        data: Value,
        #[serde(default)]
        to_user: Option<String>,
    },
    /// Text chat line.
    ChatMessage {
        #[serde(default)]
        content: String,
    },
    /// Shared whiteboard stroke, clear, or similar.
    WhiteboardEvent {
        #[serde(default = "default_whiteboard_event_type")]
        event_type: String,
        #[serde(default)]
        data: Value,
    },
    /// File-share notification (metadata only, the file moves over HTTP).
    FileShare {
        #[serde(default)]
        file_info: Value,
    },
    /// Sender changed its outgoing video quality.
    VideoQualityChange {
        #[serde(default)]
        quality: VideoQuality,
    },
    /// Sender started or stopped screen sharing.
    ScreenShare {
        #[serde(default)]
        is_sharing: bool,
    },
    /// Sender muted or unmuted its audio.
    AudioMute {
        #[serde(default)]
        is_muted: bool,
    },
    /// Sender muted or unmuted its video.
    VideoMute {
        #[serde(default)]
        is_muted: bool,
    },
    /// Unrecognized tag: logged and dropped, the session stays open.
    #[serde(other)]
    Unknown,
}

fn default_whiteboard_event_type() -> String {
    "draw".into()
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A peer entered the room.
    UserJoined {
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },
    /// A peer left the room.
    UserLeft {
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },
    /// Membership snapshot delivered to a newcomer (excluding itself).
    ParticipantsList {
        participants: Vec<ParticipantSummary>,
        timestamp: DateTime<Utc>,
    },
    /// Chat line fanned out to the room; also the persisted record shape,
    /// with `content` holding ciphertext at rest.
    ChatMessage {
        id: String,
        user_id: String,
        username: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Whiteboard event fanned out to the room; also the persisted shape.
    WhiteboardEvent {
        event_type: String,
        user_id: String,
        data: Value,
        timestamp: DateTime<Utc>,
    },
    /// Peer-announced file share.
    FileShare {
        user_id: String,
        file_info: Value,
        timestamp: DateTime<Utc>,
    },
    /// Server-announced completed upload.
    FileShared {
        file_info: Value,
        timestamp: DateTime<Utc>,
    },
    /// A peer's video quality changed.
    VideoQualityChanged {
        user_id: String,
        quality: VideoQuality,
        timestamp: DateTime<Utc>,
    },
    /// A peer's screen-share state changed.
    ScreenShareStatus {
        user_id: String,
        is_sharing: bool,
        timestamp: DateTime<Utc>,
    },
    /// A peer's audio mute state changed.
    AudioMuteStatus {
        user_id: String,
        is_muted: bool,
        timestamp: DateTime<Utc>,
    },
    /// A peer's video mute state changed.
    VideoMuteStatus {
        user_id: String,
        is_muted: bool,
        timestamp: DateTime<Utc>,
    },
    /// Relayed WebRTC signal, forwarded verbatim.
    WebrtcSignal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal_type: Option<String>,
        data: Value,
        from_user: String,
        timestamp: DateTime<Utc>,
    },
}
