//! Participant State
//!
//! Per-peer session state plus the sending half of its socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Outbound frames queued for a participant's socket writer.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A serialized JSON text frame.
    Text(String),
    /// Keepalive ping.
    Ping,
    /// Close the socket with a code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason handed to the client.
        reason: &'static str,
    },
}

/// Sending half of a participant's socket.
///
/// Frames are enqueued for the single writer task that owns the sink; the
/// queue never blocks the caller. A full or closed queue means the peer is
/// dead or hopelessly behind, and the send is reported as failed.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::Sender<OutboundFrame>,
}

impl PeerSender {
    /// Wrap the channel feeding a socket writer task.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { tx }
    }

    /// Enqueue a text frame. Returns false when the peer cannot accept it.
    pub fn send_text(&self, payload: String) -> bool {
        self.tx.try_send(OutboundFrame::Text(payload)).is_ok()
    }

    /// Enqueue a keepalive ping.
    pub fn send_ping(&self) -> bool {
        self.tx.try_send(OutboundFrame::Ping).is_ok()
    }

    /// Enqueue a close frame (best effort).
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.try_send(OutboundFrame::Close { code, reason });
    }
}

/// Client video quality tiers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    #[default]
    Medium,
    High,
}

/// A single authenticated user's live session within one room.
///
/// Flags are mutated only by the message router on behalf of this
/// participant; peers can never touch each other's state.
#[derive(Debug)]
pub struct Participant {
    /// Stable user ID, unique process-wide.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Sending half of the participant's socket.
    pub sender: PeerSender,
    /// Admission time.
    pub joined_at: DateTime<Utc>,
    /// Whether the participant is sharing its screen.
    pub is_screen_sharing: bool,
    /// Whether the participant muted its audio.
    pub is_audio_muted: bool,
    /// Whether the participant muted its video.
    pub is_video_muted: bool,
    /// Outgoing video quality tier.
    pub video_quality: VideoQuality,
    /// Fixed role label.
    pub role: &'static str,
}

impl Participant {
    /// Create a participant at admission time with default flags.
    #[must_use]
    pub fn new(user_id: &str, username: &str, sender: PeerSender) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            sender,
            joined_at: Utc::now(),
            is_screen_sharing: false,
            is_audio_muted: false,
            is_video_muted: false,
            video_quality: VideoQuality::default(),
            role: "participant",
        }
    }

    /// Wire shape for `participants_list` entries.
    #[must_use]
    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            video_quality: self.video_quality,
            is_screen_sharing: self.is_screen_sharing,
            is_audio_muted: self.is_audio_muted,
            is_video_muted: self.is_video_muted,
        }
    }

    /// HTTP shape for room membership queries.
    #[must_use]
    pub fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            joined_at: self.joined_at,
            is_screen_sharing: self.is_screen_sharing,
            is_audio_muted: self.is_audio_muted,
            is_video_muted: self.is_video_muted,
            video_quality: self.video_quality,
        }
    }
}

/// Participant entry in a `participants_list` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub user_id: String,
    pub username: String,
    pub video_quality: VideoQuality,
    pub is_screen_sharing: bool,
    pub is_audio_muted: bool,
    pub is_video_muted: bool,
}

/// Participant entry in room membership queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub user_id: String,
    pub username: String,
    pub joined_at: DateTime<Utc>,
    pub is_screen_sharing: bool,
    pub is_audio_muted: bool,
    pub is_video_muted: bool,
    pub video_quality: VideoQuality,
}
