//! Message Router
//!
//! Dispatches inbound socket messages: mutates participant state, persists
//! chat and whiteboard history, and fans out to the room. Handler faults are
//! logged and dropped; a bad message never tears down the session.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::{ClientMessage, ServerEvent};
use super::participant::VideoQuality;
use crate::api::AppState;
use crate::db::{keys, CHAT_HISTORY_BOUND, WHITEBOARD_HISTORY_BOUND};

/// Route one inbound message from an authenticated session.
///
/// `user_id` is always the session's own identity; identity fields supplied
/// inside the message body never reach a broadcast.
pub async fn dispatch(state: &AppState, room_id: &str, user_id: &str, message: ClientMessage) {
    match message {
        ClientMessage::WebrtcSignal { data, to_user } => {
            forward_webrtc_signal(state, room_id, user_id, data, to_user).await;
        }
        ClientMessage::ChatMessage { content } => {
            handle_chat_message(state, room_id, user_id, &content).await;
        }
        ClientMessage::WhiteboardEvent { event_type, data } => {
            handle_whiteboard_event(state, room_id, user_id, event_type, data).await;
        }
        ClientMessage::FileShare { file_info } => {
            let event = ServerEvent::FileShare {
                user_id: user_id.to_string(),
                file_info,
                timestamp: Utc::now(),
            };
            state.registry.broadcast(room_id, &event, None).await;
        }
        ClientMessage::VideoQualityChange { quality } => {
            handle_video_quality_change(state, room_id, user_id, quality).await;
        }
        ClientMessage::ScreenShare { is_sharing } => {
            if !state
                .registry
                .set_screen_sharing(room_id, user_id, is_sharing)
                .await
            {
                return;
            }
            let event = ServerEvent::ScreenShareStatus {
                user_id: user_id.to_string(),
                is_sharing,
                timestamp: Utc::now(),
            };
            state.registry.broadcast(room_id, &event, None).await;
        }
        ClientMessage::AudioMute { is_muted } => {
            if !state
                .registry
                .set_audio_muted(room_id, user_id, is_muted)
                .await
            {
                return;
            }
            let event = ServerEvent::AudioMuteStatus {
                user_id: user_id.to_string(),
                is_muted,
                timestamp: Utc::now(),
            };
            state.registry.broadcast(room_id, &event, None).await;
        }
        ClientMessage::VideoMute { is_muted } => {
            if !state
                .registry
                .set_video_muted(room_id, user_id, is_muted)
                .await
            {
                return;
            }
            let event = ServerEvent::VideoMuteStatus {
                user_id: user_id.to_string(),
                is_muted,
                timestamp: Utc::now(),
            };
            state.registry.broadcast(room_id, &event, None).await;
        }
        // Logged at the session loop, which still has the raw frame.
        ClientMessage::Unknown => {}
    }
}

/// Relay an opaque WebRTC payload.
///
/// The backend never inspects or rewrites SDP/ICE: with a target the signal
/// is unicast (and silently dropped when the target is not in the room),
/// without one it goes to every peer except the sender. Signals are never
/// stored.
async fn forward_webrtc_signal(
    state: &AppState,
    room_id: &str,
    from_user: &str,
    data: Value,
    to_user: Option<String>,
) {
    let signal_type = data
        .get("type")
        .and_then(Value::as_str)
        .map(String::from);

    let event = ServerEvent::WebrtcSignal {
        signal_type,
        data,
        from_user: from_user.to_string(),
        timestamp: Utc::now(),
    };

    match to_user {
        Some(target) => {
            if !state.registry.send_to(room_id, &target, &event).await {
                debug!(
                    from_user = %from_user,
                    to_user = %target,
                    room_id = %room_id,
                    "Dropped signal for absent peer"
                );
            }
        }
        None => {
            state
                .registry
                .broadcast(room_id, &event, Some(from_user))
                .await;
        }
    }
}

async fn handle_chat_message(state: &AppState, room_id: &str, user_id: &str, content: &str) {
    let content = content.trim();
    if content.is_empty() {
        return;
    }

    // The sender's current display name, not whatever the token carried at
    // some earlier point.
    let Some(username) = state.registry.username_of(room_id, user_id).await else {
        debug!(user_id = %user_id, room_id = %room_id, "Chat from non-member dropped");
        return;
    };

    let id = Uuid::new_v4().to_string();
    let timestamp = Utc::now();

    // Persist the ciphertext copy; delivery does not wait on the store.
    match state.cipher.encrypt(content) {
        Ok(ciphertext) => {
            let record = ServerEvent::ChatMessage {
                id: id.clone(),
                user_id: user_id.to_string(),
                username: username.clone(),
                content: ciphertext,
                timestamp,
            };
            persist(state, &keys::chat(room_id), &record, CHAT_HISTORY_BOUND).await;
        }
        Err(e) => warn!(error = %e, "Failed to encrypt chat message, skipping persistence"),
    }

    let event = ServerEvent::ChatMessage {
        id,
        user_id: user_id.to_string(),
        username,
        content: content.to_string(),
        timestamp,
    };
    state.registry.broadcast(room_id, &event, None).await;
}

async fn handle_whiteboard_event(
    state: &AppState,
    room_id: &str,
    user_id: &str,
    event_type: String,
    data: Value,
) {
    let event = ServerEvent::WhiteboardEvent {
        event_type,
        user_id: user_id.to_string(),
        data,
        timestamp: Utc::now(),
    };

    persist(state, &keys::whiteboard(room_id), &event, WHITEBOARD_HISTORY_BOUND).await;

    state
        .registry
        .broadcast(room_id, &event, Some(user_id))
        .await;
}

async fn handle_video_quality_change(
    state: &AppState,
    room_id: &str,
    user_id: &str,
    quality: VideoQuality,
) {
    if !state
        .registry
        .set_video_quality(room_id, user_id, quality)
        .await
    {
        return;
    }

    let event = ServerEvent::VideoQualityChanged {
        user_id: user_id.to_string(),
        quality,
        timestamp: Utc::now(),
    };
    state.registry.broadcast(room_id, &event, None).await;
}

/// Push a record onto a bounded history list, logging (not propagating) any
/// store failure.
async fn persist(state: &AppState, key: &str, record: &ServerEvent, bound: i64) {
    let json = match serde_json::to_string(record) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, key = %key, "Failed to serialize record");
            return;
        }
    };

    if let Err(e) = state.kv.push_head(key, &json, bound).await {
        warn!(error = %e, key = %key, "Failed to persist record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppState;
    use crate::config::Config;
    use crate::crypto::ChatCipher;
    use crate::db::KvStore;
    use crate::rooms::participant::{OutboundFrame, PeerSender};
    use crate::rooms::Registry;
    use tokio::sync::mpsc;

    fn test_state() -> AppState {
        AppState::new(
            Registry::new(10),
            KvStore::disabled(),
            ChatCipher::generate(),
            Config::default_for_test(),
        )
    }

    async fn join(
        state: &AppState,
        room_id: &str,
        user_id: &str,
        username: &str,
    ) -> mpsc::Receiver<OutboundFrame> {
        let (tx, mut rx) = mpsc::channel(16);
        assert!(
            state
                .registry
                .admit(room_id, user_id, username, PeerSender::new(tx), None)
                .await
        );
        while rx.try_recv().is_ok() {}
        rx
    }

    fn next_event(rx: &mut mpsc::Receiver<OutboundFrame>) -> Value {
        match rx.try_recv() {
            Ok(OutboundFrame::Text(payload)) => serde_json::from_str(&payload).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn assert_silent(rx: &mut mpsc::Receiver<OutboundFrame>) {
        assert!(rx.try_recv().is_err(), "expected no frames");
    }

    fn parse(raw: &str) -> ClientMessage {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_including_sender() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;
        let mut rx_b = join(&state, "r1", "b", "bob").await;
        while rx_a.try_recv().is_ok() {}

        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"chat_message","content":"hello"}"#),
        )
        .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let event = next_event(rx);
            assert_eq!(event["type"], "chat_message");
            assert_eq!(event["user_id"], "a");
            assert_eq!(event["username"], "alice");
            assert_eq!(event["content"], "hello");
            assert!(event["id"].is_string());
        }
    }

    #[tokio::test]
    async fn test_blank_chat_dropped() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;

        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"chat_message","content":"   "}"#),
        )
        .await;

        assert_silent(&mut rx_a);
    }

    #[tokio::test]
    async fn test_signal_unicast_to_target_only() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;
        let mut rx_b = join(&state, "r1", "b", "bob").await;
        let mut rx_c = join(&state, "r1", "c", "carol").await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        dispatch(
            &state,
            "r1",
            "b",
            parse(r#"{"type":"webrtc_signal","to_user":"a","data":{"type":"offer","sdp":"v=0"}}"#),
        )
        .await;

        let event = next_event(&mut rx_a);
        assert_eq!(event["type"], "webrtc_signal");
        assert_eq!(event["from_user"], "b");
        assert_eq!(event["signal_type"], "offer");
        assert_eq!(event["data"]["sdp"], "v=0");

        assert_silent(&mut rx_b);
        assert_silent(&mut rx_c);
    }

    #[tokio::test]
    async fn test_signal_for_absent_target_dropped_not_broadcast() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;
        let mut rx_b = join(&state, "r1", "b", "bob").await;
        while rx_a.try_recv().is_ok() {}

        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"webrtc_signal","to_user":"ghost","data":{"type":"offer"}}"#),
        )
        .await;

        assert_silent(&mut rx_a);
        assert_silent(&mut rx_b);
    }

    #[tokio::test]
    async fn test_untargeted_signal_announces_to_peers_only() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;
        let mut rx_b = join(&state, "r1", "b", "bob").await;
        while rx_a.try_recv().is_ok() {}

        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"webrtc_signal","data":{"type":"offer","sdp":"v=0"}}"#),
        )
        .await;

        assert_eq!(next_event(&mut rx_b)["type"], "webrtc_signal");
        assert_silent(&mut rx_a);
    }

    #[tokio::test]
    async fn test_mute_broadcast_carries_authenticated_identity() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;
        let mut rx_b = join(&state, "r1", "b", "bob").await;
        while rx_a.try_recv().is_ok() {}

        // A crafted user_id in the body cannot impersonate a peer.
        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"audio_mute","is_muted":true,"user_id":"b"}"#),
        )
        .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let event = next_event(rx);
            assert_eq!(event["type"], "audio_mute_status");
            assert_eq!(event["user_id"], "a");
            assert_eq!(event["is_muted"], true);
        }

        let snapshot = state.registry.snapshot("r1").await;
        let a = snapshot.iter().find(|p| p.user_id == "a").unwrap();
        let b = snapshot.iter().find(|p| p.user_id == "b").unwrap();
        assert!(a.is_audio_muted);
        assert!(!b.is_audio_muted);
    }

    #[tokio::test]
    async fn test_quality_change_updates_state_and_broadcasts() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;

        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"video_quality_change","quality":"high"}"#),
        )
        .await;

        let event = next_event(&mut rx_a);
        assert_eq!(event["type"], "video_quality_changed");
        assert_eq!(event["quality"], "high");

        let snapshot = state.registry.snapshot("r1").await;
        assert_eq!(snapshot[0].video_quality, VideoQuality::High);
    }

    #[tokio::test]
    async fn test_whiteboard_excludes_the_artist() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;
        let mut rx_b = join(&state, "r1", "b", "bob").await;
        while rx_a.try_recv().is_ok() {}

        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"whiteboard_event","event_type":"draw","data":{"x":1,"y":2}}"#),
        )
        .await;

        let event = next_event(&mut rx_b);
        assert_eq!(event["type"], "whiteboard_event");
        assert_eq!(event["event_type"], "draw");
        assert_eq!(event["user_id"], "a");
        assert_eq!(event["data"]["x"], 1);

        assert_silent(&mut rx_a);
    }

    #[tokio::test]
    async fn test_file_share_reaches_everyone() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;
        let mut rx_b = join(&state, "r1", "b", "bob").await;
        while rx_a.try_recv().is_ok() {}

        dispatch(
            &state,
            "r1",
            "a",
            parse(r#"{"type":"file_share","file_info":{"filename":"notes.pdf"}}"#),
        )
        .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let event = next_event(rx);
            assert_eq!(event["type"], "file_share");
            assert_eq!(event["user_id"], "a");
            assert_eq!(event["file_info"]["filename"], "notes.pdf");
        }
    }

    #[tokio::test]
    async fn test_status_from_non_member_emits_nothing() {
        let state = test_state();
        let mut rx_a = join(&state, "r1", "a", "alice").await;

        dispatch(
            &state,
            "r1",
            "ghost",
            parse(r#"{"type":"screen_share","is_sharing":true}"#),
        )
        .await;

        assert_silent(&mut rx_a);
    }
}
