//! Room Registry and Fan-out
//!
//! In-memory membership for every live room, plus the delivery engine that
//! unicasts and broadcasts frames to member sockets.
//!
//! Two indices are kept in lockstep under one lock: `rooms` maps a room to
//! its participants, `user_rooms` maps a user back to its room. Every
//! mutation (admit, evict, reconnect-replace) runs inside a single critical
//! section so the indices can never disagree, a user can never be in two
//! rooms, and a room is never retained empty. Sends are non-blocking
//! enqueues onto each participant's writer queue, so holding the lock across
//! a fan-out is cheap and gives all members the same broadcast order.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::events::ServerEvent;
use super::participant::{Participant, ParticipantSnapshot, ParticipantSummary, PeerSender, VideoQuality};

/// Close code for an orderly refusal or shutdown.
const CLOSE_NORMAL: u16 = 1000;

/// A live room: its members and the capacity fixed at creation.
struct Room {
    participants: HashMap<String, Participant>,
    capacity: usize,
}

impl Room {
    fn new(capacity: usize) -> Self {
        Self {
            participants: HashMap::new(),
            capacity,
        }
    }
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Room>,
    user_rooms: HashMap<String, String>,
}

impl Inner {
    /// Enqueue `payload` to every member of the room except `exclude`.
    /// Returns the ids whose enqueue failed.
    fn fanout(&self, room_id: &str, payload: &str, exclude: Option<&str>) -> Vec<String> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };

        let mut failed = Vec::new();
        for (user_id, participant) in &room.participants {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            if !participant.sender.send_text(payload.to_string()) {
                warn!(user_id = %user_id, room_id = %room_id, "Failed to enqueue frame for peer");
                failed.push(user_id.clone());
            }
        }
        failed
    }

    /// Serialize once and fan out; peers whose enqueue failed are evicted
    /// after the sweep, so one dead socket cannot abort delivery to the rest.
    fn deliver(&mut self, room_id: &str, event: &ServerEvent, exclude: Option<&str>) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize event");
                return;
            }
        };

        for user_id in self.fanout(room_id, &payload, exclude) {
            self.evict(&user_id);
        }
    }

    /// Remove one user from both indices. Returns the ids of any peers whose
    /// `user_left` delivery failed, for the caller to drain.
    fn remove(&mut self, user_id: &str) -> Vec<String> {
        let Some(room_id) = self.user_rooms.remove(user_id) else {
            return Vec::new();
        };

        let Some(room) = self.rooms.get_mut(&room_id) else {
            return Vec::new();
        };

        let Some(participant) = room.participants.remove(user_id) else {
            return Vec::new();
        };

        // Eviction is the single point that closes the socket.
        participant.sender.close(CLOSE_NORMAL, "");

        info!(
            user_id = %user_id,
            username = %participant.username,
            room_id = %room_id,
            "Participant removed from room"
        );

        if room.participants.is_empty() {
            // The persisted descriptor outlives the runtime room.
            self.rooms.remove(&room_id);
            debug!(room_id = %room_id, "Removed empty room");
            return Vec::new();
        }

        let event = ServerEvent::UserLeft {
            user_id: user_id.to_string(),
            username: participant.username,
            timestamp: Utc::now(),
        };

        match serde_json::to_string(&event) {
            Ok(payload) => self.fanout(&room_id, &payload, None),
            Err(e) => {
                error!(error = %e, "Failed to serialize user_left");
                Vec::new()
            }
        }
    }

    /// Evict `user_id`, draining any members whose sockets die while the
    /// departure is being announced.
    fn evict(&mut self, user_id: &str) {
        let mut pending = vec![user_id.to_string()];
        while let Some(next) = pending.pop() {
            pending.extend(self.remove(&next));
        }
    }
}

/// The in-memory room registry.
///
/// Node-local by design: scaling out horizontally requires sticky routing in
/// front of the cluster.
pub struct Registry {
    inner: Mutex<Inner>,
    default_capacity: usize,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(default_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            default_capacity,
        }
    }

    /// Admit a participant into a room.
    ///
    /// A reconnect with a known `user_id` replaces the prior session. When
    /// the room is at capacity the socket is closed with 1000 "Room is full"
    /// and `false` is returned. Otherwise the newcomer is installed, the
    /// room is told `user_joined`, and the newcomer receives a
    /// `participants_list` snapshot of everyone else.
    pub async fn admit(
        &self,
        room_id: &str,
        user_id: &str,
        username: &str,
        sender: PeerSender,
        capacity: Option<usize>,
    ) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.user_rooms.contains_key(user_id) {
            debug!(user_id = %user_id, "Replacing prior session");
            inner.evict(user_id);
        }

        let at_capacity = inner
            .rooms
            .get(room_id)
            .is_some_and(|room| room.participants.len() >= room.capacity);

        if at_capacity {
            // The registry owns the refusal and the close.
            sender.close(CLOSE_NORMAL, "Room is full");
            info!(user_id = %user_id, room_id = %room_id, "Admission refused, room is full");
            return false;
        }

        // A room always has space for at least its first member.
        let capacity = capacity.unwrap_or(self.default_capacity).max(1);
        inner
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(capacity))
            .participants
            .insert(user_id.to_string(), Participant::new(user_id, username, sender));
        inner
            .user_rooms
            .insert(user_id.to_string(), room_id.to_string());

        inner.deliver(
            room_id,
            &ServerEvent::UserJoined {
                user_id: user_id.to_string(),
                username: username.to_string(),
                timestamp: Utc::now(),
            },
            Some(user_id),
        );

        // Snapshot after install, so membership is newcomer-correct. The
        // receiver is left out of its own list.
        let participants: Vec<ParticipantSummary> = inner
            .rooms
            .get(room_id)
            .map(|room| {
                room.participants
                    .values()
                    .filter(|p| p.user_id != user_id)
                    .map(Participant::summary)
                    .collect()
            })
            .unwrap_or_default();

        let list = ServerEvent::ParticipantsList {
            participants,
            timestamp: Utc::now(),
        };

        match serde_json::to_string(&list) {
            Ok(payload) => {
                let delivered = inner
                    .rooms
                    .get(room_id)
                    .and_then(|room| room.participants.get(user_id))
                    .is_some_and(|p| p.sender.send_text(payload));

                if !delivered {
                    warn!(user_id = %user_id, room_id = %room_id, "Newcomer unreachable, evicting");
                    inner.evict(user_id);
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize participants_list"),
        }

        info!(
            user_id = %user_id,
            username = %username,
            room_id = %room_id,
            "Participant admitted"
        );

        true
    }

    /// Evict a participant. Idempotent; unknown ids are a no-op.
    pub async fn evict(&self, user_id: &str) {
        self.inner.lock().await.evict(user_id);
    }

    /// Broadcast an event to a room, optionally excluding one member.
    pub async fn broadcast(&self, room_id: &str, event: &ServerEvent, exclude: Option<&str>) {
        self.inner.lock().await.deliver(room_id, event, exclude);
    }

    /// Unicast an event to one member of a room.
    ///
    /// Returns false (and delivers nothing) when the target is not currently
    /// a member of this room. A failed enqueue evicts the target.
    pub async fn send_to(&self, room_id: &str, user_id: &str, event: &ServerEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize event");
                return false;
            }
        };

        let mut inner = self.inner.lock().await;

        if inner.user_rooms.get(user_id).map(String::as_str) != Some(room_id) {
            return false;
        }

        let delivered = inner
            .rooms
            .get(room_id)
            .and_then(|room| room.participants.get(user_id))
            .is_some_and(|p| p.sender.send_text(payload));

        if !delivered {
            warn!(user_id = %user_id, room_id = %room_id, "Unicast failed, evicting peer");
            inner.evict(user_id);
        }

        delivered
    }

    /// Membership snapshot for HTTP queries. Empty when the room is not live.
    pub async fn snapshot(&self, room_id: &str) -> Vec<ParticipantSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(room_id)
            .map(|room| room.participants.values().map(Participant::snapshot).collect())
            .unwrap_or_default()
    }

    /// Current display name of a member, if present.
    pub async fn username_of(&self, room_id: &str, user_id: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(room_id)
            .and_then(|room| room.participants.get(user_id))
            .map(|p| p.username.clone())
    }

    /// Update a member's video quality. Returns false when absent.
    pub async fn set_video_quality(
        &self,
        room_id: &str,
        user_id: &str,
        quality: VideoQuality,
    ) -> bool {
        self.with_participant(room_id, user_id, |p| p.video_quality = quality)
            .await
    }

    /// Update a member's screen-share flag. Returns false when absent.
    pub async fn set_screen_sharing(&self, room_id: &str, user_id: &str, sharing: bool) -> bool {
        self.with_participant(room_id, user_id, |p| p.is_screen_sharing = sharing)
            .await
    }

    /// Update a member's audio mute flag. Returns false when absent.
    pub async fn set_audio_muted(&self, room_id: &str, user_id: &str, muted: bool) -> bool {
        self.with_participant(room_id, user_id, |p| p.is_audio_muted = muted)
            .await
    }

    /// Update a member's video mute flag. Returns false when absent.
    pub async fn set_video_muted(&self, room_id: &str, user_id: &str, muted: bool) -> bool {
        self.with_participant(room_id, user_id, |p| p.is_video_muted = muted)
            .await
    }

    async fn with_participant<F>(&self, room_id: &str, user_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Participant),
    {
        let mut inner = self.inner.lock().await;
        match inner
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.participants.get_mut(user_id))
        {
            Some(participant) => {
                mutate(participant);
                true
            }
            None => false,
        }
    }

    /// Assert the registry indices agree (test builds only).
    #[cfg(test)]
    pub(crate) async fn check_consistency(&self) {
        let inner = self.inner.lock().await;

        for (room_id, room) in &inner.rooms {
            assert!(
                !room.participants.is_empty(),
                "room {room_id} retained while empty"
            );
            assert!(
                room.participants.len() <= room.capacity,
                "room {room_id} over capacity"
            );
            for user_id in room.participants.keys() {
                assert_eq!(
                    inner.user_rooms.get(user_id),
                    Some(room_id),
                    "participant {user_id} missing reverse index"
                );
            }
        }

        for (user_id, room_id) in &inner.user_rooms {
            assert!(
                inner
                    .rooms
                    .get(room_id)
                    .is_some_and(|room| room.participants.contains_key(user_id)),
                "reverse index for {user_id} points at a room without them"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::participant::OutboundFrame;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn test_sender() -> (PeerSender, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(16);
        (PeerSender::new(tx), rx)
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

    fn chat(content: &str) -> ServerEvent {
        ServerEvent::ChatMessage {
            id: "m1".into(),
            user_id: "a".into(),
            username: "alice".into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_admit_announces_join_and_snapshots_newcomer() {
        let registry = Registry::new(10);
        let (sender_a, mut rx_a) = test_sender();
        let (sender_b, mut rx_b) = test_sender();

        assert!(registry.admit("r1", "a", "alice", sender_a, None).await);

        // First member: empty snapshot, nobody to announce to.
        let list = next_event(&mut rx_a);
        assert_eq!(list["type"], "participants_list");
        assert_eq!(list["participants"].as_array().unwrap().len(), 0);

        assert!(registry.admit("r1", "b", "bob", sender_b, None).await);

        let joined = next_event(&mut rx_a);
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["user_id"], "b");
        assert_eq!(joined["username"], "bob");

        // The newcomer sees everyone but itself.
        let list = next_event(&mut rx_b);
        assert_eq!(list["type"], "participants_list");
        let participants = list["participants"].as_array().unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0]["user_id"], "a");
        assert_eq!(participants[0]["video_quality"], "medium");

        registry.check_consistency().await;
    }

    #[tokio::test]
    async fn test_capacity_refusal_closes_socket() {
        let registry = Registry::new(10);
        let (sender_a, mut rx_a) = test_sender();
        let (sender_b, mut rx_b) = test_sender();
        let (sender_c, mut rx_c) = test_sender();

        assert!(registry.admit("r1", "a", "alice", sender_a, Some(2)).await);
        assert!(registry.admit("r1", "b", "bob", sender_b, Some(2)).await);

        // Drain the admission traffic.
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        assert!(!registry.admit("r1", "c", "carol", sender_c, Some(2)).await);

        match rx_c.try_recv() {
            Ok(OutboundFrame::Close { code, reason }) => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "Room is full");
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        // The refusal is invisible to the members.
        assert_silent(&mut rx_a);
        assert_silent(&mut rx_b);
        assert_eq!(registry.snapshot("r1").await.len(), 2);

        registry.check_consistency().await;
    }

    #[tokio::test]
    async fn test_evict_broadcasts_user_left_once() {
        let registry = Registry::new(10);
        let (sender_a, mut rx_a) = test_sender();
        let (sender_b, mut rx_b) = test_sender();

        registry.admit("r1", "a", "alice", sender_a, None).await;
        registry.admit("r1", "b", "bob", sender_b, None).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        registry.evict("a").await;

        let left = next_event(&mut rx_b);
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["user_id"], "a");
        assert_eq!(left["username"], "alice");

        // Idempotent: a second eviction emits nothing.
        registry.evict("a").await;
        assert_silent(&mut rx_b);

        // The evicted socket got a close frame.
        assert!(matches!(
            rx_a.try_recv(),
            Ok(OutboundFrame::Close { code: 1000, .. })
        ));

        registry.check_consistency().await;
    }

    #[tokio::test]
    async fn test_room_removed_when_last_member_leaves() {
        let registry = Registry::new(10);
        let (sender_a, _rx_a) = test_sender();

        registry.admit("r1", "a", "alice", sender_a, None).await;
        assert_eq!(registry.snapshot("r1").await.len(), 1);

        registry.evict("a").await;

        assert!(registry.snapshot("r1").await.is_empty());
        registry.check_consistency().await;
    }

    #[tokio::test]
    async fn test_reconnect_replaces_prior_session() {
        let registry = Registry::new(10);
        let (sender_a1, mut rx_a1) = test_sender();
        let (sender_a2, mut rx_a2) = test_sender();
        let (sender_b, mut rx_b) = test_sender();

        registry.admit("r1", "a", "alice", sender_a1, None).await;
        registry.admit("r1", "b", "bob", sender_b, None).await;
        while rx_a1.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        assert!(registry.admit("r1", "a", "alice", sender_a2, None).await);

        // The stale session was closed, not silently overwritten.
        assert!(matches!(
            rx_a1.try_recv(),
            Ok(OutboundFrame::Close { code: 1000, .. })
        ));

        // The bystander saw a clean leave/join pair.
        assert_eq!(next_event(&mut rx_b)["type"], "user_left");
        assert_eq!(next_event(&mut rx_b)["type"], "user_joined");

        // The fresh session got its snapshot.
        assert_eq!(next_event(&mut rx_a2)["type"], "participants_list");

        assert_eq!(registry.snapshot("r1").await.len(), 2);
        registry.check_consistency().await;
    }

    #[tokio::test]
    async fn test_dead_peer_reaped_during_broadcast() {
        let registry = Registry::new(10);
        let (sender_a, mut rx_a) = test_sender();
        let (sender_b, rx_b) = test_sender();
        let (sender_c, mut rx_c) = test_sender();

        registry.admit("r1", "a", "alice", sender_a, None).await;
        registry.admit("r1", "b", "bob", sender_b, None).await;
        registry.admit("r1", "c", "carol", sender_c, None).await;
        while rx_a.try_recv().is_ok() {}
        while rx_c.try_recv().is_ok() {}

        // B's socket dies.
        drop(rx_b);

        registry.broadcast("r1", &chat("hello"), None).await;

        // Survivors got the broadcast, then exactly one user_left for B.
        assert_eq!(next_event(&mut rx_a)["type"], "chat_message");
        assert_eq!(next_event(&mut rx_c)["type"], "chat_message");

        let left_a = next_event(&mut rx_a);
        assert_eq!(left_a["type"], "user_left");
        assert_eq!(left_a["user_id"], "b");
        let left_c = next_event(&mut rx_c);
        assert_eq!(left_c["type"], "user_left");
        assert_silent(&mut rx_a);
        assert_silent(&mut rx_c);

        assert_eq!(registry.snapshot("r1").await.len(), 2);
        registry.check_consistency().await;
    }

    #[tokio::test]
    async fn test_unicast_only_reaches_target() {
        let registry = Registry::new(10);
        let (sender_a, mut rx_a) = test_sender();
        let (sender_b, mut rx_b) = test_sender();

        registry.admit("r1", "a", "alice", sender_a, None).await;
        registry.admit("r1", "b", "bob", sender_b, None).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        assert!(registry.send_to("r1", "a", &chat("direct")).await);

        assert_eq!(next_event(&mut rx_a)["type"], "chat_message");
        assert_silent(&mut rx_b);

        // Absent targets are a drop, not a broadcast.
        assert!(!registry.send_to("r1", "nobody", &chat("lost")).await);
        assert_silent(&mut rx_a);
        assert_silent(&mut rx_b);
    }

    #[tokio::test]
    async fn test_unicast_requires_membership_of_this_room() {
        let registry = Registry::new(10);
        let (sender_a, _rx_a) = test_sender();
        let (sender_b, mut rx_b) = test_sender();

        registry.admit("r1", "a", "alice", sender_a, None).await;
        registry.admit("r2", "b", "bob", sender_b, None).await;
        while rx_b.try_recv().is_ok() {}

        // B exists, but not in r1.
        assert!(!registry.send_to("r1", "b", &chat("misrouted")).await);
        assert_silent(&mut rx_b);
    }

    #[tokio::test]
    async fn test_flag_updates_visible_in_snapshot() {
        let registry = Registry::new(10);
        let (sender_a, _rx_a) = test_sender();

        registry.admit("r1", "a", "alice", sender_a, None).await;

        assert!(registry.set_audio_muted("r1", "a", true).await);
        assert!(registry.set_video_quality("r1", "a", VideoQuality::High).await);
        assert!(!registry.set_audio_muted("r1", "ghost", true).await);

        let snapshot = registry.snapshot("r1").await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_audio_muted);
        assert_eq!(snapshot[0].video_quality, VideoQuality::High);
        assert_eq!(registry.username_of("r1", "a").await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_indices_stay_consistent_across_churn() {
        let registry = Registry::new(10);

        for round in 0..3 {
            let mut receivers = Vec::new();
            for i in 0..6 {
                let (sender, rx) = test_sender();
                let user = format!("u{i}");
                let room = format!("r{}", i % 2);
                assert!(registry.admit(&room, &user, &user, sender, Some(3)).await);
                receivers.push(rx);
                registry.check_consistency().await;
            }

            // Both rooms now hold 3 of 3. One refusal, one replace, then
            // drain everyone.
            let (sender, mut rx) = test_sender();
            assert!(!registry.admit("r0", "u9", "u9", sender, Some(3)).await);
            assert!(matches!(
                rx.try_recv(),
                Ok(OutboundFrame::Close { code: 1000, .. })
            ));
            registry.check_consistency().await;

            let (sender, rx) = test_sender();
            assert!(registry.admit("r1", "u1", "u1", sender, Some(3)).await);
            receivers.push(rx);
            registry.check_consistency().await;

            for i in 0..6 {
                registry.evict(&format!("u{i}")).await;
                registry.check_consistency().await;
            }

            assert!(registry.snapshot("r0").await.is_empty(), "round {round}");
            assert!(registry.snapshot("r1").await.is_empty(), "round {round}");
        }
    }
}
