use crate::models::{PresenceEntry, PresenceJoinMessage, PresenceLeaveMessage, ServerMessage};
use crate::sync::channel::ChannelRegistry;
use crate::sync::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

struct TrackedMember {
    entry: PresenceEntry,
    last_seen: Instant,
}

/// Maintains the live member set per board and emits join/leave events on
/// the board channel. Entries are ephemeral: created on subscribe, removed
/// on disconnect or when the heartbeat timeout elapses, never persisted.
#[derive(Clone)]
pub struct PresenceTracker {
    boards: Arc<RwLock<HashMap<Uuid, HashMap<ConnectionId, TrackedMember>>>>,
    channels: ChannelRegistry,
}

impl PresenceTracker {
    pub fn new(channels: ChannelRegistry) -> Self {
        Self {
            boards: Arc::new(RwLock::new(HashMap::new())),
            channels,
        }
    }

    /// Register a new subscriber. Emits `presence-join` to the existing
    /// subscribers (not the joiner) and returns the member list as it was
    /// before the join, which the joiner receives as its snapshot.
    pub async fn join(&self, board_id: Uuid, entry: PresenceEntry) -> Vec<PresenceEntry> {
        let existing = {
            let mut boards = self.boards.write().await;
            let members = boards.entry(board_id).or_default();
            let existing: Vec<PresenceEntry> =
                members.values().map(|m| m.entry.clone()).collect();
            members.insert(
                entry.connection_id,
                TrackedMember {
                    entry: entry.clone(),
                    last_seen: Instant::now(),
                },
            );
            existing
        };

        info!(
            "Presence join on board {}: user={} connection={}",
            board_id, entry.user_id, entry.connection_id
        );
        self.channels
            .publish(
                board_id,
                entry.connection_id,
                ServerMessage::PresenceJoin(PresenceJoinMessage { member: entry }),
            )
            .await;

        existing
    }

    /// Remove a subscriber (explicit unsubscribe or connection loss) and
    /// emit `presence-leave` to the remaining subscribers.
    pub async fn leave(&self, board_id: Uuid, connection_id: ConnectionId) -> Option<PresenceEntry> {
        let removed = {
            let mut boards = self.boards.write().await;
            let removed = boards
                .get_mut(&board_id)
                .and_then(|members| members.remove(&connection_id));
            if boards.get(&board_id).is_some_and(|m| m.is_empty()) {
                boards.remove(&board_id);
            }
            removed
        };

        if let Some(member) = &removed {
            info!(
                "Presence leave on board {}: user={} connection={}",
                board_id, member.entry.user_id, connection_id
            );
            self.channels
                .publish(
                    board_id,
                    connection_id,
                    ServerMessage::PresenceLeave(PresenceLeaveMessage {
                        user_id: member.entry.user_id.clone(),
                        connection_id,
                    }),
                )
                .await;
        }

        removed.map(|m| m.entry)
    }

    pub async fn members(&self, board_id: Uuid) -> Vec<PresenceEntry> {
        let boards = self.boards.read().await;
        boards
            .get(&board_id)
            .map(|members| members.values().map(|m| m.entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Record a heartbeat for a connection, deferring its eviction.
    pub async fn heartbeat(&self, board_id: Uuid, connection_id: ConnectionId) {
        let mut boards = self.boards.write().await;
        if let Some(member) = boards
            .get_mut(&board_id)
            .and_then(|members| members.get_mut(&connection_id))
        {
            member.last_seen = Instant::now();
        }
    }

    /// Remove every entry whose last heartbeat is older than `timeout` and
    /// emit their leave events. Returns the evicted entries.
    pub async fn evict_stale(&self, timeout: Duration) -> Vec<(Uuid, PresenceEntry)> {
        let now = Instant::now();
        let stale = {
            let mut boards = self.boards.write().await;
            let mut stale = Vec::new();
            for (board_id, members) in boards.iter_mut() {
                members.retain(|connection_id, member| {
                    if now.duration_since(member.last_seen) > timeout {
                        debug!(
                            "Evicting stale presence entry on board {}: connection={}",
                            board_id, connection_id
                        );
                        stale.push((*board_id, member.entry.clone()));
                        false
                    } else {
                        true
                    }
                });
            }
            boards.retain(|_, members| !members.is_empty());
            stale
        };

        for (board_id, entry) in &stale {
            self.channels
                .publish(
                    *board_id,
                    entry.connection_id,
                    ServerMessage::PresenceLeave(PresenceLeaveMessage {
                        user_id: entry.user_id.clone(),
                        connection_id: entry.connection_id,
                    }),
                )
                .await;
        }
        stale
    }

    pub async fn member_count(&self) -> usize {
        let boards = self.boards.read().await;
        boards.values().map(|members| members.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: &str) -> PresenceEntry {
        PresenceEntry {
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
            connection_id: Uuid::new_v4(),
        }
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(ChannelRegistry::new(16))
    }

    #[tokio::test]
    async fn joiner_snapshot_holds_existing_members_only() {
        let tracker = tracker();
        let board = Uuid::new_v4();

        assert!(tracker.join(board, entry("alice")).await.is_empty());
        assert_eq!(tracker.join(board, entry("bob")).await.len(), 1);

        let snapshot = tracker.join(board, entry("carol")).await;
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.iter().any(|m| m.user_id == "carol"));
        assert_eq!(tracker.members(board).await.len(), 3);
    }

    #[tokio::test]
    async fn join_emits_one_event_to_existing_subscribers() {
        let channels = ChannelRegistry::new(16);
        let tracker = PresenceTracker::new(channels.clone());
        let board = Uuid::new_v4();

        let alice = entry("alice");
        let mut alice_rx = channels.subscribe(board).await;
        tracker.join(board, alice.clone()).await;
        // Alice sees her own join as an echo and drops it.
        assert!(alice_rx.recv().await.unwrap().is_echo_for(alice.connection_id));

        tracker.join(board, entry("bob")).await;
        let event = alice_rx.recv().await.unwrap();
        assert!(!event.is_echo_for(alice.connection_id));
        match event.message {
            ServerMessage::PresenceJoin(msg) => assert_eq!(msg.member.user_id, "bob"),
            other => panic!("Expected presence-join, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn leave_removes_entry_and_emits_event() {
        let channels = ChannelRegistry::new(16);
        let tracker = PresenceTracker::new(channels.clone());
        let board = Uuid::new_v4();

        let alice = entry("alice");
        let bob = entry("bob");
        tracker.join(board, alice.clone()).await;
        tracker.join(board, bob.clone()).await;

        let mut rx = channels.subscribe(board).await;
        let removed = tracker.leave(board, bob.connection_id).await;
        assert_eq!(removed.unwrap().user_id, "bob");
        assert_eq!(tracker.members(board).await.len(), 1);

        match rx.recv().await.unwrap().message {
            ServerMessage::PresenceLeave(msg) => {
                assert_eq!(msg.user_id, "bob");
                assert_eq!(msg.connection_id, bob.connection_id);
            }
            other => panic!("Expected presence-leave, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn leave_of_unknown_connection_is_a_noop() {
        let tracker = tracker();
        let board = Uuid::new_v4();
        assert!(tracker.leave(board, Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn stale_entries_are_evicted_after_timeout() {
        let tracker = tracker();
        let board = Uuid::new_v4();

        let alice = entry("alice");
        let bob = entry("bob");
        tracker.join(board, alice.clone()).await;
        tracker.join(board, bob.clone()).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        tracker.heartbeat(board, bob.connection_id).await;

        let evicted = tracker.evict_stale(Duration::from_millis(20)).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].1.user_id, "alice");

        let members = tracker.members(board).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "bob");
    }
}
