use crate::models::{BoardRecord, BoardSnapshot, ElementsUpdatedMessage, ServerMessage};
use crate::store::{DocumentStore, StoreError};
use crate::sync::channel::ChannelRegistry;
use crate::sync::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of a version-gated write attempt.
#[derive(Debug)]
pub enum ApplyOutcome {
    Accepted { new_version: u64 },
    /// The proposed base version was stale. Carries the full authoritative
    /// record; the caller must adopt it unconditionally. A conflict is a
    /// normal protocol outcome, not an error.
    Conflict { current: BoardRecord },
}

#[derive(Debug)]
pub enum GuardError {
    /// Fatal for the operation; the client should stop writing and reload.
    NotFound,
    /// Retryable with the same known version: compare-and-increment is
    /// atomic, so a failed save leaves the stored state unchanged.
    Store(StoreError),
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::NotFound => write!(f, "Board not found"),
            GuardError::Store(e) => write!(f, "Persistence error: {}", e),
        }
    }
}

impl std::error::Error for GuardError {}

/// The optimistic-concurrency-control gate in front of the document store.
///
/// All writes to one board are serialized through one logical lock per board
/// id, created on demand and evicted when the board's last channel subscriber
/// leaves. Writes to different boards proceed in parallel.
pub struct VersionGuard {
    store: Arc<dyn DocumentStore>,
    channels: ChannelRegistry,
    rooms: Arc<RwLock<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl VersionGuard {
    pub fn new(store: Arc<dyn DocumentStore>, channels: ChannelRegistry) -> Self {
        Self {
            store,
            channels,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn room(&self, board_id: Uuid) -> Arc<Mutex<()>> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(board_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attempt a write proposing from `known_version`.
    ///
    /// Accepted writes are persisted at `known_version + 1` and broadcast to
    /// every channel subscriber except `origin` before this returns. A stale
    /// `known_version` yields `ApplyOutcome::Conflict` with the authoritative
    /// record, whose version is always strictly greater than the proposal's
    /// base.
    pub async fn try_apply(
        &self,
        board_id: Uuid,
        proposed: BoardSnapshot,
        known_version: u64,
        author: &str,
        origin: ConnectionId,
    ) -> Result<ApplyOutcome, GuardError> {
        let room = self.room(board_id).await;
        let _serialized = room.lock().await;

        let current = self
            .store
            .load(board_id)
            .await
            .map_err(GuardError::Store)?
            .ok_or(GuardError::NotFound)?;

        if current.version != known_version {
            info!(
                "Stale write on board {}: proposed from {} but stored is {}",
                board_id, known_version, current.version
            );
            return Ok(ApplyOutcome::Conflict { current });
        }

        let new_version = current.version + 1;
        self.store
            .save(board_id, &proposed, new_version, author)
            .await
            .map_err(GuardError::Store)?;

        debug!(
            "Accepted write on board {} at version {} by {}",
            board_id, new_version, author
        );

        self.channels
            .publish(
                board_id,
                origin,
                ServerMessage::ElementsUpdated(ElementsUpdatedMessage {
                    version: new_version,
                    elements: proposed.elements,
                    view_state: proposed.view_state,
                    files: proposed.files,
                    updated_by: author.to_string(),
                }),
            )
            .await;

        Ok(ApplyOutcome::Accepted { new_version })
    }

    /// Drop the board's lock if nothing is subscribed to it anymore.
    pub async fn release(&self, board_id: Uuid) {
        if self.channels.connection_count(board_id).await == 0 {
            let mut rooms = self.rooms.write().await;
            if rooms.remove(&board_id).is_some() {
                debug!("Evicted room lock for board {}", board_id);
            }
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
