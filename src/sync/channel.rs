use crate::models::ServerMessage;
use crate::sync::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

/// One event on a board channel. Subscribers drop events whose origin equals
/// their own connection id: the originator already has the result from its
/// direct response, so redelivery would be an echo loop.
#[derive(Clone, Debug)]
pub struct ChannelEvent {
    pub origin: ConnectionId,
    pub message: ServerMessage,
}

impl ChannelEvent {
    pub fn is_echo_for(&self, connection_id: ConnectionId) -> bool {
        self.origin == connection_id
    }
}

/// Per-board real-time fan-out, backed by one bounded `tokio::sync::broadcast`
/// channel per board, created on demand and removed when the last subscriber
/// leaves.
///
/// Delivery is at-most-once and best-effort: a lagging or disconnected
/// subscriber misses messages and recovers by refetching the authoritative
/// document. The store is the durability boundary, not the channel.
#[derive(Clone)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<ChannelEvent>>>>,
    capacity: usize,
}

impl ChannelRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to a board's channel, creating it if needed.
    pub async fn subscribe(&self, board_id: Uuid) -> broadcast::Receiver<ChannelEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(board_id)
            .or_insert_with(|| {
                debug!("Creating broadcast channel for board {}", board_id);
                let (tx, _rx) = broadcast::channel::<ChannelEvent>(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Publish an event to every current subscriber of the board. Returns the
    /// number of receivers the event was handed to (including the origin,
    /// which filters it out on its own side).
    pub async fn publish(
        &self,
        board_id: Uuid,
        origin: ConnectionId,
        message: ServerMessage,
    ) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&board_id) {
            // send only errors when there are no receivers; that is not a
            // failure for an ephemeral channel
            Some(tx) => tx.send(ChannelEvent { origin, message }).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the board's channel if no subscribers remain. Called after a
    /// connection unsubscribes.
    pub async fn release(&self, board_id: Uuid) {
        let mut channels = self.channels.write().await;
        if let Some(tx) = channels.get(&board_id) {
            if tx.receiver_count() == 0 {
                debug!("Removing broadcast channel for board {}", board_id);
                channels.remove(&board_id);
            }
        }
    }

    pub async fn connection_count(&self, board_id: Uuid) -> usize {
        let channels = self.channels.read().await;
        channels.get(&board_id).map_or(0, |tx| tx.receiver_count())
    }

    pub async fn board_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn total_connections(&self) -> usize {
        let channels = self.channels.read().await;
        channels.values().map(|tx| tx.receiver_count()).sum()
    }
}
