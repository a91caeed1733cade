use crate::models::{BoardRecord, BoardSnapshot};
use crate::store::{DocumentStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory document store. Used when no database URL is configured and
/// throughout the test suite.
#[derive(Default)]
pub struct MemoryStore {
    boards: RwLock<HashMap<Uuid, BoardRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, board_id: Uuid) -> Result<Option<BoardRecord>, StoreError> {
        Ok(self.boards.read().await.get(&board_id).cloned())
    }

    async fn save(
        &self,
        board_id: Uuid,
        snapshot: &BoardSnapshot,
        new_version: u64,
        updated_by: &str,
    ) -> Result<(), StoreError> {
        let mut boards = self.boards.write().await;
        let record = boards
            .get_mut(&board_id)
            .ok_or_else(|| StoreError::Query(format!("Board '{}' no longer exists", board_id)))?;
        record.snapshot = snapshot.clone();
        record.version = new_version;
        record.last_modified_by = updated_by.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn create(
        &self,
        board_id: Uuid,
        snapshot: BoardSnapshot,
        created_by: &str,
    ) -> Result<BoardRecord, StoreError> {
        let record = BoardRecord::new(board_id, snapshot, created_by);
        self.boards.write().await.insert(board_id, record.clone());
        Ok(record)
    }

    async fn delete(&self, board_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.boards.write().await.remove(&board_id).is_some())
    }

    async fn list(&self) -> Result<Vec<BoardRecord>, StoreError> {
        Ok(self.boards.read().await.values().cloned().collect())
    }
}
