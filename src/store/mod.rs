pub mod memory;
pub mod postgres;

use crate::models::{BoardRecord, BoardSnapshot};
use async_trait::async_trait;
use uuid::Uuid;

/// Errors from the document store. State is guaranteed unchanged when a
/// `save` fails, so callers may retry with the same known version.
#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
    Query(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {}", e),
            StoreError::Query(e) => write!(f, "Store query failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// The authoritative persistence boundary for board documents.
///
/// The store exclusively owns the `version` counter; it is mutated only
/// through the version guard's compare-and-increment, never by direct
/// overwrite. Board lifecycle (create/delete/list) is owned by the external
/// document CRUD service; the methods here exist for bootstrap and tests.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, board_id: Uuid) -> Result<Option<BoardRecord>, StoreError>;

    /// Persist an accepted write at `new_version`. Callers (the version
    /// guard only) already hold the per-board serialization.
    async fn save(
        &self,
        board_id: Uuid,
        snapshot: &BoardSnapshot,
        new_version: u64,
        updated_by: &str,
    ) -> Result<(), StoreError>;

    async fn create(
        &self,
        board_id: Uuid,
        snapshot: BoardSnapshot,
        created_by: &str,
    ) -> Result<BoardRecord, StoreError>;

    async fn delete(&self, board_id: Uuid) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<BoardRecord>, StoreError>;
}
