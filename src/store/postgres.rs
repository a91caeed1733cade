use crate::models::{BoardRecord, BoardSnapshot, FileBlob, ViewState};
use crate::store::{DocumentStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Postgres-backed document store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!("Database connection pool created successfully");

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS boards (
                id UUID PRIMARY KEY,
                elements JSONB NOT NULL DEFAULT '[]'::jsonb,
                view_state JSONB NOT NULL DEFAULT '{}'::jsonb,
                files JSONB NOT NULL DEFAULT '{}'::jsonb,
                version BIGINT NOT NULL DEFAULT 0,
                last_modified_by TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    fn record_from_row(row: &PgRow) -> Result<BoardRecord, StoreError> {
        let id: Uuid = row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?;
        let Json(elements): Json<Vec<serde_json::Value>> = row
            .try_get("elements")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let Json(view_state): Json<ViewState> = row
            .try_get("view_state")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let Json(files): Json<BTreeMap<String, FileBlob>> = row
            .try_get("files")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let last_modified_by: String = row
            .try_get("last_modified_by")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let updated_at: DateTime<Utc> = row
            .try_get("updated_at")
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(BoardRecord {
            id,
            snapshot: BoardSnapshot {
                elements,
                view_state,
                files,
            },
            version: version as u64,
            last_modified_by,
            updated_at,
        })
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn load(&self, board_id: Uuid) -> Result<Option<BoardRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, elements, view_state, files, version, last_modified_by, updated_at \
             FROM boards WHERE id = $1",
        )
        .bind(board_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        board_id: Uuid,
        snapshot: &BoardSnapshot,
        new_version: u64,
        updated_by: &str,
    ) -> Result<(), StoreError> {
        // The version guard already serializes writers per board; the WHERE
        // clause on the previous version is a second line of defense so a
        // misbehaving caller can never skip or repeat a version.
        let result = sqlx::query(
            "UPDATE boards SET elements = $2, view_state = $3, files = $4, \
             version = $5, last_modified_by = $6, updated_at = now() \
             WHERE id = $1 AND version = $5 - 1",
        )
        .bind(board_id)
        .bind(Json(&snapshot.elements))
        .bind(Json(&snapshot.view_state))
        .bind(Json(&snapshot.files))
        .bind(new_version as i64)
        .bind(updated_by)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Query(format!(
                "Board '{}' missing or not at version {}",
                board_id,
                new_version.saturating_sub(1)
            )));
        }
        Ok(())
    }

    async fn create(
        &self,
        board_id: Uuid,
        snapshot: BoardSnapshot,
        created_by: &str,
    ) -> Result<BoardRecord, StoreError> {
        sqlx::query(
            "INSERT INTO boards (id, elements, view_state, files, version, last_modified_by) \
             VALUES ($1, $2, $3, $4, 0, $5)",
        )
        .bind(board_id)
        .bind(Json(&snapshot.elements))
        .bind(Json(&snapshot.view_state))
        .bind(Json(&snapshot.files))
        .bind(created_by)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(BoardRecord::new(board_id, snapshot, created_by))
    }

    async fn delete(&self, board_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM boards WHERE id = $1")
            .bind(board_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<BoardRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, elements, view_state, files, version, last_modified_by, updated_at \
             FROM boards ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter().map(Self::record_from_row).collect()
    }
}
