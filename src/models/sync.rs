use crate::models::{BoardSnapshot, FileBlob, ViewState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Request body for `PUT /v1/boards/{id}/elements`.
///
/// `version` is the version the client last observed; the write is accepted
/// only if it still matches the stored version.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveElementsRequest {
    #[schema(value_type = Vec<Object>)]
    pub elements: Vec<serde_json::Value>,
    pub view_state: ViewState,
    #[serde(default)]
    pub files: BTreeMap<String, FileBlob>,
    pub version: u64,
}

impl SaveElementsRequest {
    pub fn into_snapshot(self) -> (BoardSnapshot, u64) {
        let version = self.version;
        (
            BoardSnapshot {
                elements: self.elements,
                view_state: self.view_state,
                files: self.files,
            },
            version,
        )
    }
}

/// Response body for an accepted write.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveElementsResponse {
    #[schema(value_type = Vec<Object>)]
    pub elements: Vec<serde_json::Value>,
    pub view_state: ViewState,
    pub version: u64,
}

/// Response body for a rejected (stale) write: the full authoritative
/// snapshot, never a diff. The losing client adopts it unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResponse {
    #[schema(value_type = Vec<Object>)]
    pub current_elements: Vec<serde_json::Value>,
    pub current_view_state: ViewState,
    pub current_files: BTreeMap<String, FileBlob>,
    pub current_version: u64,
}

/// Response body for `GET /v1/boards/{id}` (the resync path).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoardResponse {
    pub id: uuid::Uuid,
    #[schema(value_type = Vec<Object>)]
    pub elements: Vec<serde_json::Value>,
    pub view_state: ViewState,
    pub files: BTreeMap<String, FileBlob>,
    pub version: u64,
    pub last_modified_by: String,
}

impl BoardResponse {
    pub fn from_record(record: crate::models::BoardRecord) -> Self {
        Self {
            id: record.id,
            elements: record.snapshot.elements,
            view_state: record.snapshot.view_state,
            files: record.snapshot.files,
            version: record.version,
            last_modified_by: record.last_modified_by,
        }
    }

    pub fn into_snapshot(self) -> (BoardSnapshot, u64) {
        let version = self.version;
        (
            BoardSnapshot {
                elements: self.elements,
                view_state: self.view_state,
                files: self.files,
            },
            version,
        )
    }
}
