use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Synchronized rendering preferences for a board.
///
/// Only preferences that are meaningful to every collaborator are carried
/// here. Camera state (zoom, scroll offset) is per-client and must never be
/// written into the shared document; see `agent::EditorViewState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub background_color: String,
    pub font_family: String,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            background_color: "#ffffff".to_string(),
            font_family: "sans-serif".to_string(),
        }
    }
}

/// An embedded binary payload (e.g. a pasted image), content-addressed by
/// its reference id in `BoardSnapshot::files`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileBlob {
    pub mime_type: String,
    #[serde_as(as = "Base64")]
    #[schema(value_type = String, format = Byte)]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The synchronized portion of a board document: the drawable elements
/// (opaque to the engine), the shared view state and the embedded files.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    /// Ordered drawable elements. Shape and content are owned by the
    /// drawing surface; the engine treats each element as an opaque value.
    #[schema(value_type = Vec<Object>)]
    pub elements: Vec<serde_json::Value>,
    pub view_state: ViewState,
    pub files: BTreeMap<String, FileBlob>,
}

/// An authoritative board record as held by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardRecord {
    pub id: uuid::Uuid,
    #[serde(flatten)]
    pub snapshot: BoardSnapshot,
    /// Monotonic, gapless version counter. Starts at 0; incremented by
    /// exactly 1 on every accepted write, only ever by the version guard.
    pub version: u64,
    /// Display-only; not part of the consistency protocol.
    pub last_modified_by: String,
    pub updated_at: DateTime<Utc>,
}

impl BoardRecord {
    pub fn new(id: uuid::Uuid, snapshot: BoardSnapshot, created_by: &str) -> Self {
        Self {
            id,
            snapshot,
            version: 0,
            last_modified_by: created_by.to_string(),
            updated_at: Utc::now(),
        }
    }
}
