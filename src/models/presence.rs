use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A live collaborator on a board channel. Ephemeral: created on subscribe,
/// destroyed on disconnect, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub display_name: String,
    pub connection_id: uuid::Uuid,
}

/// Response body for `GET /v1/boards/{id}/presence`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub members: Vec<PresenceEntry>,
}
