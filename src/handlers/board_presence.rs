use crate::models::PresenceResponse;
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// List the live collaborators on a board.
pub async fn board_presence(
    State(state): State<Arc<AppState>>,
    Path(board_id): Path<Uuid>,
) -> Json<PresenceResponse> {
    let members = state.presence.members(board_id).await;
    Json(PresenceResponse { members })
}
