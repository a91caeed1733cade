use crate::models::{BoardResponse, ErrorResponse};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Fetch the authoritative snapshot of a board.
///
/// This is the resync path: a client whose channel subscription dropped
/// calls it once on reconnect to correct any missed broadcasts before
/// resuming live updates.
pub async fn board_latest(
    State(state): State<Arc<AppState>>,
    Path(board_id): Path<Uuid>,
) -> Result<(StatusCode, Json<BoardResponse>), (StatusCode, Json<ErrorResponse>)> {
    let record = match state.store.load(board_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            info!("Board '{}' not found", board_id);
            let status = StatusCode::NOT_FOUND;
            return Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: format!("Board '{}' not found", board_id),
                }),
            ));
        }
        Err(e) => {
            error!("Error loading board '{}': {}", board_id, e);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            return Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: format!("Error loading board '{}'", board_id),
                }),
            ));
        }
    };

    Ok((StatusCode::OK, Json(BoardResponse::from_record(record))))
}
