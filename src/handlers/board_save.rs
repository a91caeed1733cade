use crate::models::{ConflictResponse, ErrorResponse, SaveElementsRequest, SaveElementsResponse};
use crate::services::auth_service::UserIdentity;
use crate::sync::guard::{ApplyOutcome, GuardError};
use crate::AppState;
use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// The writer's channel connection id, so the broadcast triggered by an
/// accepted write is not echoed back to it.
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

fn origin_connection(headers: &HeaderMap) -> Uuid {
    headers
        .get(CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::nil)
}

/// Save a board's elements, gated on the client's known version.
///
/// Returns 200 with the new version on acceptance, 409 with the full
/// authoritative snapshot on a stale base version, 404 when the board does
/// not exist and 500 when persistence fails (retryable, state unchanged).
pub async fn board_save(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<UserIdentity>,
    Path(board_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SaveElementsRequest>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let origin = origin_connection(&headers);
    let (proposed, known_version) = request.into_snapshot();

    // The accepted response echoes the persisted payload back to the writer,
    // which already holds it; answer from the proposal instead of re-reading
    // the store, which could have moved on by then.
    let response_elements = proposed.elements.clone();
    let response_view_state = proposed.view_state.clone();

    let outcome = state
        .guard
        .try_apply(board_id, proposed, known_version, &identity.user_id, origin)
        .await;

    match outcome {
        Ok(ApplyOutcome::Accepted { new_version }) => Ok((
            StatusCode::OK,
            Json(SaveElementsResponse {
                elements: response_elements,
                view_state: response_view_state,
                version: new_version,
            }),
        )
            .into_response()),
        Ok(ApplyOutcome::Conflict { current }) => {
            warn!(
                "Write conflict on board {} by {}: proposed from {}, current is {}",
                board_id, identity.user_id, known_version, current.version
            );
            Ok((
                StatusCode::CONFLICT,
                Json(ConflictResponse {
                    current_elements: current.snapshot.elements,
                    current_view_state: current.snapshot.view_state,
                    current_files: current.snapshot.files,
                    current_version: current.version,
                }),
            )
                .into_response())
        }
        Err(GuardError::NotFound) => {
            let status = StatusCode::NOT_FOUND;
            Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: format!("Board '{}' not found", board_id),
                }),
            ))
        }
        Err(GuardError::Store(e)) => {
            error!("Persistence error saving board '{}': {}", board_id, e);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: format!("Persistence error saving board '{}'", board_id),
                }),
            ))
        }
    }
}
