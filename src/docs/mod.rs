use crate::models::*;
use utoipa::OpenApi;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Fetch the authoritative snapshot of a board
#[utoipa::path(
    get,
    path = "/api/v1/boards/{board_id}",
    params(
        ("board_id" = uuid::Uuid, Path, description = "Board id")
    ),
    responses(
        (status = 200, description = "Authoritative board snapshot", body = BoardResponse),
        (status = 404, description = "Board not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn board_latest_doc() {}

/// Save board elements, gated on the client's known version
#[utoipa::path(
    put,
    path = "/api/v1/boards/{board_id}/elements",
    params(
        ("board_id" = uuid::Uuid, Path, description = "Board id")
    ),
    request_body = SaveElementsRequest,
    responses(
        (status = 200, description = "Write accepted", body = SaveElementsResponse),
        (status = 409, description = "Stale version; full authoritative snapshot returned", body = ConflictResponse),
        (status = 404, description = "Board not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn board_save_doc() {}

/// List the live collaborators on a board
#[utoipa::path(
    get,
    path = "/api/v1/boards/{board_id}/presence",
    params(
        ("board_id" = uuid::Uuid, Path, description = "Board id")
    ),
    responses(
        (status = 200, description = "Current member list", body = PresenceResponse)
    )
)]
#[allow(dead_code)]
pub async fn board_presence_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        board_latest_doc,
        board_save_doc,
        board_presence_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            BoardResponse,
            SaveElementsRequest,
            SaveElementsResponse,
            ConflictResponse,
            PresenceResponse,
            PresenceEntry,
            ViewState,
            FileBlob,
            BoardSnapshot,
            DiagnosticsResponse,
        )
    ),
    tags(
        (name = "boards", description = "Board synchronization endpoints")
    )
)]
pub struct ApiDoc;
