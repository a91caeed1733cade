use crate::handlers::{
    board_latest, board_presence, board_save, diagnostics, health_check, ready_check,
};
use crate::routes::auth_middleware::auth_middleware;
use crate::ws::channel::board_channel;
use crate::AppState;
use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/v1/boards/:board_id/elements", put(board_save))
        .route("/v1/boards/:board_id", get(board_latest))
        .route("/v1/boards/:board_id/presence", get(board_presence))
        .route("/v1/boards/:board_id/channel", get(board_channel))
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn(auth_middleware)) // Applies to all routes added above
        .route("/v1/health", get(health_check))
        .route("/v1/ready", get(ready_check))
        .with_state(state)
}
