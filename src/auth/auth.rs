use crate::models::ErrorResponse;
use crate::services::auth_service::UserIdentity;
use axum::{http::StatusCode, Json};

const ADMIN_ROLE: &str = "admin";

pub fn is_admin(identity: &UserIdentity) -> bool {
    identity.roles.iter().any(|r| r == ADMIN_ROLE)
}

pub fn ensure_admin(identity: &UserIdentity) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if is_admin(identity) {
        return Ok(());
    }

    let status = StatusCode::FORBIDDEN;
    Err((
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: "Admin access denied".to_string(),
        }),
    ))
}
