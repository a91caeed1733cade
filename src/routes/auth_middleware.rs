use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::{debug, error};

use crate::config;
use crate::services::auth_service::{get_auth_token, resolve_identity};

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate the token against the configured secret
    let config = config::get_config();
    let secret = match &config.auth_jwt_secret {
        Some(secret) => secret,
        None => {
            error!("Auth JWT secret not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // 3. Resolve the identity carried by the token
    let identity = match resolve_identity(&token, secret) {
        Ok(identity) => identity,
        Err(e) => {
            error!("Token validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };
    debug!("Request authenticated for user {}", identity.user_id);

    // 4. Make the identity available to downstream handlers
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
