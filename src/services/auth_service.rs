use axum::http;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::sync::Cache;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

/// Identity attached to every authenticated request. Supplied by the
/// external identity provider through the JWT claims and trusted as given.
#[derive(Clone, Debug)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
    pub roles: Vec<String>,
}

/// Cache of decoded identities keyed by token, so the hot paths (every PUT
/// and channel upgrade) skip repeated JWT decoding.
static IDENTITY_CACHE: OnceLock<Cache<String, UserIdentity>> = OnceLock::new();

/// Initialize the identity cache.
/// Should be called once at startup.
pub fn init_identity_cache() {
    IDENTITY_CACHE.get_or_init(|| {
        Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build()
    });
    info!("Identity cache initialized");
}

fn get_identity_cache() -> &'static Cache<String, UserIdentity> {
    IDENTITY_CACHE.get_or_init(|| {
        Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build()
    })
}

/// Get the auth token from a request: Authorization header, then the
/// `auth_token` cookie, then a `token` query parameter (websocket clients
/// cannot set headers from a browser).
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string());
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = req.headers().get(http::header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;
        for cookie in cookie::Cookie::split_parse(cookie_str) {
            if let Ok(c) = cookie {
                if c.name() == "auth_token" {
                    return Ok(c.value().to_string());
                }
            }
        }
    }

    // 3. Try to get token from the query string
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("token=") {
                if !value.is_empty() {
                    return Ok(value.to_string());
                }
            }
        }
    }

    Err("Missing Authorization header, auth_token cookie or token query parameter".to_string())
}

/// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Resolve the identity carried by a token, decoding and caching on miss.
pub fn resolve_identity(token: &str, secret: &str) -> Result<UserIdentity, String> {
    let cache = get_identity_cache();
    if let Some(identity) = cache.get(token) {
        return Ok(identity);
    }

    let token_data =
        validate_jwt(token, secret).map_err(|e| format!("JWT validation failed: {}", e))?;

    let user_id = token_data
        .claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "JWT token does not contain 'sub' claim".to_string())?
        .to_string();

    let display_name = token_data
        .claims
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(&user_id)
        .to_string();

    let roles = match token_data.claims.get("roles").and_then(|v| v.as_array()) {
        Some(roles_array) => roles_array
            .iter()
            .filter_map(|r| r.as_str().map(|s| s.to_string()))
            .collect::<Vec<String>>(),
        None => Vec::new(),
    };

    let identity = UserIdentity {
        user_id,
        display_name,
        roles,
    };
    cache.insert(token.to_string(), identity.clone());
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn make_token(secret: &str) -> String {
        let claims = serde_json::json!({
            "sub": "u-42",
            "name": "Ada",
            "roles": ["admin"],
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn resolve_identity_reads_claims() {
        let token = make_token("sekrit");
        let identity = resolve_identity(&token, "sekrit").unwrap();
        assert_eq!(identity.user_id, "u-42");
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(identity.roles, vec!["admin".to_string()]);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = make_token("sekrit");
        assert!(resolve_identity(&token, "other").is_err());
    }

    #[test]
    fn token_from_query_parameter() {
        let req = http::Request::builder()
            .uri("/api/v1/boards/x/channel?token=abc123")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "abc123");
    }

    #[test]
    fn bearer_header_wins_over_query() {
        let req = http::Request::builder()
            .uri("/api/v1/boards/x/channel?token=abc123")
            .header(http::header::AUTHORIZATION, "Bearer header-token")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "header-token");
    }
}
