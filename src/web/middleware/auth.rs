//! # Authentication Middleware
//!
//! Bearer-token authentication for the protected endpoints. Applied to
//! everything except the health check; a no-op when disabled in
//! configuration.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::web::errors::ApiError;
use crate::web::state::AppState;

/// Authentication middleware for protected endpoints.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Skip auth if disabled in configuration
    if !state.config.auth.enabled {
        debug!("authentication disabled - allowing request");
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get("authorization")
        .ok_or(ApiError::Unauthorized)?;

    let auth_str = auth_header.to_str().map_err(|_| ApiError::Unauthorized)?;
    let token = extract_bearer_token(auth_str)?;

    if token != state.config.auth.token {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// Extract the Bearer token from an Authorization header value.
fn extract_bearer_token(auth_header: &str) -> Result<&str, ApiError> {
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    if token.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    Ok(token)
}
