//! API key authentication middleware

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use super::ApiState;

/// Extract API key from Authorization header
fn extract_api_key(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware guarding the control API
pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // No key configured: the control API is open
    let Some(expected_key) = &state.api_key else {
        tracing::debug!(path = %req.uri().path(), "control API key not configured");
        return Ok(next.run(req).await);
    };

    match extract_api_key(&req) {
        Some(key) if key == expected_key => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::debug!(path = %req.uri().path(), "no API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
