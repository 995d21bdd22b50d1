//! Health check endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
    pub devices: DeviceCounts,
    pub connections: usize,
}

/// Individual readiness checks
#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: CheckResult,
}

/// Known and active device counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCounts {
    pub total: usize,
    pub active: usize,
}

/// Result of a single health check
#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: Some(message.into()),
        }
    }
}

/// Liveness probe - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness probe - can the registry still be persisted?
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let store = match state.sessions.check_store().await {
        Ok(()) => CheckResult::ok(),
        Err(e) => CheckResult::fail(format!("{}: {e}", state.sessions.store_location())),
    };
    let (total, active) = state.sessions.counts().await;
    let connections = state.sessions.connection_count().await;

    let all_ok = store.status == "ok";
    let (status, http_status) = if all_ok {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        http_status,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks { store },
            devices: DeviceCounts { total, active },
            connections,
        }),
    )
}

/// Build health router (liveness only, no state needed)
#[must_use]
pub fn router<S: Clone + Send + Sync + 'static>() -> Router<S> {
    Router::new().route("/health", get(health))
}

/// Build readiness router (needs state for the store check)
#[must_use]
pub fn ready_router<S: Clone + Send + Sync + 'static>(state: Arc<ApiState>) -> Router<S> {
    Router::new().route("/ready", get(ready)).with_state(state)
}
