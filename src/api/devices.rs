//! Device control API
//!
//! REST endpoints for listing known devices and pushing directives to
//! connected ones.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use super::auth::require_api_key;
use super::health::DeviceCounts;
use crate::devices::{DeviceIdentity, DeviceRecord};
use crate::dispatch::{Directive, DispatchOutcome};

/// REST response for one device
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub identity: DeviceIdentity,
    #[serde(flatten)]
    pub record: DeviceRecord,
}

/// REST request for a directive
#[derive(Debug, Deserialize)]
pub struct DirectiveBody {
    pub payload: String,
}

/// Build device routes
#[must_use]
pub fn router<S: Clone + Send + Sync + 'static>(state: Arc<ApiState>) -> Router<S> {
    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/devices/active", get(list_active))
        .route("/api/devices/summary", get(summary))
        .route("/api/devices/{identity}", get(get_device))
        .route("/api/devices/{identity}/directive", post(send_directive))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .with_state(state)
}

/// List every known device
async fn list_devices(State(state): State<Arc<ApiState>>) -> Json<Vec<DeviceResponse>> {
    let devices = state
        .sessions
        .devices()
        .await
        .into_iter()
        .map(|(identity, record)| DeviceResponse { identity, record })
        .collect();
    Json(devices)
}

/// List identities with a live session
async fn list_active(State(state): State<Arc<ApiState>>) -> Json<Vec<DeviceIdentity>> {
    Json(state.sessions.list_active().await)
}

/// Known and active counts
async fn summary(State(state): State<Arc<ApiState>>) -> Json<DeviceCounts> {
    let (total, active) = state.sessions.counts().await;
    Json(DeviceCounts { total, active })
}

/// Get a specific device
async fn get_device(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<Json<DeviceResponse>, StatusCode> {
    let record = state
        .sessions
        .device(&identity)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    let identity = DeviceIdentity::parse(&identity).map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(DeviceResponse { identity, record }))
}

/// Push a directive to a connected device
async fn send_directive(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
    Json(body): Json<DirectiveBody>,
) -> Json<DispatchOutcome> {
    let directive = Directive::new(body.payload);
    Json(state.dispatcher.dispatch(&identity, &directive).await)
}
