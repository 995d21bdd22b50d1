//! HTTP API server for the fleet gateway
//!
//! Serves the agent WebSocket at `/ws`, the operator control API under
//! `/api/devices` and the health probes.

pub mod agents;
mod auth;
pub mod devices;
pub mod health;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::dispatch::DirectiveDispatcher;
use crate::sessions::SessionManager;
use crate::{Error, Result};

/// Shared state for API handlers
#[derive(Debug, Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionManager>,
    pub dispatcher: DirectiveDispatcher,
    /// Bearer key for the control API; `None` leaves it open
    pub api_key: Option<String>,
}

impl ApiState {
    /// Build handler state around a session manager
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>, api_key: Option<String>) -> Self {
        Self {
            dispatcher: DirectiveDispatcher::new(sessions.clone()),
            sessions,
            api_key,
        }
    }
}

/// Build the router with all routes
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    // CORS layer for cross-origin requests from operator dashboards
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(devices::router(state.clone()))
        .merge(agents::router(state.clone()))
        .merge(health::router())
        .merge(health::ready_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server bound to its listener
#[derive(Debug)]
pub struct ApiServer {
    state: Arc<ApiState>,
    listener: TcpListener,
}

impl ApiServer {
    /// Bind the listener
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the address cannot be bound
    pub async fn bind(addr: &str, state: ApiState) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        Ok(Self {
            state: Arc::new(state),
            listener,
        })
    }

    /// Address the listener is bound to
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "API server listening");

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
