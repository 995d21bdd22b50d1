//! Daemon - the main gateway service
//!
//! Wires the registry store, alert sinks, session manager, liveness sweep
//! and API server together, and tears them down on Ctrl-C.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::{ApiServer, ApiState};
use crate::devices::JsonFileStore;
use crate::sessions::{SessionManager, sweeper};
use crate::{Config, Result, alerts};

/// The fleet daemon
#[derive(Debug)]
pub struct Daemon {
    sessions: Arc<SessionManager>,
    server: ApiServer,
}

impl Daemon {
    /// Load the registry and bind the listener
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(JsonFileStore::new(&config.registry_path));
        let alerts = alerts::from_config(&config.alerts);
        let sessions = Arc::new(SessionManager::bootstrap(store, alerts, config.heartbeat).await);

        let state = ApiState::new(sessions.clone(), config.server.api_key.clone());
        let server = ApiServer::bind(&config.server.addr(), state).await?;

        Ok(Self { sessions, server })
    }

    /// Address the API server is bound to
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Shared session manager
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves, then close every session
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (total, active) = self.sessions.counts().await;
        tracing::info!(
            devices = total,
            active,
            store = %self.sessions.store_location(),
            heartbeat_secs = self.sessions.heartbeat().interval().as_secs(),
            "fleet gateway starting"
        );

        let sweep = sweeper::spawn(self.sessions.clone());

        // Close sessions before waiting on connections, or open sockets
        // would hold graceful shutdown forever
        let sessions = self.sessions.clone();
        let signal = async move {
            shutdown.await;
            tracing::info!("shutdown requested");
            sessions.shutdown().await;
        };

        let result = self.server.run(signal).await;
        sweep.abort();

        tracing::info!("fleet gateway stopped");
        result
    }
}
