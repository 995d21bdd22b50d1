//! Shared test utilities

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_gateway::alerts::AlertSink;
use fleet_gateway::devices::{DeviceRegistry, MemoryStore};
use fleet_gateway::sessions::{
    ChannelTransport, ConnectionId, HeartbeatConfig, Outbound, SessionEvent, SessionManager,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Alert sink that remembers every alert
#[derive(Debug, Default)]
pub struct RecordingSink(Mutex<Vec<String>>);

impl RecordingSink {
    /// Alerts received so far
    pub fn alerts(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn notify(&self, text: String) {
        self.0.lock().unwrap().push(text);
    }
}

/// Session manager wired to in-memory collaborators
pub struct Harness {
    pub sessions: Arc<SessionManager>,
    pub store: Arc<MemoryStore>,
    pub alerts: Arc<RecordingSink>,
}

/// Short heartbeat used across tests: probe every 10s, timeout after 20s
#[must_use]
pub fn test_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(20)).unwrap()
}

/// Harness over an empty registry
#[must_use]
pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let alerts = Arc::new(RecordingSink::default());
    let sessions = Arc::new(SessionManager::new(
        DeviceRegistry::new(),
        store.clone(),
        alerts.clone(),
        test_heartbeat(),
    ));
    Harness {
        sessions,
        store,
        alerts,
    }
}

/// Harness that loads its registry from an existing store
pub async fn harness_from(store: Arc<MemoryStore>) -> Harness {
    let alerts = Arc::new(RecordingSink::default());
    let sessions = Arc::new(
        SessionManager::bootstrap(store.clone(), alerts.clone(), test_heartbeat()).await,
    );
    Harness {
        sessions,
        store,
        alerts,
    }
}

/// Open a channel-backed connection
pub async fn connect(
    sessions: &SessionManager,
) -> (ConnectionId, Arc<ChannelTransport>, UnboundedReceiver<Outbound>) {
    let (transport, rx) = ChannelTransport::new();
    let conn = sessions
        .connect(transport.clone(), Some("127.0.0.1:40000".to_string()))
        .await;
    (conn, transport, rx)
}

/// Registration frame for an identity
#[must_use]
pub fn register(username: &str) -> SessionEvent {
    SessionEvent::Text(
        serde_json::json!({
            "type": "register",
            "username": username,
            "uuid": format!("machine-{username}"),
            "starttime": 1_700_000_000_000_i64,
        })
        .to_string(),
    )
}

/// Heartbeat frame
#[must_use]
pub fn ping(username: &str) -> SessionEvent {
    SessionEvent::Text(serde_json::json!({ "type": "ping", "username": username }).to_string())
}

/// Everything queued on a connection so far
pub fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
