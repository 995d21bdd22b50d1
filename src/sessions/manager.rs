//! Session manager: live connections bound to device identities
//!
//! One lock guards the connection table, the identity bindings and the
//! device registry together, so a binding and its record's `active` flag
//! always change in the same critical section. Snapshot writes happen
//! after the lock is released and are ordered by a generation counter.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::protocol::{AgentMessage, DisconnectReason, ErrorReply, RegisterPayload};
use super::sweeper::{HeartbeatConfig, SweepReport};
use super::transport::{CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION, Transport};
use crate::alerts::AlertSink;
use crate::devices::{
    DeviceIdentity, DeviceMap, DeviceRecord, DeviceRegistry, Registration, RegistryStore,
    epoch_millis, load_or_empty,
};
use crate::{Error, Result};

/// Disconnect detail recorded when a dead holder loses its identity
const SUPERSEDED: &str = "superseded";

/// Server-assigned handle for one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Protocol state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no identity bound yet
    Unregistered,
    /// Identity bound
    Registered,
    /// Gone from the table; terminal
    Closed,
}

/// Something that happened on a connection
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Text frame from the agent
    Text(String),
    /// Response to a liveness probe
    Pong,
    /// Transport closed
    Closed(DisconnectReason),
}

#[derive(Debug)]
struct Session {
    identity: Option<DeviceIdentity>,
    last_alive: Instant,
    remote_address: Option<String>,
    transport: Arc<dyn Transport>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    connections: HashMap<ConnectionId, Session>,
    bindings: HashMap<DeviceIdentity, ConnectionId>,
    devices: DeviceRegistry,
    generation: u64,
}

/// Snapshot waiting to be written
struct PendingWrite {
    generation: u64,
    snapshot: DeviceMap,
}

impl Inner {
    fn pending_write(&mut self) -> PendingWrite {
        self.generation += 1;
        PendingWrite {
            generation: self.generation,
            snapshot: self.devices.snapshot(),
        }
    }

    /// Remove a connection, releasing its identity if it still holds it
    ///
    /// Returns the identity marked offline, if any.
    fn disconnect(
        &mut self,
        conn: ConnectionId,
        reason: &DisconnectReason,
    ) -> Option<DeviceIdentity> {
        let session = self.connections.remove(&conn)?;
        session.transport.terminate();

        let identity = session.identity?;
        if self.bindings.get(&identity) != Some(&conn) {
            return None;
        }
        self.bindings.remove(&identity);
        self.devices
            .mark_offline(&identity, epoch_millis(), &reason.to_string());
        Some(identity)
    }

    /// Refuse a registration and close the connection
    ///
    /// A connection that already held an identity releases it; that
    /// identity is returned after being marked offline.
    fn reject(&mut self, conn: ConnectionId, error: &Error) -> Option<DeviceIdentity> {
        let session = self.connections.remove(&conn)?;
        let code = error.wire_code();
        if let Some(code) = code {
            let _ = session
                .transport
                .send_text(ErrorReply { error: code }.to_json());
        }
        session
            .transport
            .close(CLOSE_POLICY_VIOLATION, &error.to_string());

        let identity = session.identity?;
        if self.bindings.get(&identity) != Some(&conn) {
            return None;
        }
        self.bindings.remove(&identity);
        let reason = DisconnectReason::Error(code.unwrap_or("rejected").to_string());
        self.devices
            .mark_offline(&identity, epoch_millis(), &reason.to_string());
        Some(identity)
    }

    /// Drop a dead holder of `identity` so a new connection can take it
    fn evict(&mut self, holder: ConnectionId, identity: &DeviceIdentity) {
        if let Some(stale) = self.connections.remove(&holder) {
            stale.transport.terminate();
        }
        self.bindings.remove(identity);
        let reason = DisconnectReason::Error(SUPERSEDED.to_string());
        self.devices
            .mark_offline(identity, epoch_millis(), &reason.to_string());
    }
}

/// Owner of every live session and of the device registry
#[derive(Debug)]
pub struct SessionManager {
    inner: Mutex<Inner>,
    /// Generation of the newest snapshot on disk
    written: Mutex<u64>,
    store: Arc<dyn RegistryStore>,
    alerts: Arc<dyn AlertSink>,
    heartbeat: HeartbeatConfig,
}

impl SessionManager {
    /// Create a manager over an already-loaded registry
    #[must_use]
    pub fn new(
        devices: DeviceRegistry,
        store: Arc<dyn RegistryStore>,
        alerts: Arc<dyn AlertSink>,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                devices,
                ..Inner::default()
            }),
            written: Mutex::new(0),
            store,
            alerts,
            heartbeat,
        }
    }

    /// Load the registry from the store and create a manager over it
    ///
    /// Load failures fall back to an empty registry. Every loaded device
    /// starts inactive.
    pub async fn bootstrap(
        store: Arc<dyn RegistryStore>,
        alerts: Arc<dyn AlertSink>,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        let devices = DeviceRegistry::from_snapshot(load_or_empty(store.as_ref()).await);
        Self::new(devices, store, alerts, heartbeat)
    }

    /// Heartbeat settings in effect
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Track a newly opened transport
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        remote_address: Option<String>,
    ) -> ConnectionId {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let conn = ConnectionId(inner.next_id);
        inner.connections.insert(
            conn,
            Session {
                identity: None,
                last_alive: Instant::now(),
                remote_address: remote_address.clone(),
                transport,
            },
        );
        drop(inner);

        tracing::info!(%conn, remote = ?remote_address, "agent connected");
        conn
    }

    /// Drive a connection's state machine
    ///
    /// Events for connections no longer in the table are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentity` or `Error::IdentityInUse` when a
    /// registration is refused (the connection has already been closed),
    /// and `Error::MalformedMessage` for unparseable frames (the connection
    /// stays open)
    pub async fn handle(&self, conn: ConnectionId, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Text(text) => match AgentMessage::parse(&text) {
                Ok(AgentMessage::Register(payload)) => self.register(conn, payload).await,
                Ok(AgentMessage::Ping) => {
                    self.heartbeat_received(conn).await;
                    Ok(())
                }
                Ok(AgentMessage::Unknown(kind)) => {
                    tracing::debug!(%conn, kind = %kind, "ignoring unknown message type");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(%conn, error = %e, "ignoring malformed message");
                    Err(e)
                }
            },
            SessionEvent::Pong => {
                if let Some(session) = self.inner.lock().await.connections.get_mut(&conn) {
                    session.last_alive = Instant::now();
                }
                Ok(())
            }
            SessionEvent::Closed(reason) => {
                self.closed(conn, &reason).await;
                Ok(())
            }
        }
    }

    async fn register(&self, conn: ConnectionId, payload: RegisterPayload) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(session) = inner.connections.get(&conn) else {
            return Ok(());
        };
        let bound = session.identity.clone();
        let remote_address = session.remote_address.clone();

        let identity = match DeviceIdentity::parse(payload.username.as_deref().unwrap_or_default())
        {
            Ok(identity) => identity,
            Err(e) => {
                let released = inner.reject(conn, &e);
                let pending = released.as_ref().map(|_| inner.pending_write());
                drop(guard);
                tracing::warn!(%conn, error = %e, "registration rejected");
                if let Some(identity) = released {
                    tracing::info!(%conn, identity = %identity, "device disconnected after rejected registration");
                }
                if let Some(pending) = pending {
                    self.persist(pending).await;
                }
                return Err(e);
            }
        };

        if let Some(bound) = bound {
            if bound != identity {
                drop(guard);
                tracing::warn!(
                    %conn,
                    bound = %bound,
                    requested = %identity,
                    "connection already registered, ignoring new identity"
                );
                return Ok(());
            }
        }

        if let Some(holder) = inner.bindings.get(&identity).copied() {
            if holder != conn {
                let holder_alive = inner
                    .connections
                    .get(&holder)
                    .is_some_and(|s| s.transport.is_open());
                if holder_alive {
                    let err = Error::IdentityInUse(identity.to_string());
                    let released = inner.reject(conn, &err);
                    let pending = released.as_ref().map(|_| inner.pending_write());
                    drop(guard);
                    tracing::warn!(%conn, holder = %holder, identity = %identity, "registration rejected, identity in use");
                    if let Some(pending) = pending {
                        self.persist(pending).await;
                    }
                    return Err(err);
                }

                // Holder is dead but was never reclaimed; evict it
                inner.evict(holder, &identity);
                tracing::info!(
                    %conn,
                    stale = %holder,
                    identity = %identity,
                    reason = %DisconnectReason::Error(SUPERSEDED.to_string()),
                    "evicted stale session"
                );
            }
        }

        if let Some(session) = inner.connections.get_mut(&conn) {
            session.identity = Some(identity.clone());
            session.last_alive = Instant::now();
        }
        inner.bindings.insert(identity.clone(), conn);

        let registration = Registration {
            external_id: payload.uuid,
            start_time: payload.starttime,
            remote_address,
        };
        let (_, first_time) =
            inner
                .devices
                .upsert_on_register(&identity, registration, epoch_millis());
        let pending = inner.pending_write();
        drop(guard);

        if first_time {
            tracing::info!(%conn, identity = %identity, "new device registered");
            self.alerts
                .notify(format!("New device registered: {identity}"));
        } else {
            tracing::info!(%conn, identity = %identity, "device reconnected");
        }

        self.persist(pending).await;
        Ok(())
    }

    async fn heartbeat_received(&self, conn: ConnectionId) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(session) = inner.connections.get_mut(&conn) else {
            return;
        };
        let Some(identity) = &session.identity else {
            tracing::debug!(%conn, "ping before registration ignored");
            return;
        };
        session.last_alive = Instant::now();
        inner.devices.mark_heartbeat(identity, epoch_millis());
    }

    async fn closed(&self, conn: ConnectionId, reason: &DisconnectReason) {
        let mut inner = self.inner.lock().await;
        let registered = inner
            .connections
            .get(&conn)
            .map(|session| session.identity.is_some());
        let offline = inner.disconnect(conn, reason);
        let pending = offline.as_ref().map(|_| inner.pending_write());
        drop(inner);

        match (registered, offline) {
            (None, _) => return,
            (Some(_), Some(identity)) => {
                tracing::info!(%conn, identity = %identity, reason = %reason, "device disconnected");
            }
            (Some(true), None) => {
                tracing::debug!(%conn, reason = %reason, "superseded session closed");
            }
            (Some(false), None) => {
                tracing::info!(%conn, reason = %reason, "connection closed before registration");
            }
        }

        if let Some(pending) = pending {
            self.persist(pending).await;
        }
    }

    /// Probe live sessions and reclaim silent ones
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Sweep as if the current time were `now`
    ///
    /// Sessions silent for longer than the heartbeat timeout are terminated
    /// with `heartbeat_timeout`; the rest are sent a probe.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let timeout = self.heartbeat.timeout();
        let mut report = SweepReport::default();

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let mut expired = Vec::new();
        let mut failed = Vec::new();
        for (&conn, session) in &inner.connections {
            if now.saturating_duration_since(session.last_alive) > timeout {
                expired.push(conn);
            } else if let Err(e) = session.transport.send_probe() {
                failed.push((conn, e.to_string()));
            } else {
                report.probed += 1;
            }
        }

        let mut changed = false;
        for conn in expired {
            report.timed_out += 1;
            if let Some(identity) = inner.disconnect(conn, &DisconnectReason::HeartbeatTimeout) {
                tracing::info!(%conn, identity = %identity, "heartbeat timeout, session terminated");
                changed = true;
            } else {
                tracing::debug!(%conn, "unregistered connection timed out");
            }
        }
        for (conn, detail) in failed {
            report.failed += 1;
            if let Some(identity) = inner.disconnect(conn, &DisconnectReason::Error(detail)) {
                tracing::warn!(%conn, identity = %identity, "probe failed, session dropped");
                changed = true;
            }
        }

        let pending = changed.then(|| inner.pending_write());
        drop(guard);

        if let Some(pending) = pending {
            self.persist(pending).await;
        }
        report
    }

    /// Write a text frame to the session bound to `identity`
    ///
    /// Returns whether the frame was queued. A failed write is treated as a
    /// transport failure and ends the session.
    pub async fn deliver(&self, identity: &str, text: String) -> bool {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(conn) = inner.bindings.get(identity).copied() else {
            return false;
        };
        let Some(session) = inner.connections.get(&conn) else {
            return false;
        };
        if !session.transport.is_open() {
            return false;
        }

        match session.transport.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                let offline = inner.disconnect(conn, &DisconnectReason::Error(e.to_string()));
                let pending = offline.map(|_| inner.pending_write());
                drop(guard);
                tracing::warn!(%conn, identity, error = %e, "write failed, session dropped");
                if let Some(pending) = pending {
                    self.persist(pending).await;
                }
                false
            }
        }
    }

    /// Close every session, mark its device offline and write a final snapshot
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let conns: Vec<ConnectionId> = inner.connections.keys().copied().collect();
        for conn in &conns {
            if let Some(session) = inner.connections.get(conn) {
                session.transport.close(CLOSE_GOING_AWAY, "server shutting down");
            }
            inner.disconnect(*conn, &DisconnectReason::Shutdown);
        }
        let pending = inner.pending_write();
        drop(guard);

        tracing::info!(closed = conns.len(), "all sessions closed");
        self.persist(pending).await;
    }

    /// Protocol state of a connection
    pub async fn state(&self, conn: ConnectionId) -> SessionState {
        match self.inner.lock().await.connections.get(&conn) {
            Some(session) if session.identity.is_some() => SessionState::Registered,
            Some(_) => SessionState::Unregistered,
            None => SessionState::Closed,
        }
    }

    /// Identities of devices with a live session
    pub async fn list_active(&self) -> Vec<DeviceIdentity> {
        self.inner.lock().await.devices.list_active()
    }

    /// Identities currently bound to a connection, in identity order
    pub async fn bound_identities(&self) -> Vec<DeviceIdentity> {
        let inner = self.inner.lock().await;
        let mut identities: Vec<DeviceIdentity> = inner.bindings.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Total number of known devices
    pub async fn count(&self) -> usize {
        self.inner.lock().await.devices.count()
    }

    /// Known and active device counts, read together
    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.devices.count(), inner.devices.active_count())
    }

    /// Number of open connections, registered or not
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Record for one device
    pub async fn device(&self, identity: &str) -> Option<DeviceRecord> {
        self.inner.lock().await.devices.get(identity).cloned()
    }

    /// Every known device with its record
    pub async fn devices(&self) -> DeviceMap {
        self.inner.lock().await.devices.snapshot()
    }

    /// Location of the backing store, for diagnostics
    #[must_use]
    pub fn store_location(&self) -> String {
        self.store.describe()
    }

    /// Verify the backing store can still be read
    ///
    /// # Errors
    ///
    /// Returns the store's error if the snapshot cannot be loaded
    pub async fn check_store(&self) -> Result<()> {
        self.store.load().await.map(|_| ())
    }

    /// Write a snapshot unless a newer one is already on disk
    async fn persist(&self, pending: PendingWrite) {
        let mut written = self.written.lock().await;
        if pending.generation <= *written {
            return;
        }

        match self.store.save(&pending.snapshot).await {
            Ok(()) => *written = pending.generation,
            Err(e) => {
                tracing::warn!(
                    store = %self.store.describe(),
                    generation = pending.generation,
                    error = %e,
                    "failed to persist device registry"
                );
            }
        }
    }
}
