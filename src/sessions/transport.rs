//! Transport handles seen by the session manager
//!
//! The manager never touches a socket directly. It talks to a
//! [`Transport`], and the connection task pumps whatever the transport
//! queues onto the wire.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::{Error, Result};

/// WebSocket close code for policy violations
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code for a server going away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Frame queued for a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame
    Text(String),
    /// Liveness probe (protocol ping)
    Probe,
    /// Close handshake with a code and reason
    Close { code: u16, reason: String },
    /// Drop the connection without a handshake
    Terminate,
}

/// Write side of a live connection
pub trait Transport: Send + Sync + fmt::Debug {
    /// Whether frames can still be written
    fn is_open(&self) -> bool;

    /// Queue a text frame
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the connection is closed
    fn send_text(&self, text: String) -> Result<()>;

    /// Queue a liveness probe
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the connection is closed
    fn send_probe(&self) -> Result<()>;

    /// Start a close handshake; no-op once closed
    fn close(&self, code: u16, reason: &str);

    /// Drop the connection; no-op once closed
    fn terminate(&self);
}

/// Transport backed by an unbounded channel to the connection task
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
}

impl ChannelTransport {
    /// Create a transport and the receiver its connection task drains
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            open: AtomicBool::new(true),
        });
        (transport, rx)
    }

    fn queue(&self, frame: Outbound) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Transport("connection closed".to_string()));
        }
        self.tx.send(frame).map_err(|_| {
            self.open.store(false, Ordering::SeqCst);
            Error::Transport("connection task gone".to_string())
        })
    }
}

impl Transport for ChannelTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn send_text(&self, text: String) -> Result<()> {
        self.queue(Outbound::Text(text))
    }

    fn send_probe(&self) -> Result<()> {
        self.queue(Outbound::Probe)
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn terminate(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Terminate);
        }
    }
}
