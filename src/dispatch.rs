//! Directive dispatch to connected devices

use std::sync::Arc;

use serde::Serialize;

use crate::sessions::SessionManager;

/// Prefix marking a directive frame on the wire
pub const DIRECTIVE_PREFIX: &str = "directive:";

/// One-shot instruction for a device
///
/// The payload is opaque to the gateway; agents decide what it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive(String);

impl Directive {
    /// Wrap a payload
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// The payload as given
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.0
    }

    /// Frame written to the agent: `directive:<payload>`
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{DIRECTIVE_PREFIX}{}", self.0)
    }
}

/// Result of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub delivered: bool,
}

/// Pushes directives to devices with a live session
#[derive(Debug, Clone)]
pub struct DirectiveDispatcher {
    sessions: Arc<SessionManager>,
}

impl DirectiveDispatcher {
    /// Create a dispatcher over the given session manager
    #[must_use]
    pub const fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Send a directive to a device
    ///
    /// An offline or unwritable device is a normal outcome, reported as
    /// `delivered: false`.
    pub async fn dispatch(&self, identity: &str, directive: &Directive) -> DispatchOutcome {
        let delivered = self.sessions.deliver(identity, directive.to_wire()).await;

        if delivered {
            tracing::info!(identity, "directive sent");
        } else {
            tracing::warn!(identity, "directive not delivered, device not connected");
        }

        DispatchOutcome { delivered }
    }
}
