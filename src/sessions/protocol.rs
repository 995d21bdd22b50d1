//! Agent wire protocol
//!
//! Agents send JSON text frames tagged by `type`. The server answers only
//! with rejections (`{"error": ...}`) and directives (`directive:<payload>`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Registration payload sent by an agent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterPayload {
    /// Requested identity
    #[serde(default)]
    pub username: Option<String>,
    /// Opaque agent identifier
    #[serde(default)]
    pub uuid: Option<String>,
    /// Agent process start time
    #[serde(default)]
    pub starttime: Option<i64>,
}

/// Message received from an agent
#[derive(Debug, Clone)]
pub enum AgentMessage {
    /// Claim an identity
    Register(RegisterPayload),
    /// Heartbeat
    Ping,
    /// Well-formed message of a type this server does not handle
    Unknown(String),
}

impl AgentMessage {
    /// Parse a text frame
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedMessage` if the frame is not a JSON object
    /// with a string `type`, or a known type has invalid fields
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::MalformedMessage("missing message type".to_string()))?
            .to_string();

        match kind.as_str() {
            "register" => serde_json::from_value(value)
                .map(Self::Register)
                .map_err(|e| Error::MalformedMessage(format!("register: {e}"))),
            "ping" => Ok(Self::Ping),
            _ => Ok(Self::Unknown(kind)),
        }
    }
}

/// Rejection sent to an agent before its connection is closed
#[derive(Debug, Serialize)]
pub struct ErrorReply<'a> {
    pub error: &'a str,
}

impl ErrorReply<'_> {
    /// Encode as a JSON text frame
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No liveness signal within the timeout
    HeartbeatTimeout,
    /// Peer closed, with its close code if it sent one
    RemoteClose(Option<u16>),
    /// Transport failure
    Error(String),
    /// Server closed or dropped the connection
    ServerClose,
    /// Gateway shutting down
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartbeatTimeout => write!(f, "heartbeat_timeout"),
            // 1005: no status code present
            Self::RemoteClose(code) => write!(f, "remote_close:{}", code.unwrap_or(1005)),
            Self::Error(detail) => write!(f, "error:{detail}"),
            Self::ServerClose => write!(f, "server_close"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}
