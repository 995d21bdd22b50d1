//! Live agent sessions
//!
//! Each transport moves through `Unregistered → Registered → Closed`.
//! The [`SessionManager`] owns every live session together with the
//! device registry and keeps the two consistent.

pub mod manager;
pub mod protocol;
pub mod sweeper;
pub mod transport;

pub use manager::{ConnectionId, SessionEvent, SessionManager, SessionState};
pub use protocol::{AgentMessage, DisconnectReason, RegisterPayload};
pub use sweeper::{HeartbeatConfig, SweepReport};
pub use transport::{ChannelTransport, Outbound, Transport};
