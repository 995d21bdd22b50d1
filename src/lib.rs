//! Fleet Gateway - registry and session server for remote agents
//!
//! This library provides the core functionality for the fleet gateway:
//! - Device registry with durable JSON snapshots
//! - Live agent sessions bound to unique identities
//! - Heartbeat-driven liveness sweep
//! - Directive dispatch and operator alerts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                        │
//! │   Agent WebSocket (/ws)  │  Control API  │  CLI     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Session Manager                      │
//! │   Connections  │  Bindings  │  Sweep  │  Dispatch   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Device Registry + Store                 │
//! │   Records  │  JSON snapshot  │  Alerts              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod daemon;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod sessions;

pub use config::Config;
pub use daemon::Daemon;
pub use devices::{DeviceIdentity, DeviceRecord, DeviceRegistry, JsonFileStore, RegistryStore};
pub use dispatch::{Directive, DirectiveDispatcher, DispatchOutcome};
pub use error::{Error, Result};
pub use sessions::{SessionEvent, SessionManager};
