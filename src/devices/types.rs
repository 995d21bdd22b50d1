//! Device registry types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DeviceIdentity;

/// External ID recorded when an agent does not send one
pub const UNKNOWN_EXTERNAL_ID: &str = "unknown";

/// Every known device, keyed by identity
///
/// Ordered so listings and snapshots are stable.
pub type DeviceMap = BTreeMap<DeviceIdentity, DeviceRecord>;

/// Persisted metadata for one known device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Opaque agent-supplied identifier
    #[serde(default = "default_external_id", alias = "uuid")]
    pub external_id: String,
    /// Agent-reported process start, as sent
    #[serde(default, alias = "starttime")]
    pub start_time: i64,
    /// First server-observed registration, epoch milliseconds
    #[serde(default)]
    pub first_seen: i64,
    /// Latest server-observed activity, epoch milliseconds
    #[serde(default)]
    pub last_seen: i64,
    /// Whether a live session is currently bound
    #[serde(default)]
    pub active: bool,
    /// Network origin of the most recent connection
    #[serde(default)]
    pub remote_address: Option<String>,
    /// Classification of the most recent termination
    #[serde(default, alias = "disconnectReason")]
    pub last_disconnect_reason: Option<String>,
}

fn default_external_id() -> String {
    UNKNOWN_EXTERNAL_ID.to_string()
}

/// Details supplied by an agent when it registers
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub external_id: Option<String>,
    pub start_time: Option<i64>,
    pub remote_address: Option<String>,
}

/// Current wall-clock time in epoch milliseconds
#[must_use]
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
