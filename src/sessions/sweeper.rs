//! Periodic liveness sweep
//!
//! Sessions whose transport vanished without a close (network partition,
//! killed process) are only ever reclaimed here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SessionManager;
use crate::{Error, Result};

/// Default probe interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(35);

/// Timeout as a multiple of the probe interval
pub const TIMEOUT_RATIO: u32 = 2;

/// Probe interval and liveness timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatConfig {
    /// Create a heartbeat configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the interval is zero or the timeout is
    /// not strictly greater than the interval
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("heartbeat interval must be positive".to_string()));
        }
        if timeout <= interval {
            return Err(Error::Config(format!(
                "heartbeat timeout ({}s) must exceed the interval ({}s)",
                timeout.as_secs_f64(),
                interval.as_secs_f64()
            )));
        }
        Ok(Self { interval, timeout })
    }

    /// Configuration with the default timeout ratio for an interval
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the interval is zero
    pub fn with_interval(interval: Duration) -> Result<Self> {
        Self::new(interval, interval * TIMEOUT_RATIO)
    }

    /// How often sessions are probed
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// How long a session may stay silent
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: DEFAULT_HEARTBEAT_INTERVAL * TIMEOUT_RATIO,
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions that were sent a probe
    pub probed: usize,
    /// Sessions terminated for silence
    pub timed_out: usize,
    /// Sessions dropped because the probe could not be sent
    pub failed: usize,
}

/// Run the sweep on the manager's heartbeat interval until aborted
#[must_use]
pub fn spawn(sessions: Arc<SessionManager>) -> JoinHandle<()> {
    let period = sessions.heartbeat().interval();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let report = sessions.sweep().await;
            if report.timed_out > 0 || report.failed > 0 {
                tracing::info!(
                    probed = report.probed,
                    timed_out = report.timed_out,
                    failed = report.failed,
                    "liveness sweep reclaimed sessions"
                );
            } else {
                tracing::trace!(probed = report.probed, "liveness sweep");
            }
        }
    })
}
