//! Configuration management for the fleet gateway
//!
//! Values are layered env > TOML file > defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sessions::HeartbeatConfig;
use crate::sessions::sweeper::{DEFAULT_HEARTBEAT_INTERVAL, TIMEOUT_RATIO};
use crate::{Error, Result};

/// Default listener port
pub const DEFAULT_PORT: u16 = 3010;

/// Default bind address
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Registry snapshot file name inside the data directory
pub const REGISTRY_FILE_NAME: &str = "devices.json";

/// Fleet gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket listener
    pub server: ServerConfig,

    /// Path to the registry snapshot file
    pub registry_path: PathBuf,

    /// Probe interval and liveness timeout
    pub heartbeat: HeartbeatConfig,

    /// Operator alert delivery
    pub alerts: AlertsConfig,
}

/// HTTP/WebSocket listener configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,

    /// Bearer key for the control API (from `FLEET_API_KEY` env)
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ServerConfig {
    /// `bind:port` listen address
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Operator alert delivery configuration
#[derive(Clone, Default)]
pub struct AlertsConfig {
    /// Incoming-webhook URL
    pub webhook_url: Option<String>,

    /// Telegram bot token
    pub telegram_token: Option<String>,

    /// Telegram chat to notify
    pub telegram_chat_id: Option<i64>,
}

impl std::fmt::Debug for AlertsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertsConfig")
            .field("webhook_url", &self.webhook_url)
            .field("telegram_token", &self.telegram_token.as_ref().map(|_| "<redacted>"))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .finish()
    }
}

/// Return the data directory: `~/.local/share/fleet-gateway` on Linux
#[must_use]
pub fn data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/fleet-gateway"),
        |d| d.data_dir().join("fleet-gateway"),
    )
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources(
        fc: file::FleetConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let port = match env("FLEET_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("FLEET_PORT is not a port: {raw}")))?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };

        let server = ServerConfig {
            bind: env("FLEET_BIND")
                .or(fc.server.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port,
            api_key: env("FLEET_API_KEY").filter(|key| !key.is_empty()),
        };

        let registry_path = env("FLEET_REGISTRY_PATH")
            .or(fc.registry.path)
            .map_or_else(|| data_dir().join(REGISTRY_FILE_NAME), PathBuf::from);

        let interval_secs = parse_secs(&env, "FLEET_HEARTBEAT_INTERVAL_SECS")?
            .or(fc.heartbeat.interval_secs);
        let timeout_secs =
            parse_secs(&env, "FLEET_HEARTBEAT_TIMEOUT_SECS")?.or(fc.heartbeat.timeout_secs);

        let interval = interval_secs.map_or(DEFAULT_HEARTBEAT_INTERVAL, Duration::from_secs);
        let timeout = timeout_secs.map_or(interval * TIMEOUT_RATIO, Duration::from_secs);
        let heartbeat = HeartbeatConfig::new(interval, timeout)?;

        let alerts = AlertsConfig {
            webhook_url: env("FLEET_ALERT_WEBHOOK_URL").or(fc.alerts.webhook_url),
            telegram_token: env("FLEET_TELEGRAM_TOKEN").or(fc.alerts.telegram_token),
            telegram_chat_id: match env("FLEET_TELEGRAM_CHAT_ID") {
                Some(raw) => Some(raw.parse().map_err(|_| {
                    Error::Config(format!("FLEET_TELEGRAM_CHAT_ID is not a chat id: {raw}"))
                })?),
                None => fc.alerts.telegram_chat_id,
            },
        };

        Ok(Self {
            server,
            registry_path,
            heartbeat,
            alerts,
        })
    }
}

fn parse_secs(env: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    env(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| Error::Config(format!("{key} is not a number of seconds: {value}")))
        })
        .transpose()
}
