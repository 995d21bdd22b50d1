//! TOML configuration file loading
//!
//! Supports `~/.config/fleet-gateway/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top
//! of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FleetConfigFile {
    /// Server/listener configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Registry persistence configuration
    #[serde(default)]
    pub registry: RegistryFileConfig,

    /// Liveness configuration
    #[serde(default)]
    pub heartbeat: HeartbeatFileConfig,

    /// Operator alert delivery
    #[serde(default)]
    pub alerts: AlertsFileConfig,
}

/// Server/listener configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port to listen on
    pub port: Option<u16>,

    /// Address to bind (e.g. "0.0.0.0")
    pub bind: Option<String>,
}

/// Registry persistence configuration
#[derive(Debug, Default, Deserialize)]
pub struct RegistryFileConfig {
    /// Path of the registry snapshot file
    pub path: Option<String>,
}

/// Liveness configuration
#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatFileConfig {
    /// Seconds between liveness probes
    pub interval_secs: Option<u64>,

    /// Seconds of silence before a session is terminated
    pub timeout_secs: Option<u64>,
}

/// Operator alert delivery
#[derive(Debug, Default, Deserialize)]
pub struct AlertsFileConfig {
    /// Incoming-webhook URL
    pub webhook_url: Option<String>,

    /// Telegram bot token
    pub telegram_token: Option<String>,

    /// Telegram chat to notify
    pub telegram_chat_id: Option<i64>,
}

/// Load the TOML config file from an explicit path or the standard one
///
/// Returns `FleetConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(explicit: Option<&Path>) -> FleetConfigFile {
    let Some(path) = explicit.map(Path::to_path_buf).or_else(config_file_path) else {
        return FleetConfigFile::default();
    };

    if !path.exists() {
        if explicit.is_some() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
        }
        return FleetConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content, &path),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FleetConfigFile::default()
        }
    }
}

fn parse_config(content: &str, path: &Path) -> FleetConfigFile {
    match toml::from_str(content) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            FleetConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/fleet-gateway/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("fleet-gateway").join("config.toml"))
}
