use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_gateway::config::file::config_file_path;
use fleet_gateway::devices::{DeviceMap, JsonFileStore, RegistryStore};
use fleet_gateway::{Config, Daemon};

/// Fleet gateway - registry and session server for remote agents
#[derive(Parser)]
#[command(name = "fleetd", version, about)]
struct Cli {
    /// Port to listen on (overrides config and `FLEET_PORT`)
    #[arg(long)]
    port: Option<u16>,

    /// Path to the TOML config file
    #[arg(short, long, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// List devices from the persisted registry
    Devices {
        /// Only devices marked active in the last snapshot
        #[arg(long)]
        active: bool,
    },
    /// Print the resolved configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,fleet_gateway=info",
        1 => "info,fleet_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let daemon = Daemon::new(config).await?;
            daemon.run().await?;
        }
        Command::Devices { active } => list_devices(&config, active).await?,
        Command::CheckConfig => check_config(&config, cli.config.as_deref()),
    }

    Ok(())
}

async fn list_devices(config: &Config, active_only: bool) -> anyhow::Result<()> {
    let store = JsonFileStore::new(&config.registry_path);
    let devices: DeviceMap = store.load().await?;

    let rows: Vec<_> = devices
        .iter()
        .filter(|(_, record)| !active_only || record.active)
        .collect();

    if rows.is_empty() {
        println!("No devices in {}", store.describe());
        return Ok(());
    }

    println!(
        "{:<24} {:<8} {:<26} {:<24} {}",
        "IDENTITY", "ACTIVE", "LAST SEEN", "EXTERNAL ID", "LAST DISCONNECT"
    );
    for (identity, record) in &rows {
        let last_seen = chrono::DateTime::from_timestamp_millis(record.last_seen)
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        println!(
            "{:<24} {:<8} {:<26} {:<24} {}",
            identity.as_str(),
            if record.active { "yes" } else { "no" },
            last_seen,
            record.external_id,
            record.last_disconnect_reason.as_deref().unwrap_or("-"),
        );
    }

    let active = devices.values().filter(|r| r.active).count();
    println!();
    println!("Total: {}  Active: {active}", devices.len());
    Ok(())
}

fn check_config(config: &Config, explicit: Option<&std::path::Path>) {
    let source = explicit
        .map(std::path::Path::to_path_buf)
        .or_else(config_file_path)
        .filter(|p| p.exists())
        .map_or_else(|| "(none, defaults)".to_string(), |p| p.display().to_string());

    println!("Config file:  {source}");
    println!("Listen:       {}", config.server.addr());
    println!(
        "Control API:  {}",
        if config.server.api_key.is_some() { "API key required" } else { "open" }
    );
    println!("Registry:     {}", config.registry_path.display());
    println!(
        "Heartbeat:    every {}s, timeout {}s",
        config.heartbeat.interval().as_secs(),
        config.heartbeat.timeout().as_secs()
    );
    println!(
        "Alerts:       log{}{}",
        if config.alerts.webhook_url.is_some() { ", webhook" } else { "" },
        if config.alerts.telegram_token.is_some() && config.alerts.telegram_chat_id.is_some() {
            ", telegram"
        } else {
            ""
        }
    );
}
