//! # relay
//!
//! Relay server binary: settings, telemetry, then the HTTP/WebSocket server
//! until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_settings::RelaySettings;
use relay_telemetry::{init_telemetry, TelemetryConfig};

/// Real-time message relay over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "relay", version)]
struct Cli {
    /// Settings file (defaults to ~/.relay/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen host.
    #[arg(long)]
    host: Option<String>,

    /// Listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Default log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<RelaySettings> {
        let path = self.config.clone().unwrap_or_else(relay_settings::settings_path);
        let mut settings = relay_settings::load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings.validate().context("invalid command-line override")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    let telemetry = init_telemetry(TelemetryConfig::from_settings(&settings));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay");

    let server = relay_server::start(&settings, telemetry.prometheus().cloned())
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %server.local_addr(), "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    server.shutdown().await;
    Ok(())
}
