//! # relay
//!
//! Relay server binary: loads settings, installs logging and metrics,
//! registers the demo procedures and serves until ctrl-c.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging::{LogFormat, init_subscriber};
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RelaySettings;
use relay_settings::loader::{load_settings_from_path, settings_path};
use tracing::{info, warn};

/// Real-time delivery server.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Atoms and event streams over SSE")]
struct Cli {
    /// Settings file (defaults to `$RELAY_SETTINGS` or `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: `compact` or `json` (overrides settings).
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    /// Flags win over file and environment.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            settings.logging.format.clone_from(format);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    init_subscriber(
        &settings.logging.level,
        LogFormat::parse(&settings.logging.format),
    );
    let _ = relay_settings::init_settings(settings.clone());

    let metrics =
        relay_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let config = ServerConfig::from(&settings);
    let shutdown_timeout = config.shutdown_timeout;
    let demo = demo::Demo::new();
    let server = RelayServer::new(config, demo.registry()).with_metrics(metrics);
    let clock = demo.spawn_clock(server.shutdown().serve_token());

    let (addr, handle) = server.listen().await.context("Failed to bind")?;
    info!(%addr, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    if !server.shutdown().drain(vec![handle, clock], shutdown_timeout).await {
        warn!("exiting with sessions still open");
    }
    Ok(())
}
