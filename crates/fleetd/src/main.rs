//! fleetd: the fleet operator binary.
//!
//! Wires the operator config, the Docker adapters and the controllers:
//! - CPU autoscaling loop
//! - Zero-downtime rolling updates
//! - Fetch/build/push/deploy pipeline (repository, manifest, compose)
//! - Engine preflight checks
//!
//! # Usage
//!
//! ```text
//! fleetd check
//! fleetd autoscale --interval 30s
//! fleetd rolling api --image registry.local/api:1.5 --replicas 3 --wait
//! fleetd deploy repo https://git.local/org/shop.git --ref v2
//! fleetd deploy compose ./docker-compose.yml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleet_core::FleetConfig;

mod commands;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(
    name = "fleetd",
    about = "Fleet operator for Docker swarm services",
    version,
    propagate_version = true
)]
struct Cli {
    /// Operator config (default: $HOME/.fleet/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the engine is reachable and is a swarm manager.
    Check,

    /// Run the autoscaler over the rules in [[autoscale.rules]].
    Autoscale {
        /// Poll interval, e.g. `30s` (default: [autoscale].interval).
        #[arg(long)]
        interval: Option<String>,

        /// Evaluate every rule once and exit.
        #[arg(long)]
        once: bool,
    },

    /// Roll a service onto a new image, start-first.
    Rolling(commands::rolling::RollingArgs),

    /// Fetch, build, push and deploy services.
    Deploy {
        #[command(subcommand)]
        source: commands::deploy::DeploySource,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Check => commands::check::check(&config).await,
        Command::Autoscale { interval, once } => {
            commands::autoscale::autoscale(&config, interval.as_deref(), once, shutdown_signal())
                .await
        }
        Command::Rolling(args) => commands::rolling::rolling(&config, args).await,
        Command::Deploy { source } => {
            commands::deploy::deploy(&config, source, shutdown_signal()).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// An explicit `--config` must exist; a missing default file means defaults.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<FleetConfig> {
    let config = match path {
        Some(path) => FleetConfig::from_file(path)?,
        None => {
            let path = FleetConfig::default_path();
            if path.exists() {
                FleetConfig::from_file(&path)?
            } else {
                info!(path = %path.display(), "no config file, using defaults");
                FleetConfig::default()
            }
        }
    };
    Ok(config)
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "failed to install Ctrl-C handler");
                // Hold the sender so receivers do not read the drop as shutdown.
                tx.closed().await;
            }
        }
    });
    rx
}
