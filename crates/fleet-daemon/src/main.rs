//! fleetd: runs the supervised worker fleet and its control API.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use fleet_core::config_store::{ConfigSource, ConfigStore};
use fleet_daemon::daemon::{exit_status, terminate_signal, Daemon};
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "fleetd", version, about = "Supervised worker fleet daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config/system_parameters.json")]
    config: PathBuf,

    /// Override `daemon.host`.
    #[arg(long)]
    host: Option<String>,

    /// Override `daemon.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines on stdout.
    #[arg(long)]
    json_logs: bool,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let source = ConfigSource::file(&args.config);
    let mut config = ConfigStore::load(&source)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(host) = args.host {
        config.daemon.host = host;
    }
    if let Some(port) = args.port {
        config.daemon.port = port;
    }

    match (&config.daemon.log_file, args.json_logs) {
        (Some(sink), _) => {
            fleet_telemetry::logging::init_logging_with_sink("fleetd", "info", Path::new(sink))
                .with_context(|| format!("failed to open log sink {sink}"))?;
        }
        (None, true) => fleet_telemetry::logging::init_logging_json("fleetd", "info"),
        (None, false) => fleet_telemetry::logging::init_logging("fleetd", "info"),
    }

    info!(config = %args.config.display(), version = env!("CARGO_PKG_VERSION"), "fleet daemon starting");

    let store = ConfigStore::new(config).context("invalid configuration")?;
    let mut daemon = Daemon::new(store, Some(source))?;
    daemon.set_watch_config(!args.no_watch);

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        match terminate_signal().await {
            Ok(signal) => {
                info!(signal, "terminate signal received, initiating shutdown");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for terminate signals"),
        }
    });

    let report = daemon.run().await?;
    Ok(ExitCode::from(exit_status(&report)))
}
