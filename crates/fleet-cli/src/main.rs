mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// fleet CLI -- inspect and steer a running fleetd.
#[derive(Parser)]
#[command(name = "fleet", version, about)]
struct Cli {
    /// Base URL of the daemon's control API.
    #[arg(long, global = true, default_value = "http://127.0.0.1:5000")]
    api_url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show worker states (default when no subcommand is given).
    Status,

    /// Re-read the daemon's configuration file.
    Reload,

    /// Read or replace the running configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Restart a worker, resetting its restart counter.
    Restart {
        /// Worker name as shown by `fleet status`.
        worker: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration currently in effect.
    Get,
    /// Replace the configuration with the contents of a JSON file.
    Put {
        /// Path to the new configuration document.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    fleet_telemetry::logging::init_logging("fleet", "warn");

    let api_url = cli.api_url.trim_end_matches('/');
    match cli.command {
        None | Some(Commands::Status) => commands::status::run(api_url).await?,
        Some(Commands::Reload) => commands::reload::run(api_url).await?,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Get => commands::config::get(api_url).await?,
            ConfigAction::Put { file } => commands::config::put(api_url, &file).await?,
        },
        Some(Commands::Restart { worker }) => commands::restart::run(api_url, &worker).await?,
    }

    Ok(())
}
