use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging with human-readable output format.
///
/// Uses the `RUST_LOG` environment variable if set, otherwise falls back
/// to `default_level` (e.g. "info", "debug", "fleet_agents=debug,warn").
///
/// Safe to call multiple times (e.g. in tests) -- subsequent calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (human-readable)");
}

/// Initialize logging with JSON output format on stdout.
///
/// Safe to call multiple times -- subsequent calls are no-ops.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    fmt()
        .json()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}

/// Human-readable stdout plus an append-only JSON-lines file sink.
///
/// Each line in the sink carries `timestamp`, `level`, `target` (the emitting
/// component) and the event fields including `message`. Returns an error only
/// when the sink cannot be opened; a second initialisation is a no-op.
pub fn init_logging_with_sink(
    service_name: &str,
    default_level: &str,
    sink: &Path,
) -> io::Result<()> {
    if let Some(parent) = sink.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(sink)?;

    let stdout_layer = fmt::layer().with_target(true).with_level(true);
    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    tracing::info!(service = service_name, sink = %sink.display(), "logging initialised (stdout + json sink)");
    Ok(())
}
