use std::fmt::Write;

use serde_json::Value;
use tracing::debug;

use super::{api_client, friendly_error};

/// Format a `/api/status` body as a worker table.
pub fn render(status: &Value) -> String {
    let version = status["version"].as_str().unwrap_or("unknown");
    let uptime = status["uptime_seconds"].as_u64().unwrap_or(0);
    let config_version = status["config_version"].as_u64().unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(out, "fleet status  (v{version})");
    let _ = writeln!(out, "{}", "-".repeat(72));
    let _ = writeln!(out, "Uptime:          {uptime}s");
    let _ = writeln!(out, "Config version:  {config_version}");

    let bus = &status["bus"];
    let _ = writeln!(
        out,
        "Bus:             {} topics, {} subscribers, {} published, {} dropped",
        bus["topics"].as_u64().unwrap_or(0),
        bus["subscribers"].as_u64().unwrap_or(0),
        bus["published"].as_u64().unwrap_or(0),
        bus["dropped"].as_u64().unwrap_or(0),
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<24} {:<10} {:>7} {:>9} {:>8}  LAST ERROR",
        "WORKER", "STATE", "TICKS", "RESTARTS", "FAILURES"
    );

    let workers = status["workers"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    for w in workers {
        let _ = writeln!(
            out,
            "{:<24} {:<10} {:>7} {:>9} {:>8}  {}",
            w["name"].as_str().unwrap_or("?"),
            w["state"].as_str().unwrap_or("?"),
            w["ticks"].as_u64().unwrap_or(0),
            w["restarts"].as_u64().unwrap_or(0),
            w["consecutive_failures"].as_u64().unwrap_or(0),
            w["last_error"].as_str().unwrap_or("-"),
        );
    }
    if workers.is_empty() {
        let _ = writeln!(out, "(no workers registered)");
    }
    out
}

/// Run the `status` subcommand: call the API and pretty-print worker states.
pub async fn run(api_url: &str) -> anyhow::Result<()> {
    let url = format!("{api_url}/api/status");
    debug!(%url, "fetching status");
    let resp = api_client().get(&url).send().await.map_err(friendly_error)?;

    if !resp.status().is_success() {
        anyhow::bail!("Failed to fetch status (HTTP {})", resp.status());
    }
    let status: Value = resp.json().await.map_err(friendly_error)?;
    print!("{}", render(&status));
    Ok(())
}
