use std::path::Path;

use anyhow::Context;
use fleet_core::config::Config;
use serde_json::Value;

use super::{api_client, api_error_message, friendly_error};

/// Print the configuration snapshot currently in effect.
pub async fn get(api_url: &str) -> anyhow::Result<()> {
    let resp = api_client()
        .get(format!("{api_url}/api/config"))
        .send()
        .await
        .map_err(friendly_error)?;

    if !resp.status().is_success() {
        anyhow::bail!("Failed to fetch config (HTTP {})", resp.status());
    }
    let snapshot: Value = resp.json().await.map_err(friendly_error)?;
    println!(
        "# version {} loaded at {}",
        snapshot["version"].as_u64().unwrap_or(0),
        snapshot["loaded_at"].as_str().unwrap_or("unknown")
    );
    println!("{}", serde_json::to_string_pretty(&snapshot["config"])?);
    Ok(())
}

/// Read and check a config file locally, returning the document to send.
pub fn read_document(file: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let doc: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    Config::from_value(doc.clone())
        .with_context(|| format!("{} is not a valid configuration", file.display()))?;
    Ok(doc)
}

/// Replace the running configuration with the contents of `file`.
///
/// The document is validated locally first; the daemon validates it again
/// and keeps its current config if it disagrees.
pub async fn put(api_url: &str, file: &Path) -> anyhow::Result<()> {
    let doc = read_document(file)?;
    let resp = api_client()
        .put(format!("{api_url}/api/config"))
        .json(&doc)
        .send()
        .await
        .map_err(friendly_error)?;

    let status = resp.status();
    let body: Value = resp.json().await.map_err(friendly_error)?;
    if status.is_success() {
        let version = body["version"].as_u64().unwrap_or(0);
        println!("Configuration replaced (version {version})");
        Ok(())
    } else {
        anyhow::bail!("Config rejected: {} (HTTP {status})", api_error_message(&body));
    }
}
