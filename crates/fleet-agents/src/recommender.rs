use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_bridge::protocol::Payload;
use fleet_core::config::Config;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::worker::{TickContext, TickOutcome, Worker, WorkerFault};

// ---------------------------------------------------------------------------
// Generator seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),
    #[error("generation failed: {0}")]
    Failed(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Turns a prompt into a recommendation. May be slow and may fail.
#[async_trait]
pub trait RecommendationGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GenerationError>;
}

/// Prompt sent to the generator for the given configuration.
pub fn build_prompt(config: &Config) -> String {
    let params = serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Current parameters: {params}. Recommend optimizations for scheduling, resources, and error handling."
    )
}

// ---------------------------------------------------------------------------
// Recommender worker
// ---------------------------------------------------------------------------

/// Published on `recommender.topic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    pub model: String,
    pub config_version: u64,
    pub generated_at: DateTime<Utc>,
}

/// Asks the generator for a recommendation once per tick.
///
/// A generator error or a call slower than `recommender.timeout_secs` is a
/// soft failure. Stopping the worker abandons the in-flight call.
pub struct Recommender {
    generator: Arc<dyn RecommendationGenerator>,
}

impl Recommender {
    pub fn new(generator: Arc<dyn RecommendationGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Worker for Recommender {
    fn kind(&self) -> &'static str {
        "recommender"
    }

    async fn tick(&mut self, ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
        let settings = &ctx.config().recommender;
        let prompt = build_prompt(ctx.config());
        let limit = Duration::from_secs(settings.timeout_secs);

        let call = tokio::time::timeout(limit, self.generator.generate(&prompt, settings.max_tokens));
        let result = tokio::select! {
            res = call => res.unwrap_or(Err(GenerationError::Timeout(limit))),
            _ = ctx.cancel.cancelled() => {
                return Ok(TickOutcome::ok_with("cancelled while waiting for recommendation"));
            }
        };

        match result {
            Ok(text) => {
                let rec = Recommendation {
                    text,
                    model: settings.model.clone(),
                    config_version: ctx.snapshot.version,
                    generated_at: Utc::now(),
                };
                match Payload::json(&rec) {
                    Ok(payload) => {
                        ctx.bus.publish(&settings.topic, payload);
                    }
                    Err(e) => warn!(worker = %ctx.worker, error = %e, "failed to encode recommendation"),
                }
                info!(worker = %ctx.worker, chars = rec.text.len(), "recommendation published");
                Ok(TickOutcome::ok())
            }
            Err(e) => {
                warn!(worker = %ctx.worker, error = %e, "recommendation failed");
                Ok(TickOutcome::failed(e.to_string()))
            }
        }
    }
}
