//! Recommendation client for OpenAI-compatible chat completion servers
//! (vLLM, llama.cpp, Ollama, hosted APIs).

use async_trait::async_trait;
use fleet_agents::recommender::{GenerationError, RecommendationGenerator};
use fleet_core::config::RecommenderConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Environment variable holding an optional bearer token for the endpoint.
pub const API_KEY_ENV: &str = "FLEET_RECOMMENDER_API_KEY";

pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsGenerator {
    /// `endpoint` is the server base URL (`http://localhost:8000`). A URL that
    /// already names `/chat/completions` is used as given.
    pub fn new(endpoint: &str, model: impl Into<String>, api_key: Option<String>) -> Self {
        let base = endpoint.trim_end_matches('/');
        let url = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/v1/chat/completions")
        };
        Self {
            client: reqwest::Client::new(),
            url,
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty() && k != "none"),
        }
    }

    /// Build from the `recommender` config section. `None` without an endpoint.
    pub fn from_config(config: &RecommenderConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref()?;
        let api_key = std::env::var(API_KEY_ENV).ok();
        Some(Self::new(endpoint, config.model.clone(), api_key))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

fn map_send_error(err: reqwest::Error) -> GenerationError {
    if err.is_connect() || err.is_timeout() {
        GenerationError::Unavailable(err.to_string())
    } else {
        GenerationError::Failed(err.to_string())
    }
}

#[async_trait]
impl RecommendationGenerator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(map_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Failed(format!("{}: {}", status.as_u16(), text)));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Failed(format!("invalid response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GenerationError::Failed("response contained no content".into()))?;

        debug!(url = %self.url, chars = content.len(), "recommendation generated");
        Ok(content)
    }
}
