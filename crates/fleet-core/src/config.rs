use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Top-level fleet configuration, loaded from `config/system_parameters.json`.
///
/// Only `task_list` and `recursive_refinement` are required by the workers;
/// every typed section falls back to defaults, and fields this struct does not
/// know about are kept in [`Config::extra`] so they survive a read/replace
/// cycle through the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub task_list: Vec<String>,
    #[serde(default)]
    pub recursive_refinement: bool,
    /// Simulated work per builtin task, in milliseconds.
    #[serde(default = "default_task_delay_ms")]
    pub task_delay_ms: u64,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub recommender: RecommenderConfig,
    #[serde(default)]
    pub refiner: RefinerConfig,
    /// Names of the generic heartbeat agents.
    #[serde(default = "default_agents")]
    pub agents: Vec<String>,
    /// Settings not modelled above (worker-specific knobs, future fields).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_list: Vec::new(),
            recursive_refinement: false,
            task_delay_ms: default_task_delay_ms(),
            supervisor: SupervisorSettings::default(),
            intervals: IntervalsConfig::default(),
            daemon: DaemonConfig::default(),
            recommender: RecommenderConfig::default(),
            refiner: RefinerConfig::default(),
            agents: default_agents(),
            extra: Map::new(),
        }
    }
}

impl Config {
    /// Parse and validate a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from an already-parsed JSON value (e.g. a `PUT /api/config` body).
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        if !value.is_object() {
            return Err(ConfigError::Parse(
                "configuration must be a JSON object".to_string(),
            ));
        }
        let cfg: Config =
            serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Serialize config to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_names("task_list", &self.task_list)?;
        validate_names("agents", &self.agents)?;
        self.supervisor.validate()?;
        self.intervals.validate()?;
        self.refiner.validate()?;
        if self.daemon.port == 0 {
            return Err(ConfigError::Validation(
                "daemon.port must not be 0".to_string(),
            ));
        }
        if self.recommender.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "recommender.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up an unmodelled numeric setting.
    pub fn extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }

    /// Look up an unmodelled string setting.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Look up an unmodelled boolean setting.
    pub fn extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(Value::as_bool)
    }
}

fn validate_names(field: &str, names: &[String]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field} entries must be non-empty"
            )));
        }
        if !seen.insert(trimmed) {
            return Err(ConfigError::Validation(format!(
                "{field} contains duplicate entry '{trimmed}'"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

/// Restart and shutdown knobs for the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub restart_backoff_factor: f64,
    #[serde(default = "default_restart_backoff_max_ms")]
    pub restart_backoff_max_ms: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// A tick running longer than this is treated as hung.
    #[serde(default)]
    pub tick_timeout_ms: Option<u64>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            restart_backoff_ms: default_restart_backoff_ms(),
            restart_backoff_factor: default_backoff_factor(),
            restart_backoff_max_ms: default_restart_backoff_max_ms(),
            max_restarts: default_max_restarts(),
            tick_timeout_ms: None,
        }
    }
}

impl SupervisorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grace_period_ms == 0 {
            return Err(ConfigError::Validation(
                "supervisor.grace_period_ms must be greater than 0".to_string(),
            ));
        }
        if !self.restart_backoff_factor.is_finite() || self.restart_backoff_factor < 1.0 {
            return Err(ConfigError::Validation(format!(
                "supervisor.restart_backoff_factor must be >= 1.0 (got {})",
                self.restart_backoff_factor
            )));
        }
        if self.restart_backoff_max_ms < self.restart_backoff_ms {
            return Err(ConfigError::Validation(
                "supervisor.restart_backoff_max_ms must be >= restart_backoff_ms".to_string(),
            ));
        }
        if self.tick_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "supervisor.tick_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn tick_timeout(&self) -> Option<Duration> {
        self.tick_timeout_ms.map(Duration::from_millis)
    }
}

fn default_grace_period_ms() -> u64 {
    5_000
}
fn default_restart_backoff_ms() -> u64 {
    500
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_restart_backoff_max_ms() -> u64 {
    30_000
}
fn default_max_restarts() -> u32 {
    5
}

/// Scheduling periods, read once when the worker specs are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalsConfig {
    #[serde(default = "default_task_runner_secs")]
    pub task_runner_secs: u64,
    #[serde(default = "default_refiner_secs")]
    pub refiner_secs: u64,
    #[serde(default = "default_recommender_secs")]
    pub recommender_secs: u64,
    #[serde(default = "default_agent_secs")]
    pub agent_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            task_runner_secs: default_task_runner_secs(),
            refiner_secs: default_refiner_secs(),
            recommender_secs: default_recommender_secs(),
            agent_secs: default_agent_secs(),
        }
    }
}

impl IntervalsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("task_runner_secs", self.task_runner_secs),
            ("refiner_secs", self.refiner_secs),
            ("recommender_secs", self.recommender_secs),
            ("agent_secs", self.agent_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "intervals.{name} must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

fn default_task_runner_secs() -> u64 {
    5
}
fn default_refiner_secs() -> u64 {
    10
}
fn default_recommender_secs() -> u64 {
    30
}
fn default_agent_secs() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    /// Append-only JSON log sink; stdout only when unset.
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
            log_file: None,
        }
    }
}

fn default_daemon_host() -> String {
    "127.0.0.1".into()
}
fn default_daemon_port() -> u16 {
    5000
}

/// External recommendation generator (OpenAI-compatible chat endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommenderConfig {
    /// Base URL of the generator; the recommender is not registered when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_recommender_model")]
    pub model: String,
    #[serde(default = "default_recommender_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_recommender_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_recommender_topic")]
    pub topic: String,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_recommender_model(),
            timeout_secs: default_recommender_timeout(),
            max_tokens: default_recommender_max_tokens(),
            topic: default_recommender_topic(),
        }
    }
}

fn default_recommender_model() -> String {
    "open_llama_7b".into()
}
fn default_recommender_timeout() -> u64 {
    60
}
fn default_recommender_max_tokens() -> u32 {
    150
}
fn default_recommender_topic() -> String {
    "recommendations".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinerConfig {
    /// Maximum task results folded into the estimates per tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// EWMA weight given to the newest sample.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            smoothing: default_smoothing(),
        }
    }
}

impl RefinerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "refiner.smoothing must be in (0, 1] (got {})",
                self.smoothing
            )));
        }
        if self.batch_limit == 0 {
            return Err(ConfigError::Validation(
                "refiner.batch_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_batch_limit() -> usize {
    64
}
fn default_smoothing() -> f64 {
    0.3
}

fn default_task_delay_ms() -> u64 {
    2_000
}

fn default_agents() -> Vec<String> {
    vec![
        "data_processor".to_string(),
        "optimization_agent".to_string(),
        "notification_manager".to_string(),
    ]
}
