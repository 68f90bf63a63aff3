use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use fleet_core::config::ConfigError;
use fleet_core::config_store::{ConfigSnapshot, ConfigSource};
use fleet_core::types::WorkerStatus;

/// Errors from control commands other than configuration reloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("unknown worker: {0}")]
    UnknownWorker(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Commands the control surface may issue to the running fleet.
///
/// Implemented by the supervisor; the HTTP layer only sees this trait.
#[async_trait]
pub trait FleetControl: Send + Sync {
    /// Point-in-time status of every worker, in registration order.
    fn status(&self) -> Vec<WorkerStatus>;

    /// Load `source` through the validated reload path. On error the running
    /// configuration is unchanged.
    fn trigger_reload(&self, source: &ConfigSource) -> Result<Arc<ConfigSnapshot>, ConfigError>;

    /// Replace the running instance of `name` with a fresh one.
    async fn restart_worker(&self, name: &str) -> Result<(), ControlError>;
}
