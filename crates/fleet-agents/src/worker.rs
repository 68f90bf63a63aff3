use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_bridge::event_bus::EventBus;
use fleet_core::config::Config;
use fleet_core::config_store::ConfigSnapshot;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A tick that could not return control normally. Any fault crashes the
/// worker; the supervisor decides whether to restart it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerFault {
    #[error("tick panicked: {0}")]
    Panicked(String),
    #[error("tick exceeded its {0:?} timeout")]
    TimedOut(Duration),
    #[error("tick ignored cancellation for {0:?}")]
    ShutdownTimeout(Duration),
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

// ---------------------------------------------------------------------------
// TickOutcome
// ---------------------------------------------------------------------------

/// What a tick reports when it returns control. `ok = false` is a soft
/// failure: it is counted but scheduling continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub ok: bool,
    pub error: Option<String>,
    pub detail: Option<String>,
}

impl TickOutcome {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            detail: None,
        }
    }

    pub fn ok_with(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            error: None,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            detail: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TickContext
// ---------------------------------------------------------------------------

/// Everything a tick may read. The snapshot is taken when the tick starts
/// and does not change underneath it.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub worker: String,
    pub snapshot: Arc<ConfigSnapshot>,
    pub bus: EventBus,
    /// Fires when the worker is being stopped or restarted. Multi-step ticks
    /// check it between steps and return what they finished.
    pub cancel: CancellationToken,
}

impl TickContext {
    pub fn config(&self) -> &Config {
        &self.snapshot.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Worker trait
// ---------------------------------------------------------------------------

/// One unit of periodic work. The supervisor never runs two ticks of the
/// same instance at once, so `tick` takes `&mut self`.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Short label for logs ("task_runner", "refiner", ...).
    fn kind(&self) -> &'static str;

    async fn tick(&mut self, ctx: &TickContext) -> Result<TickOutcome, WorkerFault>;
}
