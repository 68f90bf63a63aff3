use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// WorkerState
// ---------------------------------------------------------------------------

/// Lifecycle state of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl WorkerState {
    /// `true` once the worker will not tick again without a restart.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Crashed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Starting => "Starting",
            WorkerState::Running => "Running",
            WorkerState::Stopping => "Stopping",
            WorkerState::Stopped => "Stopped",
            WorkerState::Crashed => "Crashed",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// WorkerStatus
// ---------------------------------------------------------------------------

/// Point-in-time view of one worker, as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub state: WorkerState,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Automatic restarts since the last healthy tick.
    pub restarts: u32,
    pub ticks: u64,
    pub interval_ms: u64,
}

impl WorkerStatus {
    pub fn new(name: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            name: name.into(),
            state: WorkerState::Starting,
            last_tick_at: None,
            last_error: None,
            consecutive_failures: 0,
            restarts: 0,
            ticks: 0,
            interval_ms,
        }
    }
}
