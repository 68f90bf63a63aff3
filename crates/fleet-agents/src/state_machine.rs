use fleet_core::types::WorkerState;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// WorkerEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEvent {
    /// A fresh instance was built and its loop is scheduling ticks.
    Spawned,
    /// Shutdown requested.
    Stop,
    /// The loop exited after a requested stop.
    Stopped,
    /// A tick faulted or had to be force-terminated.
    Crash,
    /// Automatic or manual restart with a new instance.
    Restart,
}

impl fmt::Display for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerEvent::Spawned => "Spawned",
            WorkerEvent::Stop => "Stop",
            WorkerEvent::Stopped => "Stopped",
            WorkerEvent::Crash => "Crash",
            WorkerEvent::Restart => "Restart",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// An event was applied in a state that does not accept it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid transition: cannot apply {event} in state {state}")]
    InvalidTransition {
        state: WorkerState,
        event: WorkerEvent,
    },
}

// ---------------------------------------------------------------------------
// WorkerStateMachine
// ---------------------------------------------------------------------------

/// Lifecycle of one supervised worker.
///
/// Within a run the state only moves forward
/// (`Starting → Running → Stopping → Stopped`, or `Crashed`); the only way
/// back to `Starting` is a restart.
#[derive(Debug, Clone)]
pub struct WorkerStateMachine {
    current: WorkerState,
    history: Vec<(WorkerState, WorkerEvent, WorkerState)>,
}

impl WorkerStateMachine {
    /// Create a new state machine starting in `Starting`.
    pub fn new() -> Self {
        Self {
            current: WorkerState::Starting,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.current
    }

    pub fn history(&self) -> &[(WorkerState, WorkerEvent, WorkerState)] {
        &self.history
    }

    /// Attempt a state transition driven by `event`.
    ///
    /// Valid transitions:
    /// - Starting + Spawned -> Running
    /// - Starting + Stop    -> Stopping
    /// - Starting + Crash   -> Crashed
    /// - Running  + Stop    -> Stopping
    /// - Running  + Crash   -> Crashed
    /// - Stopping + Stopped -> Stopped
    /// - Stopping + Crash   -> Crashed
    /// - Crashed  + Restart -> Starting
    /// - Stopped  + Restart -> Starting
    pub fn transition(&mut self, event: WorkerEvent) -> Result<WorkerState, StateMachineError> {
        let next = match (self.current, event) {
            (WorkerState::Starting, WorkerEvent::Spawned) => WorkerState::Running,
            (WorkerState::Starting, WorkerEvent::Stop) => WorkerState::Stopping,
            (WorkerState::Starting, WorkerEvent::Crash) => WorkerState::Crashed,
            (WorkerState::Running, WorkerEvent::Stop) => WorkerState::Stopping,
            (WorkerState::Running, WorkerEvent::Crash) => WorkerState::Crashed,
            (WorkerState::Stopping, WorkerEvent::Stopped) => WorkerState::Stopped,
            (WorkerState::Stopping, WorkerEvent::Crash) => WorkerState::Crashed,
            (WorkerState::Crashed, WorkerEvent::Restart) => WorkerState::Starting,
            (WorkerState::Stopped, WorkerEvent::Restart) => WorkerState::Starting,
            _ => {
                return Err(StateMachineError::InvalidTransition {
                    state: self.current,
                    event,
                });
            }
        };

        let from = self.current;
        self.current = next;
        self.history.push((from, event, next));
        tracing::debug!(from = %from, event = %event, to = %next, "worker state transition");
        Ok(next)
    }

    /// Returns `true` if the given event is valid in the current state.
    pub fn can_transition(&self, event: WorkerEvent) -> bool {
        matches!(
            (self.current, event),
            (WorkerState::Starting, WorkerEvent::Spawned)
                | (WorkerState::Starting, WorkerEvent::Stop)
                | (WorkerState::Starting, WorkerEvent::Crash)
                | (WorkerState::Running, WorkerEvent::Stop)
                | (WorkerState::Running, WorkerEvent::Crash)
                | (WorkerState::Stopping, WorkerEvent::Stopped)
                | (WorkerState::Stopping, WorkerEvent::Crash)
                | (WorkerState::Crashed, WorkerEvent::Restart)
                | (WorkerState::Stopped, WorkerEvent::Restart)
        )
    }
}

impl Default for WorkerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
