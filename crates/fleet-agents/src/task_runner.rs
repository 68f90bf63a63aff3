use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_bridge::protocol::{topics, Payload};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::worker::{TickContext, TickOutcome, Worker, WorkerFault};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("unknown task: {0}")]
    Unknown(String),
    #[error("task was cancelled")]
    Cancelled,
    #[error("task failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Task + registry
// ---------------------------------------------------------------------------

/// A named maintenance task the runner can invoke ("backup_database", ...).
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Run once. Long tasks should watch `ctx.cancel` and return
    /// [`TaskError::Cancelled`] when it fires.
    async fn run(&self, ctx: &TickContext) -> Result<(), TaskError>;
}

/// Lookup table from task name to implementation.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under its own name, replacing any previous entry.
    pub fn register(&mut self, task: impl Task + 'static) -> &mut Self {
        self.tasks.insert(task.name().to_string(), Arc::new(task));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// TaskReport
// ---------------------------------------------------------------------------

/// Published on the `tasks` topic after each task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: String,
    pub ok: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub config_version: u64,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

/// Runs every entry of `task_list`, in order, once per tick.
///
/// An unknown or failing task makes the tick a soft failure but the rest of
/// the list still runs. Cancellation is checked between tasks; a cancelled
/// tick reports what it completed and is not a failure.
pub struct TaskRunner {
    registry: TaskRegistry,
}

impl TaskRunner {
    pub fn new(registry: TaskRegistry) -> Self {
        Self { registry }
    }

    fn publish(&self, ctx: &TickContext, report: &TaskReport) {
        match Payload::json(report) {
            Ok(payload) => {
                ctx.bus.publish(topics::TASKS, payload);
            }
            Err(e) => warn!(task = %report.task, error = %e, "failed to encode task report"),
        }
    }
}

#[async_trait]
impl Worker for TaskRunner {
    fn kind(&self) -> &'static str {
        "task_runner"
    }

    async fn tick(&mut self, ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
        let tasks = &ctx.config().task_list;
        let total = tasks.len();
        let mut completed = 0usize;
        let mut failures = Vec::new();

        for name in tasks {
            if ctx.is_cancelled() {
                info!(worker = %ctx.worker, completed, total, "task list cancelled");
                return Ok(TickOutcome::ok_with(format!(
                    "cancelled after {completed} of {total} tasks"
                )));
            }

            let started = Instant::now();
            let result = match self.registry.get(name) {
                Some(task) => task.run(ctx).await,
                None => Err(TaskError::Unknown(name.clone())),
            };
            let report = TaskReport {
                task: name.clone(),
                ok: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
                config_version: ctx.snapshot.version,
                finished_at: Utc::now(),
            };
            self.publish(ctx, &report);

            match result {
                Ok(()) => {
                    completed += 1;
                    info!(worker = %ctx.worker, task = %name, duration_ms = report.duration_ms, "task completed");
                }
                Err(TaskError::Cancelled) => {
                    info!(worker = %ctx.worker, task = %name, completed, total, "task cancelled");
                    return Ok(TickOutcome::ok_with(format!(
                        "cancelled after {completed} of {total} tasks"
                    )));
                }
                Err(e) => {
                    warn!(worker = %ctx.worker, task = %name, error = %e, "task failed");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(TickOutcome::ok_with(format!("ran {completed} tasks")))
        } else {
            Ok(TickOutcome::failed(failures.join("; ")))
        }
    }
}
