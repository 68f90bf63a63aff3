//! Builtin tasks run by the task runner.

use std::time::Duration;

use async_trait::async_trait;
use fleet_agents::task_runner::{Task, TaskError, TaskRegistry};
use fleet_agents::worker::TickContext;
use tracing::info;

/// A named maintenance job. The work itself is simulated by waiting
/// `task_delay_ms`; stopping the worker interrupts the wait.
#[derive(Debug, Clone)]
pub struct BuiltinTask {
    name: &'static str,
    activity: &'static str,
}

impl BuiltinTask {
    pub const fn new(name: &'static str, activity: &'static str) -> Self {
        Self { name, activity }
    }
}

#[async_trait]
impl Task for BuiltinTask {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &TickContext) -> Result<(), TaskError> {
        let delay = Duration::from_millis(ctx.config().task_delay_ms);
        info!(task = self.name, worker = %ctx.worker, "{}...", self.activity);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancel.cancelled() => {
                info!(task = self.name, "interrupted");
                return Err(TaskError::Cancelled);
            }
        }

        info!(task = self.name, elapsed_ms = delay.as_millis() as u64, "completed");
        Ok(())
    }
}

pub const BACKUP_DATABASE: BuiltinTask = BuiltinTask::new("backup_database", "Backing up database");
pub const DATA_CLEANING: BuiltinTask = BuiltinTask::new("data_cleaning", "Cleaning data");
pub const REPORT_GENERATION: BuiltinTask =
    BuiltinTask::new("report_generation", "Generating report");

/// Registry holding every builtin task.
pub fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register(BACKUP_DATABASE)
        .register(DATA_CLEANING)
        .register(REPORT_GENERATION);
    registry
}
