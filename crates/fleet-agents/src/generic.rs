use async_trait::async_trait;
use chrono::Utc;
use fleet_bridge::protocol::topics;
use serde_json::json;
use tracing::debug;

use crate::worker::{TickContext, TickOutcome, Worker, WorkerFault};

/// Minimal worker: publishes a heartbeat on `heartbeats` every tick.
#[derive(Debug, Default)]
pub struct GenericAgent {
    beats: u64,
}

impl GenericAgent {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Worker for GenericAgent {
    fn kind(&self) -> &'static str {
        "agent"
    }

    async fn tick(&mut self, ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
        self.beats += 1;
        ctx.bus.publish(
            topics::HEARTBEATS,
            json!({
                "agent": ctx.worker,
                "beat": self.beats,
                "config_version": ctx.snapshot.version,
                "at": Utc::now(),
            }),
        );
        debug!(worker = %ctx.worker, beat = self.beats, "heartbeat");
        Ok(TickOutcome::ok())
    }
}
