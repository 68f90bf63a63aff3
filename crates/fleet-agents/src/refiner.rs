use std::collections::BTreeMap;

use async_trait::async_trait;
use fleet_bridge::event_bus::{EventBus, Subscription};
use fleet_bridge::protocol::{topics, Payload};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::task_runner::TaskReport;
use crate::worker::{TickContext, TickOutcome, Worker, WorkerFault};

/// Published on the `refinements` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    /// `task_list` reordered shortest-average first. Tasks without samples
    /// keep their relative order at the end.
    pub order: Vec<String>,
    /// Smoothed duration per task, in milliseconds.
    pub averages: BTreeMap<String, f64>,
    pub samples: usize,
    pub config_version: u64,
}

/// Folds task reports into per-task moving averages and proposes a task
/// order when `recursive_refinement` is enabled.
///
/// Each tick reads at most `refiner.batch_limit` queued reports. With the
/// flag off the tick discards whatever is queued and succeeds, so reports
/// from the disabled period are never folded later.
pub struct Refiner {
    reports: Subscription,
    averages: BTreeMap<String, f64>,
    last_order: Option<Vec<String>>,
}

impl Refiner {
    /// Subscribes to `tasks` immediately so no report published after
    /// construction is missed.
    pub fn new(bus: &EventBus) -> Self {
        Self {
            reports: bus.subscribe(topics::TASKS),
            averages: BTreeMap::new(),
            last_order: None,
        }
    }

    pub fn averages(&self) -> &BTreeMap<String, f64> {
        &self.averages
    }

    fn fold(&mut self, report: &TaskReport, smoothing: f64) {
        if !report.ok {
            return;
        }
        let sample = report.duration_ms as f64;
        self.averages
            .entry(report.task.clone())
            .and_modify(|avg| *avg = smoothing * sample + (1.0 - smoothing) * *avg)
            .or_insert(sample);
    }

    fn order(&self, task_list: &[String]) -> Vec<String> {
        let mut order = task_list.to_vec();
        order.sort_by(|a, b| {
            let ka = self.averages.get(a).copied().unwrap_or(f64::INFINITY);
            let kb = self.averages.get(b).copied().unwrap_or(f64::INFINITY);
            ka.total_cmp(&kb)
        });
        order
    }
}

#[async_trait]
impl Worker for Refiner {
    fn kind(&self) -> &'static str {
        "refiner"
    }

    async fn tick(&mut self, ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
        let config = ctx.config();
        if !config.recursive_refinement {
            let mut discarded = 0usize;
            while self.reports.try_recv().is_some() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!(worker = %ctx.worker, discarded, "refinement disabled, discarded task reports");
            }
            return Ok(TickOutcome::ok_with("refinement disabled"));
        }

        let limit = config.refiner.batch_limit;
        let smoothing = config.refiner.smoothing;
        let mut folded = 0usize;
        while folded < limit && !ctx.is_cancelled() {
            let Some(msg) = self.reports.try_recv() else {
                break;
            };
            match msg.payload.decode::<TaskReport>() {
                Ok(report) => self.fold(&report, smoothing),
                Err(e) => warn!(worker = %ctx.worker, error = %e, "ignoring malformed task report"),
            }
            folded += 1;
        }

        let order = self.order(&config.task_list);
        if self.last_order.as_ref() != Some(&order) || folded > 0 {
            let refinement = Refinement {
                order: order.clone(),
                averages: self.averages.clone(),
                samples: folded,
                config_version: ctx.snapshot.version,
            };
            match Payload::json(&refinement) {
                Ok(payload) => {
                    ctx.bus.publish(topics::REFINEMENTS, payload);
                }
                Err(e) => warn!(worker = %ctx.worker, error = %e, "failed to encode refinement"),
            }
            self.last_order = Some(order);
        }

        debug!(worker = %ctx.worker, folded, "refinement pass finished");
        Ok(TickOutcome::ok_with(format!("folded {folded} task reports")))
    }
}
