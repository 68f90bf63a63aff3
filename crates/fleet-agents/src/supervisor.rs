use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleet_bridge::control::{ControlError, FleetControl};
use fleet_bridge::event_bus::EventBus;
use fleet_bridge::protocol::topics;
use fleet_core::config::ConfigError;
use fleet_core::config_store::{ConfigSnapshot, ConfigSource, ConfigStore};
use fleet_core::types::{WorkerState, WorkerStatus};
use serde::Serialize;
use serde_json::json;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::RestartPolicy;
use crate::spec::WorkerSpec;
use crate::state_machine::{StateMachineError, WorkerEvent, WorkerStateMachine};
use crate::worker::{TickContext, TickOutcome, Worker, WorkerFault};

/// How long to wait for an aborted tick task to actually go away.
const ABORT_WAIT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("duplicate worker name: {0}")]
    DuplicateWorker(String),

    #[error("worker {0} has a zero interval")]
    ZeroInterval(String),

    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("supervisor already started")]
    AlreadyStarted,

    #[error("supervisor is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

// ---------------------------------------------------------------------------
// StopReport
// ---------------------------------------------------------------------------

/// Outcome of [`Supervisor::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Workers whose tick ignored cancellation past the grace period.
    pub forced: Vec<String>,
    /// Workers that ended `Crashed` (forced ones included).
    pub crashed: Vec<String>,
}

impl StopReport {
    /// `true` when no worker had to be force-terminated.
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }
}

// ---------------------------------------------------------------------------
// WorkerSlot: per-worker bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunExit {
    Stopped,
    Crashed,
    Forced,
}

struct RunHandle {
    cancel: CancellationToken,
    join: JoinHandle<RunExit>,
}

struct SlotState {
    machine: WorkerStateMachine,
    status: WorkerStatus,
}

struct WorkerSlot {
    spec: WorkerSpec,
    state: Mutex<SlotState>,
    /// The loop currently driving this worker. Held across restarts so two
    /// loops never run for the same slot.
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl WorkerSlot {
    fn new(spec: WorkerSpec) -> Self {
        let status = WorkerStatus::new(spec.name.clone(), spec.interval.as_millis() as u64);
        Self {
            spec,
            state: Mutex::new(SlotState {
                machine: WorkerStateMachine::new(),
                status,
            }),
            run: tokio::sync::Mutex::new(None),
        }
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> WorkerStatus {
        self.lock().status.clone()
    }

    fn state(&self) -> WorkerState {
        self.lock().machine.state()
    }

    /// Apply `event` and announce the change on the `supervisor` topic.
    fn apply(
        &self,
        event: WorkerEvent,
        bus: &EventBus,
    ) -> std::result::Result<WorkerState, StateMachineError> {
        let mut st = self.lock();
        let from = st.machine.state();
        let to = st.machine.transition(event)?;
        st.status.state = to;
        bus.publish(
            topics::SUPERVISOR,
            json!({
                "worker": self.spec.name,
                "from": from,
                "event": event,
                "to": to,
                "at": Utc::now(),
            }),
        );
        Ok(to)
    }

    /// Drive the worker to `Stopped` from wherever a stop left it. A
    /// `Crashed` worker stays crashed.
    fn finish_stop(&self, bus: &EventBus) {
        self.apply(WorkerEvent::Stop, bus).ok();
        self.apply(WorkerEvent::Stopped, bus).ok();
    }

    fn record_outcome(&self, outcome: &TickOutcome) {
        let mut st = self.lock();
        st.status.ticks += 1;
        st.status.last_tick_at = Some(Utc::now());
        if outcome.ok {
            st.status.consecutive_failures = 0;
            st.status.restarts = 0;
        } else {
            st.status.consecutive_failures += 1;
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| "tick reported failure".to_string());
            warn!(
                worker = %self.spec.name,
                consecutive_failures = st.status.consecutive_failures,
                error = %message,
                "tick failed"
            );
            st.status.last_error = Some(message);
        }
    }

    fn record_fault(&self, fault: &WorkerFault, bus: &EventBus) {
        {
            let mut st = self.lock();
            st.status.ticks += 1;
            st.status.last_tick_at = Some(Utc::now());
            st.status.consecutive_failures += 1;
            st.status.last_error = Some(fault.to_string());
        }
        error!(worker = %self.spec.name, error = %fault, "worker fault");
        self.apply(WorkerEvent::Crash, bus).ok();
    }

    fn restart_count(&self) -> u32 {
        self.lock().status.restarts
    }

    /// Crashed → Starting for an automatic restart.
    fn begin_auto_restart(&self, bus: &EventBus) -> bool {
        self.lock().status.restarts += 1;
        self.apply(WorkerEvent::Restart, bus).is_ok()
    }

    /// Stopped/Crashed → Starting with counters cleared.
    fn begin_manual_restart(&self, bus: &EventBus) -> std::result::Result<(), StateMachineError> {
        self.apply(WorkerEvent::Restart, bus)?;
        let mut st = self.lock();
        st.status.consecutive_failures = 0;
        st.status.restarts = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Inner {
    store: ConfigStore,
    bus: EventBus,
    slots: Vec<Arc<WorkerSlot>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

/// Owns the fixed set of workers and keeps them running.
///
/// Every worker gets its own scheduling loop. A loop waits for "interval
/// elapsed or stop requested", runs one tick as a separate task, and only
/// schedules the next tick after that task has finished. A tick that panics,
/// returns a [`WorkerFault`] or exceeds its timeout crashes the worker; the
/// loop then rebuilds it from its spec after an exponential backoff, up to
/// `supervisor.max_restarts` consecutive crashes.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Register `specs`. Names must be unique and intervals non-zero.
    pub fn new(store: ConfigStore, bus: EventBus, specs: Vec<WorkerSpec>) -> Result<Self> {
        let mut slots: Vec<Arc<WorkerSlot>> = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.interval.is_zero() {
                return Err(SupervisorError::ZeroInterval(spec.name));
            }
            if slots.iter().any(|s| s.name() == spec.name) {
                return Err(SupervisorError::DuplicateWorker(spec.name));
            }
            slots.push(Arc::new(WorkerSlot::new(spec)));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                bus,
                slots,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.inner.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.inner.slots.iter().map(|s| s.name().to_string()).collect()
    }

    /// `true` between a successful [`start`](Self::start) and
    /// [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.cancel.is_cancelled()
    }

    /// Start every worker loop.
    pub async fn start(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(SupervisorError::NotRunning);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(SupervisorError::AlreadyStarted);
        }
        for slot in &self.inner.slots {
            let mut run = slot.run.lock().await;
            *run = Some(self.spawn_run(slot.clone()));
        }
        info!(workers = self.inner.slots.len(), "supervisor started");
        Ok(())
    }

    /// Point-in-time copy of every worker's status, in registration order.
    pub fn status(&self) -> Vec<WorkerStatus> {
        self.inner.slots.iter().map(|s| s.snapshot()).collect()
    }

    /// Same as [`status`](Self::status), keyed by worker name.
    pub fn status_map(&self) -> BTreeMap<String, WorkerStatus> {
        self.inner
            .slots
            .iter()
            .map(|s| (s.name().to_string(), s.snapshot()))
            .collect()
    }

    pub fn worker_status(&self, name: &str) -> Option<WorkerStatus> {
        self.slot(name).ok().map(|s| s.snapshot())
    }

    /// Reload the shared configuration. Workers see the new snapshot on
    /// their next tick; nothing is restarted.
    pub fn trigger_reload(
        &self,
        source: &ConfigSource,
    ) -> std::result::Result<Arc<ConfigSnapshot>, ConfigError> {
        self.inner.store.reload(source)
    }

    /// Stop the current instance of `name` (if any) and start a fresh one
    /// with cleared failure and restart counters.
    pub async fn restart_worker(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?.clone();
        if !self.is_running() {
            return Err(SupervisorError::NotRunning);
        }

        let mut run = slot.run.lock().await;
        if let Some(handle) = run.take() {
            handle.cancel.cancel();
            join_run(slot.name(), handle).await;
        }
        slot.finish_stop(&self.inner.bus);
        slot.begin_manual_restart(&self.inner.bus)?;
        *run = Some(self.spawn_run(slot.clone()));
        info!(worker = %name, "worker restarted on request");
        Ok(())
    }

    /// Stop every worker. In-flight ticks are cancelled and get
    /// `supervisor.grace_period_ms` to return; any that do not are aborted
    /// and their workers marked `Crashed`.
    ///
    /// When this returns every worker is `Stopped` or `Crashed`.
    pub async fn stop(&self) -> StopReport {
        let bus = &self.inner.bus;
        info!("stopping workers");
        for slot in &self.inner.slots {
            slot.apply(WorkerEvent::Stop, bus).ok();
        }
        self.inner.cancel.cancel();

        let mut report = StopReport::default();
        for slot in &self.inner.slots {
            let handle = slot.run.lock().await.take();
            let exit = match handle {
                Some(handle) => join_run(slot.name(), handle).await,
                None => RunExit::Stopped,
            };
            slot.finish_stop(bus);
            if !slot.state().is_terminal() {
                slot.apply(WorkerEvent::Crash, bus).ok();
            }
            if exit == RunExit::Forced {
                report.forced.push(slot.name().to_string());
            }
            if slot.state() == WorkerState::Crashed {
                report.crashed.push(slot.name().to_string());
            }
        }

        info!(
            forced = report.forced.len(),
            crashed = report.crashed.len(),
            "all workers stopped"
        );
        report
    }

    fn slot(&self, name: &str) -> Result<&Arc<WorkerSlot>> {
        self.inner
            .slots
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| SupervisorError::UnknownWorker(name.to_string()))
    }

    fn spawn_run(&self, slot: Arc<WorkerSlot>) -> RunHandle {
        let cancel = self.inner.cancel.child_token();
        let join = tokio::spawn(supervise(self.inner.clone(), slot, cancel.clone()));
        RunHandle { cancel, join }
    }
}

#[async_trait]
impl FleetControl for Supervisor {
    fn status(&self) -> Vec<WorkerStatus> {
        Supervisor::status(self)
    }

    fn trigger_reload(
        &self,
        source: &ConfigSource,
    ) -> std::result::Result<Arc<ConfigSnapshot>, ConfigError> {
        Supervisor::trigger_reload(self, source)
    }

    async fn restart_worker(&self, name: &str) -> std::result::Result<(), ControlError> {
        Supervisor::restart_worker(self, name)
            .await
            .map_err(|e| match e {
                SupervisorError::UnknownWorker(name) => ControlError::UnknownWorker(name),
                SupervisorError::NotRunning => ControlError::Rejected(e.to_string()),
                other => ControlError::Internal(other.to_string()),
            })
    }
}

// ---------------------------------------------------------------------------
// Per-worker loop
// ---------------------------------------------------------------------------

type TickReturn = (
    Box<dyn Worker>,
    std::result::Result<TickOutcome, WorkerFault>,
);

enum TickLoopEnd {
    Cancelled,
    Fault(WorkerFault),
    Forced(WorkerFault),
}

async fn join_run(name: &str, handle: RunHandle) -> RunExit {
    match handle.join.await {
        Ok(exit) => exit,
        Err(e) => {
            error!(worker = %name, error = %e, "worker loop ended abnormally");
            RunExit::Crashed
        }
    }
}

/// Build, run, and restart one worker until stopped or out of restarts.
async fn supervise(inner: Arc<Inner>, slot: Arc<WorkerSlot>, cancel: CancellationToken) -> RunExit {
    let bus = &inner.bus;
    loop {
        let worker = slot.spec.build(bus);
        if slot.apply(WorkerEvent::Spawned, bus).is_err() {
            // Stop arrived while starting.
            slot.finish_stop(bus);
            return RunExit::Stopped;
        }
        info!(worker = %slot.name(), kind = worker.kind(), "worker running");

        match run_ticks(&inner, &slot, worker, &cancel).await {
            TickLoopEnd::Cancelled => {
                slot.finish_stop(bus);
                debug!(worker = %slot.name(), "worker stopped");
                return RunExit::Stopped;
            }
            TickLoopEnd::Forced(fault) => {
                slot.record_fault(&fault, bus);
                return RunExit::Forced;
            }
            TickLoopEnd::Fault(fault) => {
                slot.record_fault(&fault, bus);
                if cancel.is_cancelled() {
                    return RunExit::Crashed;
                }

                let policy = RestartPolicy::from(&inner.store.current().config.supervisor);
                let restarts = slot.restart_count();
                if !policy.allows(restarts) {
                    error!(
                        worker = %slot.name(),
                        restarts,
                        "restart limit reached; worker stays crashed"
                    );
                    return RunExit::Crashed;
                }

                let delay = policy.delay(restarts);
                warn!(
                    worker = %slot.name(),
                    attempt = restarts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "restarting crashed worker"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return RunExit::Crashed,
                    _ = tokio::time::sleep(delay) => {}
                }
                if !slot.begin_auto_restart(bus) {
                    return RunExit::Crashed;
                }
            }
        }
    }
}

/// Tick `worker` every `spec.interval` until cancelled or faulted.
async fn run_ticks(
    inner: &Inner,
    slot: &WorkerSlot,
    mut worker: Box<dyn Worker>,
    cancel: &CancellationToken,
) -> TickLoopEnd {
    let mut interval = tokio::time::interval(slot.spec.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return TickLoopEnd::Cancelled,
            _ = interval.tick() => {}
        }

        let snapshot = inner.store.current();
        let grace = snapshot.config.supervisor.grace_period();
        let limit = slot
            .spec
            .tick_timeout
            .or_else(|| snapshot.config.supervisor.tick_timeout());
        let ctx = TickContext {
            worker: slot.spec.name.clone(),
            snapshot,
            bus: inner.bus.clone(),
            cancel: cancel.child_token(),
        };
        let mut handle: JoinHandle<TickReturn> = tokio::spawn(async move {
            let result = worker.tick(&ctx).await;
            (worker, result)
        });

        let waited = tokio::select! {
            res = await_tick(&mut handle, limit) => Some(res),
            _ = cancel.cancelled() => None,
        };
        let joined = match waited {
            Some(res) => res,
            None => match tokio::time::timeout(grace, &mut handle).await {
                Ok(res) => res.map_err(join_fault),
                Err(_) => {
                    warn!(
                        worker = %slot.name(),
                        grace_ms = grace.as_millis() as u64,
                        "tick ignored cancellation; force-stopping"
                    );
                    abort_tick(handle).await;
                    return TickLoopEnd::Forced(WorkerFault::ShutdownTimeout(grace));
                }
            },
        };

        match joined {
            Ok((returned, Ok(outcome))) => {
                slot.record_outcome(&outcome);
                worker = returned;
            }
            Ok((_, Err(fault))) | Err(fault) => return TickLoopEnd::Fault(fault),
        }
    }
}

async fn await_tick(
    handle: &mut JoinHandle<TickReturn>,
    limit: Option<Duration>,
) -> std::result::Result<TickReturn, WorkerFault> {
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut *handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                let _ = tokio::time::timeout(ABORT_WAIT, &mut *handle).await;
                return Err(WorkerFault::TimedOut(limit));
            }
        },
        None => (&mut *handle).await,
    };
    joined.map_err(join_fault)
}

async fn abort_tick(handle: JoinHandle<TickReturn>) {
    handle.abort();
    let _ = tokio::time::timeout(ABORT_WAIT, handle).await;
}

fn join_fault(e: JoinError) -> WorkerFault {
    if e.is_panic() {
        WorkerFault::Panicked(panic_message(e.into_panic()))
    } else {
        WorkerFault::Unrecoverable("tick task was cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
