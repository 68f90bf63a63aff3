use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_agents::spec::WorkerSpec;
use fleet_agents::supervisor::{Supervisor, SupervisorError};
use fleet_agents::worker::{TickContext, TickOutcome, Worker, WorkerFault};
use fleet_bridge::event_bus::EventBus;
use fleet_bridge::protocol::topics;
use fleet_core::config::Config;
use fleet_core::config_store::{ConfigSource, ConfigStore};
use fleet_core::types::WorkerState;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_store() -> ConfigStore {
    let cfg = Config::from_value(json!({
        "task_list": [],
        "supervisor": {
            "grace_period_ms": 150,
            "restart_backoff_ms": 10,
            "restart_backoff_max_ms": 40,
            "max_restarts": 2
        }
    }))
    .unwrap();
    ConfigStore::new(cfg).unwrap()
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn state_of(sup: &Supervisor, name: &str) -> WorkerState {
    sup.worker_status(name).unwrap().state
}

/// Counts ticks; reports a soft failure while `fail` is set.
struct CountingWorker {
    ticks: Arc<AtomicU64>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Worker for CountingWorker {
    fn kind(&self) -> &'static str {
        "counting"
    }

    async fn tick(&mut self, _ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Ok(TickOutcome::failed("nope"))
        } else {
            Ok(TickOutcome::ok())
        }
    }
}

fn counting_spec(name: &str, ticks: Arc<AtomicU64>, fail: Arc<AtomicBool>) -> WorkerSpec {
    WorkerSpec::new(name, Duration::from_millis(10), move |_bus: &EventBus| {
        Box::new(CountingWorker {
            ticks: ticks.clone(),
            fail: fail.clone(),
        }) as Box<dyn Worker>
    })
}

/// Panics on every tick while `fail` is set.
struct FlakyWorker {
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Worker for FlakyWorker {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn tick(&mut self, _ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
        if self.fail.load(Ordering::SeqCst) {
            panic!("flaky worker blew up");
        }
        Ok(TickOutcome::ok())
    }
}

/// Never returns and never looks at the cancellation token.
struct SleepyWorker {
    entered: Arc<AtomicBool>,
}

#[async_trait]
impl Worker for SleepyWorker {
    fn kind(&self) -> &'static str {
        "sleepy"
    }

    async fn tick(&mut self, _ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
        self.entered.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(TickOutcome::ok())
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let ticks = Arc::new(AtomicU64::new(0));
    let fail = Arc::new(AtomicBool::new(false));
    let result = Supervisor::new(
        fast_store(),
        EventBus::new(),
        vec![
            counting_spec("a", ticks.clone(), fail.clone()),
            counting_spec("a", ticks, fail),
        ],
    );
    assert!(matches!(result, Err(SupervisorError::DuplicateWorker(name)) if name == "a"));
}

#[tokio::test]
async fn zero_interval_is_rejected() {
    let spec = WorkerSpec::new("z", Duration::ZERO, |_bus: &EventBus| {
        Box::new(FlakyWorker {
            fail: Arc::new(AtomicBool::new(false)),
        }) as Box<dyn Worker>
    });
    let result = Supervisor::new(fast_store(), EventBus::new(), vec![spec]);
    assert!(matches!(result, Err(SupervisorError::ZeroInterval(_))));
}

#[tokio::test]
async fn start_twice_fails_and_unknown_worker_errors() {
    let sup = Supervisor::new(
        fast_store(),
        EventBus::new(),
        vec![counting_spec(
            "a",
            Arc::new(AtomicU64::new(0)),
            Arc::new(AtomicBool::new(false)),
        )],
    )
    .unwrap();
    assert!(matches!(
        sup.restart_worker("a").await,
        Err(SupervisorError::NotRunning)
    ));

    sup.start().await.unwrap();
    assert!(matches!(sup.start().await, Err(SupervisorError::AlreadyStarted)));
    assert!(matches!(
        sup.restart_worker("ghost").await,
        Err(SupervisorError::UnknownWorker(_))
    ));
    sup.stop().await;
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn soft_failures_are_counted_and_ticking_continues() {
    let ticks = Arc::new(AtomicU64::new(0));
    let fail = Arc::new(AtomicBool::new(true));
    let sup = Supervisor::new(
        fast_store(),
        EventBus::new(),
        vec![counting_spec("counter", ticks.clone(), fail.clone())],
    )
    .unwrap();
    sup.start().await.unwrap();

    wait_for(|| sup.worker_status("counter").unwrap().consecutive_failures >= 3).await;
    let status = sup.worker_status("counter").unwrap();
    assert_eq!(status.state, WorkerState::Running);
    assert_eq!(status.last_error.as_deref(), Some("nope"));
    assert!(status.last_tick_at.is_some());

    // A successful tick clears the streak but keeps the last error.
    fail.store(false, Ordering::SeqCst);
    wait_for(|| sup.worker_status("counter").unwrap().consecutive_failures == 0).await;
    assert_eq!(
        sup.worker_status("counter").unwrap().last_error.as_deref(),
        Some("nope")
    );

    let report = sup.stop().await;
    assert!(report.is_clean());
    assert_eq!(state_of(&sup, "counter"), WorkerState::Stopped);
}

#[tokio::test]
async fn ticks_of_one_worker_never_overlap() {
    struct SlowWorker {
        active: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
        done: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Worker for SlowWorker {
        fn kind(&self) -> &'static str {
            "slow"
        }

        async fn tick(&mut self, _ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(TickOutcome::ok())
        }
    }

    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicU64::new(0));
    let (a, m, d) = (active.clone(), max_seen.clone(), done.clone());
    let spec = WorkerSpec::new("slow", Duration::from_millis(2), move |_bus: &EventBus| {
        Box::new(SlowWorker {
            active: a.clone(),
            max_seen: m.clone(),
            done: d.clone(),
        }) as Box<dyn Worker>
    });

    let sup = Supervisor::new(fast_store(), EventBus::new(), vec![spec]).unwrap();
    sup.start().await.unwrap();
    wait_for(|| done.load(Ordering::SeqCst) >= 5).await;
    sup.stop().await;

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ticks_see_non_decreasing_config_versions() {
    struct VersionWorker {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl Worker for VersionWorker {
        fn kind(&self) -> &'static str {
            "versions"
        }

        async fn tick(&mut self, ctx: &TickContext) -> Result<TickOutcome, WorkerFault> {
            self.seen.lock().unwrap().push(ctx.snapshot.version);
            Ok(TickOutcome::ok())
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let spec = WorkerSpec::new("versions", Duration::from_millis(5), move |_bus: &EventBus| {
        Box::new(VersionWorker { seen: s.clone() }) as Box<dyn Worker>
    });
    let store = fast_store();
    let sup = Supervisor::new(store.clone(), EventBus::new(), vec![spec]).unwrap();
    sup.start().await.unwrap();

    for i in 0..3 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        sup.trigger_reload(&ConfigSource::Value(json!({ "task_list": [format!("t{i}")] })))
            .unwrap();
    }
    wait_for(|| seen.lock().unwrap().last() == Some(&4)).await;
    sup.stop().await;

    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen[0], 1);
}

#[tokio::test]
async fn invalid_reload_is_returned_and_config_kept() {
    let store = fast_store();
    let sup = Supervisor::new(store.clone(), EventBus::new(), vec![]).unwrap();
    let before = store.current();

    let err = sup
        .trigger_reload(&ConfigSource::Value(json!({ "task_list": [""] })))
        .unwrap_err();
    assert!(err.to_string().contains("task_list"));
    assert!(Arc::ptr_eq(&before, &store.current()));
}

// ---------------------------------------------------------------------------
// Faults and restarts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_worker_is_restarted_up_to_the_ceiling() {
    let fail = Arc::new(AtomicBool::new(true));
    let builds = Arc::new(AtomicUsize::new(0));
    let (f, b) = (fail.clone(), builds.clone());
    let spec = WorkerSpec::new("flaky", Duration::from_millis(5), move |_bus: &EventBus| {
        b.fetch_add(1, Ordering::SeqCst);
        Box::new(FlakyWorker { fail: f.clone() }) as Box<dyn Worker>
    });

    let sup = Supervisor::new(fast_store(), EventBus::new(), vec![spec]).unwrap();
    sup.start().await.unwrap();

    wait_for(|| {
        let s = sup.worker_status("flaky").unwrap();
        s.state == WorkerState::Crashed && s.restarts == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = sup.worker_status("flaky").unwrap();
    assert_eq!(status.state, WorkerState::Crashed);
    assert_eq!(builds.load(Ordering::SeqCst), 3);
    assert_eq!(status.consecutive_failures, 3);
    assert!(status
        .last_error
        .as_deref()
        .unwrap()
        .contains("flaky worker blew up"));

    // Manual restart after the fault is fixed.
    fail.store(false, Ordering::SeqCst);
    sup.restart_worker("flaky").await.unwrap();
    wait_for(|| sup.worker_status("flaky").unwrap().consecutive_failures == 0).await;
    wait_for(|| sup.worker_status("flaky").unwrap().ticks > 3).await;
    let status = sup.worker_status("flaky").unwrap();
    assert_eq!(status.state, WorkerState::Running);
    assert_eq!(status.restarts, 0);
    assert_eq!(builds.load(Ordering::SeqCst), 4);

    assert!(sup.stop().await.is_clean());
}

#[tokio::test]
async fn tick_timeout_is_a_fault() {
    let entered = Arc::new(AtomicBool::new(false));
    let e = entered.clone();
    let spec = WorkerSpec::new("hung", Duration::from_millis(5), move |_bus: &EventBus| {
        Box::new(SleepyWorker { entered: e.clone() }) as Box<dyn Worker>
    })
    .with_tick_timeout(Duration::from_millis(30));

    let cfg = Config::from_value(json!({
        "supervisor": { "grace_period_ms": 100, "max_restarts": 0 }
    }))
    .unwrap();
    let sup = Supervisor::new(ConfigStore::new(cfg).unwrap(), EventBus::new(), vec![spec]).unwrap();
    sup.start().await.unwrap();

    wait_for(|| state_of(&sup, "hung") == WorkerState::Crashed).await;
    let status = sup.worker_status("hung").unwrap();
    assert!(entered.load(Ordering::SeqCst));
    assert!(status.last_error.unwrap().contains("timeout"));
    assert_eq!(status.restarts, 0);

    // Already crashed: stopping it is clean.
    let report = sup.stop().await;
    assert!(report.is_clean());
    assert_eq!(report.crashed, vec!["hung".to_string()]);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_that_ignores_cancellation_is_force_stopped() {
    let entered = Arc::new(AtomicBool::new(false));
    let e = entered.clone();
    let sleepy = WorkerSpec::new("sleepy", Duration::from_millis(5), move |_bus: &EventBus| {
        Box::new(SleepyWorker { entered: e.clone() }) as Box<dyn Worker>
    });
    let ticks = Arc::new(AtomicU64::new(0));
    let healthy = counting_spec("healthy", ticks.clone(), Arc::new(AtomicBool::new(false)));

    let sup = Supervisor::new(fast_store(), EventBus::new(), vec![sleepy, healthy]).unwrap();
    sup.start().await.unwrap();
    wait_for(|| entered.load(Ordering::SeqCst) && ticks.load(Ordering::SeqCst) > 0).await;

    let report = tokio::time::timeout(Duration::from_secs(3), sup.stop())
        .await
        .expect("stop must finish after the grace period");

    assert!(!report.is_clean());
    assert_eq!(report.forced, vec!["sleepy".to_string()]);
    assert_eq!(state_of(&sup, "sleepy"), WorkerState::Crashed);
    assert_eq!(state_of(&sup, "healthy"), WorkerState::Stopped);
    assert!(sup
        .worker_status("sleepy")
        .unwrap()
        .last_error
        .unwrap()
        .contains("ignored cancellation"));
}

#[tokio::test]
async fn after_stop_no_worker_is_running_or_stopping() {
    let fail = Arc::new(AtomicBool::new(true));
    let f = fail.clone();
    let flaky = WorkerSpec::new("flaky", Duration::from_millis(5), move |_bus: &EventBus| {
        Box::new(FlakyWorker { fail: f.clone() }) as Box<dyn Worker>
    });
    let specs = vec![
        flaky,
        counting_spec("a", Arc::new(AtomicU64::new(0)), Arc::new(AtomicBool::new(false))),
        counting_spec("b", Arc::new(AtomicU64::new(0)), Arc::new(AtomicBool::new(true))),
    ];
    let sup = Supervisor::new(fast_store(), EventBus::new(), specs).unwrap();
    sup.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    sup.stop().await;
    for status in sup.status() {
        assert!(
            matches!(status.state, WorkerState::Stopped | WorkerState::Crashed),
            "{} left in {}",
            status.name,
            status.state
        );
    }
    assert!(!sup.is_running());
}

#[tokio::test]
async fn stop_without_start_marks_everything_stopped() {
    let sup = Supervisor::new(
        fast_store(),
        EventBus::new(),
        vec![counting_spec(
            "idle",
            Arc::new(AtomicU64::new(0)),
            Arc::new(AtomicBool::new(false)),
        )],
    )
    .unwrap();
    let report = sup.stop().await;
    assert!(report.is_clean());
    assert_eq!(state_of(&sup, "idle"), WorkerState::Stopped);
    assert!(matches!(sup.start().await, Err(SupervisorError::NotRunning)));
}

#[tokio::test]
async fn state_changes_are_published() {
    let bus = EventBus::new();
    let mut sub = bus.subscribe(topics::SUPERVISOR);
    let sup = Supervisor::new(
        fast_store(),
        bus.clone(),
        vec![counting_spec(
            "watched",
            Arc::new(AtomicU64::new(0)),
            Arc::new(AtomicBool::new(false)),
        )],
    )
    .unwrap();
    sup.start().await.unwrap();
    wait_for(|| state_of(&sup, "watched") == WorkerState::Running).await;
    sup.stop().await;

    let mut transitions = Vec::new();
    while let Some(msg) = sub.try_recv() {
        let v: Value = msg.payload.decode().unwrap();
        assert_eq!(v["worker"], "watched");
        transitions.push(v["to"].as_str().unwrap().to_string());
    }
    assert_eq!(transitions, vec!["running", "stopping", "stopped"]);
}
