use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_agents::generic::GenericAgent;
use fleet_agents::recommender::{RecommendationGenerator, Recommender};
use fleet_agents::refiner::Refiner;
use fleet_agents::spec::WorkerSpec;
use fleet_agents::supervisor::{StopReport, Supervisor};
use fleet_agents::task_runner::TaskRunner;
use fleet_agents::worker::Worker;
use fleet_bridge::control::FleetControl;
use fleet_bridge::event_bus::EventBus;
use fleet_bridge::http_api::{api_router, ApiState};
use fleet_bridge::protocol::topics;
use fleet_core::config::Config;
use fleet_core::config_store::{ConfigSnapshot, ConfigSource, ConfigStore};
use fleet_core::config_watcher::{ConfigWatcher, ConfigWatcherConfig};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::generator::ChatCompletionsGenerator;
use crate::tasks::builtin_registry;

/// How long the API server may take to drain connections after shutdown.
const API_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub const TASK_RUNNER: &str = "task_runner";
pub const REFINER: &str = "refiner";
pub const RECOMMENDER: &str = "recommender";

// ---------------------------------------------------------------------------
// Worker wiring
// ---------------------------------------------------------------------------

/// The fixed worker set for `config`: the task runner, the refiner, the
/// recommender when a generator is available, and one heartbeat agent per
/// entry in `agents`.
pub fn worker_specs(
    config: &Config,
    generator: Option<Arc<dyn RecommendationGenerator>>,
) -> Vec<WorkerSpec> {
    let intervals = &config.intervals;
    let mut specs = vec![
        WorkerSpec::new(
            TASK_RUNNER,
            Duration::from_secs(intervals.task_runner_secs),
            |_bus: &EventBus| -> Box<dyn Worker> { Box::new(TaskRunner::new(builtin_registry())) },
        ),
        WorkerSpec::new(
            REFINER,
            Duration::from_secs(intervals.refiner_secs),
            |bus: &EventBus| -> Box<dyn Worker> { Box::new(Refiner::new(bus)) },
        ),
    ];

    if let Some(generator) = generator {
        specs.push(WorkerSpec::new(
            RECOMMENDER,
            Duration::from_secs(intervals.recommender_secs),
            move |_bus: &EventBus| -> Box<dyn Worker> {
                Box::new(Recommender::new(generator.clone()))
            },
        ));
    }

    for name in &config.agents {
        specs.push(WorkerSpec::new(
            name.clone(),
            Duration::from_secs(intervals.agent_secs),
            |_bus: &EventBus| -> Box<dyn Worker> { Box::new(GenericAgent::new()) },
        ));
    }
    specs
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// The fleet daemon.
///
/// Owns the configuration store, the event bus and the supervisor, serves the
/// control API, and runs until the shutdown token is cancelled (e.g. via
/// ctrl-c or SIGTERM).
pub struct Daemon {
    store: ConfigStore,
    source: Option<ConfigSource>,
    bus: EventBus,
    supervisor: Supervisor,
    api_state: Arc<ApiState>,
    shutdown: CancellationToken,
    watch_config: bool,
}

impl Daemon {
    /// Create a daemon for `store`. `source` is where reloads read from; a
    /// recommender is registered when `recommender.endpoint` is set.
    pub fn new(store: ConfigStore, source: Option<ConfigSource>) -> Result<Self> {
        let generator = ChatCompletionsGenerator::from_config(&store.current().config.recommender)
            .map(|g| {
                info!(url = %g.url(), "recommendation endpoint configured");
                Arc::new(g) as Arc<dyn RecommendationGenerator>
            });
        Self::with_generator(store, source, generator)
    }

    /// Create a daemon with an explicit recommendation generator.
    pub fn with_generator(
        store: ConfigStore,
        source: Option<ConfigSource>,
        generator: Option<Arc<dyn RecommendationGenerator>>,
    ) -> Result<Self> {
        let bus = EventBus::new();
        let specs = worker_specs(&store.current().config, generator);
        let supervisor =
            Supervisor::new(store.clone(), bus.clone(), specs).context("invalid worker set")?;

        let control: Arc<dyn FleetControl> = Arc::new(supervisor.clone());
        let mut state = ApiState::new(control, store.clone(), bus.clone());
        if let Some(ref source) = source {
            state = state.with_reload_source(source.clone());
        }

        Ok(Self {
            store,
            source,
            bus,
            supervisor,
            api_state: Arc::new(state),
            shutdown: CancellationToken::new(),
            watch_config: true,
        })
    }

    /// Enable or disable hot reload of a file-backed configuration.
    pub fn set_watch_config(&mut self, watch: bool) {
        self.watch_config = watch;
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Send the shutdown signal.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn api_state(&self) -> &Arc<ApiState> {
        &self.api_state
    }

    fn spawn_watcher(&self) -> Option<ConfigWatcher> {
        if !self.watch_config {
            return None;
        }
        let Some(ConfigSource::File(path)) = &self.source else {
            return None;
        };
        match ConfigWatcher::spawn(
            self.store.clone(),
            ConfigWatcherConfig::new(path.clone()),
            self.shutdown.child_token(),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "config watcher unavailable, hot reload disabled");
                None
            }
        }
    }

    /// Run the daemon on a pre-bound listener until shutdown (blocking).
    ///
    /// The caller binds the `TcpListener` (e.g. to port 0 for an
    /// OS-assigned port). Returns what the supervisor reported on stop.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<StopReport> {
        self.supervisor
            .start()
            .await
            .context("failed to start supervisor")?;
        info!(workers = ?self.supervisor.worker_names(), "supervisor running");

        let watcher = self.spawn_watcher();
        let forwarder = tokio::spawn(forward_config_changes(
            self.store.subscribe(),
            self.bus.clone(),
            self.shutdown.clone(),
        ));

        let api_router = api_router(self.api_state.clone());
        let bind_addr = listener.local_addr()?;
        let drain = self.shutdown.clone();
        let api_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, api_router)
                .with_graceful_shutdown(async move { drain.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "API server error");
            }
        });
        info!(%bind_addr, "API server listening");

        self.shutdown.cancelled().await;
        info!("shutdown requested, stopping workers");

        let report = self.supervisor.stop().await;

        if let Some(watcher) = watcher {
            if tokio::task::spawn_blocking(move || watcher.stop()).await.is_err() {
                warn!("config watcher did not stop cleanly");
            }
        }
        if forwarder.await.is_err() {
            warn!("config forwarder task failed");
        }
        self.bus.shutdown();

        let abort = api_handle.abort_handle();
        if tokio::time::timeout(API_DRAIN_TIMEOUT, api_handle).await.is_err() {
            warn!("API server did not drain in time");
            abort.abort();
        }

        if report.is_clean() {
            info!(crashed = ?report.crashed, "daemon stopped");
        } else {
            warn!(forced = ?report.forced, crashed = ?report.crashed, "daemon stopped with force-terminated workers");
        }
        Ok(report)
    }

    /// Run the daemon as a standalone server (blocking).
    ///
    /// Binds to `daemon.host:daemon.port` from the current configuration.
    pub async fn run(&self) -> Result<StopReport> {
        let snapshot = self.store.current();
        let bind_addr = format!("{}:{}", snapshot.config.daemon.host, snapshot.config.daemon.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.run_with_listener(listener).await
    }
}

/// Republish every configuration swap on the `config` topic.
async fn forward_config_changes(
    mut rx: watch::Receiver<Arc<ConfigSnapshot>>,
    bus: EventBus,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                debug!(version = snapshot.version, "forwarding configuration change");
                bus.publish(
                    topics::CONFIG,
                    json!({"version": snapshot.version, "loaded_at": snapshot.loaded_at}),
                );
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Process lifecycle
// ---------------------------------------------------------------------------

/// Wait for ctrl-c or, on unix, SIGTERM. Returns the name of the signal.
pub async fn terminate_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "ctrl_c"),
            _ = term.recv() => Ok("sigterm"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl_c")
    }
}

/// Process exit status for a finished run: 0 when every worker stopped on
/// its own, 1 when any had to be force-terminated.
pub fn exit_status(report: &StopReport) -> u8 {
    if report.is_clean() {
        0
    } else {
        1
    }
}
