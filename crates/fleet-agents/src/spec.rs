use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fleet_bridge::event_bus::EventBus;

use crate::worker::Worker;

/// Builds a fresh worker instance, at start and on every restart.
pub type WorkerFactory = Arc<dyn Fn(&EventBus) -> Box<dyn Worker> + Send + Sync>;

/// Static description of a supervised worker. Registered once; a restart
/// replaces the running instance, never the spec.
#[derive(Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub interval: Duration,
    /// Per-tick limit. Overrides `supervisor.tick_timeout_ms` when set.
    pub tick_timeout: Option<Duration>,
    factory: WorkerFactory,
}

impl WorkerSpec {
    pub fn new<F>(name: impl Into<String>, interval: Duration, factory: F) -> Self
    where
        F: Fn(&EventBus) -> Box<dyn Worker> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            tick_timeout: None,
            factory: Arc::new(factory),
        }
    }

    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = Some(timeout);
        self
    }

    /// Build a new instance.
    pub fn build(&self, bus: &EventBus) -> Box<dyn Worker> {
        (self.factory)(bus)
    }
}

impl fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("tick_timeout", &self.tick_timeout)
            .finish()
    }
}
