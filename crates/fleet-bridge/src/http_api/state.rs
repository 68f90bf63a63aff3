use std::sync::Arc;
use std::time::Instant;

use fleet_core::config_store::{ConfigSource, ConfigStore};

use crate::control::FleetControl;
use crate::event_bus::EventBus;

/// Shared state for all HTTP handlers.
pub struct ApiState {
    pub control: Arc<dyn FleetControl>,
    pub config: ConfigStore,
    pub bus: EventBus,
    /// Where `POST /api/reload` reads from. `None` when the daemon was
    /// started without a config file.
    pub reload_source: Option<ConfigSource>,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(control: Arc<dyn FleetControl>, config: ConfigStore, bus: EventBus) -> Self {
        Self {
            control,
            config,
            bus,
            reload_source: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_reload_source(mut self, source: ConfigSource) -> Self {
        self.reload_source = Some(source);
        self
    }
}
