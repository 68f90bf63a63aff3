use serde::Serialize;

use fleet_core::types::WorkerStatus;

use crate::event_bus::BusStats;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub config_version: u64,
    pub workers: Vec<WorkerStatus>,
    pub bus: BusStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadResponse {
    pub version: u64,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartResponse {
    pub restarted: String,
}
