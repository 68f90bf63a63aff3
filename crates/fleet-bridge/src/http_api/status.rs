use axum::{extract::State, Json};
use std::sync::Arc;

use super::state::ApiState;
use super::types::{HealthResponse, StatusResponse};

/// GET /api/health -- liveness probe.
pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/status -- per-worker state plus bus and config counters.
pub(crate) async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config_version: state.config.version(),
        workers: state.control.status(),
        bus: state.bus.stats(),
    })
}
