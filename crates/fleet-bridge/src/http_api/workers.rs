use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::state::ApiState;
use super::types::RestartResponse;
use crate::api_error::ApiError;

/// POST /api/workers/{name}/restart -- replace a worker with a fresh
/// instance. Clears its failure and restart counters.
///
/// **Response:** 200 OK, 404 if no worker has that name.
pub(crate) async fn restart_worker(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<Json<RestartResponse>, ApiError> {
    state.control.restart_worker(&name).await?;
    Ok(Json(RestartResponse { restarted: name }))
}
