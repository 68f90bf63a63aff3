use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use fleet_core::config_store::{ConfigSnapshot, ConfigSource};

use super::state::ApiState;
use super::types::ReloadResponse;
use crate::api_error::ApiError;

/// GET /api/config -- the snapshot currently in effect.
///
/// **Response:** 200 OK with `{version, loaded_at, config}`. Unknown
/// top-level fields from the source document are included.
pub(crate) async fn get_config(State(state): State<Arc<ApiState>>) -> Json<ConfigSnapshot> {
    Json(state.config.current().as_ref().clone())
}

/// PUT /api/config -- replace the running configuration.
///
/// The body is validated exactly like a reload from disk. Nothing is written
/// back to the config file.
///
/// **Request Body:** complete config JSON object.
/// **Response:** 200 OK with the new snapshot, 400 if the body is not JSON
/// or fails validation (the running config is unchanged).
pub(crate) async fn put_config(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<ConfigSnapshot>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let snapshot = state.control.trigger_reload(&ConfigSource::Value(body))?;
    info!(version = snapshot.version, "configuration replaced via API");
    Ok(Json(snapshot.as_ref().clone()))
}

/// POST /api/reload -- re-read the daemon's config source.
///
/// **Response:** 200 OK with `{version, loaded_at}`, 400 with the load or
/// validation error.
pub(crate) async fn reload_config(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let source = state
        .reload_source
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("no configuration source to reload from".into()))?;
    let snapshot = state.control.trigger_reload(source)?;
    Ok(Json(ReloadResponse {
        version: snapshot.version,
        loaded_at: snapshot.loaded_at,
    }))
}
