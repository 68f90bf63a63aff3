// ---------------------------------------------------------------------------
// HTTP control surface
// ---------------------------------------------------------------------------
//
// Read-only status plus the few commands the fleet accepts from outside:
// reload, config replace, and manual worker restart. Every config write goes
// through `FleetControl::trigger_reload`, the same validated path used at
// startup and by the file watcher.

mod config;
pub mod state;
mod status;
pub mod types;
mod workers;

pub use state::ApiState;
pub use types::*;

pub use self::router::api_router;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

mod router {
    use super::*;
    use axum::{
        http::Method,
        routing::{get, post},
        Router,
    };
    use std::sync::Arc;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    /// Build the control API router.
    pub fn api_router(state: Arc<ApiState>) -> Router {
        Router::new()
            .route("/api/health", get(status::health))
            .route("/api/status", get(status::get_status))
            .route("/api/reload", post(config::reload_config))
            .route(
                "/api/config",
                get(config::get_config).put(config::put_config),
            )
            .route(
                "/api/workers/{name}/restart",
                post(workers::restart_worker),
            )
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::PUT])
                    .allow_headers(Any),
            )
            .with_state(state)
    }
}
