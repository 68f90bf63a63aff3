//! Bridge layer between the fleet core and the outside world.
//!
//! - [`event_bus`]: in-process topic pub/sub shared by all workers
//! - [`protocol`]: the immutable [`protocol::Message`] carried on the bus
//! - [`control`]: the [`control::FleetControl`] seam the HTTP layer drives
//! - [`http_api`]: Axum-based control surface (status, reload, config)

pub mod api_error;
pub mod control;
pub mod event_bus;
pub mod http_api;
pub mod protocol;
