//! Logging initialisation for fleet services.
//!
//! Every component logs through `tracing`; this crate only decides where the
//! lines go. The core never reads logs back.

pub mod logging;
