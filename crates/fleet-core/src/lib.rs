//! Core building blocks shared by every fleet crate.
//!
//! - [`config`]: the JSON configuration model and its validation rules
//! - [`config_store`]: the versioned, hot-swappable snapshot holder
//! - [`config_watcher`]: reloads the store when the config file changes
//! - [`types`]: worker state and status types reported by the supervisor

pub mod config;
pub mod config_store;
pub mod config_watcher;
pub mod types;
