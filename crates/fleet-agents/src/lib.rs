//! Supervised workers for the fleet.
//!
//! A [`worker::Worker`] does one unit of periodic work per `tick`. The
//! [`supervisor::Supervisor`] schedules every registered [`spec::WorkerSpec`]
//! on its own loop, enforces at most one tick in flight per worker, restarts
//! crashed workers with exponential backoff, and stops them within a grace
//! period.

pub mod backoff;
pub mod generic;
pub mod recommender;
pub mod refiner;
pub mod spec;
pub mod state_machine;
pub mod supervisor;
pub mod task_runner;
pub mod worker;
