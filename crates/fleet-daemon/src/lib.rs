//! The `fleetd` daemon: wires the configuration store, event bus, workers
//! and HTTP control surface together and runs them until a terminate signal.

pub mod daemon;
pub mod generator;
pub mod tasks;
