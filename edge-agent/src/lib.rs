//! edge-agent library crate.
//!
//! Runtime core of a fleet-managed edge device: the periodic action
//! scheduler, the supervised monitor registry, the telemetry pipeline and the
//! traffic counter reconciler. Every module is exposed for integration tests.

pub mod agent;
pub mod config;
pub mod counters;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod panic_hook;
pub mod scheduler;
pub mod telemetry;
pub mod utils;
pub mod worker;

pub use error::{Error, Result};
