//! Supervised worker registry.
//!
//! The registry owns every monitor unit's lifecycle. Threaded units run as
//! tokio tasks; inline units are updated once per health check. Failure
//! accounting is kept per worker name and survives recreation.
//!
//! # Failure isolation
//!
//! - A failing `update` only increments the failing worker's error count
//! - A panicking threaded unit kills only its own task and is rebuilt from
//!   its factory at the next health check
//! - Inline units are bounded by a timeout; exceeding it is a failure of
//!   that unit for the cycle

mod accounting;
mod registry;
mod unit;

pub use accounting::{EXCEPTION_HISTORY_LIMIT, WorkerAccounting};
pub use registry::{RegistryConfig, StopReport, WorkerRegistry, WorkerStatus};
pub use unit::{MonitorUnit, UnitFactory, UnitMode, unit_factory};
