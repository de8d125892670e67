//! Traffic counter reconciliation.
//!
//! Kernel interface counters restart from zero whenever an interface is
//! brought down, a driver reloads or the device reboots. The
//! [`CounterReconciler`] turns those raw readings into cumulative traffic
//! totals that survive both counter resets and agent restarts, with the help
//! of a [`CounterStore`] holding the last persisted state.

mod reconciler;
mod source;
mod store;

pub use reconciler::{CounterReconciler, InterfaceTraffic, RawCounters};
pub use source::{CounterSource, MemoryCounters, SysinfoCounters};
pub use store::{
    CounterStore, DirectionRecord, InterfaceRecord, JsonFileStore, MemoryStore, PersistedCounters,
};
