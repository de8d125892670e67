//! Agent main loop and its control plane boundary.
//!
//! The [`Agent`] registers three periodic actions on an
//! [`ActionScheduler`](crate::scheduler::ActionScheduler):
//!
//! - `heartbeat`: tells the control plane the node is alive
//! - `telemetry`: runs one telemetry cycle
//! - `sync_resources`: reads the node document, exits on decommission and
//!   applies interval changes
//!
//! The loop runs one action, then waits for the next deadline or for the
//! exit token, whichever comes first.

mod control_plane;
mod service;

pub use control_plane::{ControlPlane, DECOMMISSION_PREFIX, NodeResource, OfflineControlPlane};
pub use service::{
    AGENT_COMPONENT, Agent, AgentShutdown, HEARTBEAT_ACTION, SYNC_RESOURCES_ACTION,
    TELEMETRY_ACTION,
};
