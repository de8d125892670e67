//! Telemetry pipeline.
//!
//! Each cycle the [`TelemetryAggregator`] health-checks the monitor
//! registry, merges what the monitors and the [`EdgeStatus`] sections
//! published into a [`TelemetryPayload`], stamps it and queues it on the
//! [`ReportChannel`] for the transport. When the queue is full the oldest
//! payload is evicted.

mod aggregator;
mod channel;
mod edge_status;
mod payload;
mod status;

pub use aggregator::{DeliveryOutcome, TELEMETRY_COMPONENT, TelemetryAggregator};
pub use channel::ReportChannel;
pub use edge_status::EdgeStatus;
pub use payload::{
    FieldShape, NodeStatus, PayloadField, TelemetryPayload, ValidationIssue, is_empty_value,
    is_falsy,
};
pub use status::{ComponentState, StatusBroadcaster, StatusReport};
