//! Component lifecycle status events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle state of a supervised component.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ComponentState {
    Starting,
    Running,
    Failed,
}

/// A component's state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub component: String,
    pub state: ComponentState,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StatusReport {
    pub fn new(component: impl Into<String>, state: ComponentState) -> Self {
        Self {
            component: component.into(),
            state,
            timestamp: Utc::now(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Fire-and-forget fan-out of [`StatusReport`]s.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<StatusReport>,
}

impl StatusBroadcaster {
    /// Create a new broadcaster with default capacity (64).
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusReport> {
        self.sender.subscribe()
    }

    /// Publish a report. Returns how many subscribers received it.
    pub fn publish(&self, report: StatusReport) -> usize {
        self.sender.send(report).unwrap_or(0)
    }

    pub fn starting(&self, component: &str) -> usize {
        self.publish(StatusReport::new(component, ComponentState::Starting))
    }

    pub fn running(&self, component: &str) -> usize {
        self.publish(StatusReport::new(component, ComponentState::Running))
    }

    pub fn failed(&self, component: &str, note: impl Into<String>) -> usize {
        self.publish(StatusReport::new(component, ComponentState::Failed).with_note(note))
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
