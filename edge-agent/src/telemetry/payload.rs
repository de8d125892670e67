//! Telemetry payload schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node status values accepted by the control plane.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum NodeStatus {
    Operational,
    Degraded,
    Unknown,
}

/// JSON shape a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    String,
    Status,
    StringList,
    NumberList,
    ObjectList,
    List,
    Object,
}

impl FieldShape {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldShape::String => value.is_string(),
            FieldShape::Status => value
                .as_str()
                .is_some_and(|s| s.parse::<NodeStatus>().is_ok()),
            FieldShape::StringList => all_items(value, Value::is_string),
            FieldShape::NumberList => all_items(value, Value::is_number),
            FieldShape::ObjectList => all_items(value, Value::is_object),
            FieldShape::List => value.is_array(),
            FieldShape::Object => value.is_object(),
        }
    }
}

fn all_items(value: &Value, check: fn(&Value) -> bool) -> bool {
    value.as_array().is_some_and(|items| items.iter().all(check))
}

/// Fields recognised by the control plane.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayloadField {
    Status,
    StatusNotes,
    CurrentTime,

    // Node configuration
    Components,
    NuvlaboxApiEndpoint,
    NuvlaboxEngineVersion,
    InstallationParameters,
    HostUserHome,

    // Metrics
    Resources,
    LastBoot,
    GpioPins,
    Vulnerabilities,
    InferredLocation,
    Network,
    Temperatures,

    // Host
    OperatingSystem,
    Architecture,
    Ip,
    Hostname,
    DockerServerVersion,

    // Cluster
    NodeId,
    ClusterId,
    ClusterManagers,
    ClusterNodes,
    ClusterNodeRole,
    ClusterNodeLabels,
    SwarmNodeCertExpiryDate,
    ClusterJoinAddress,
    Orchestrator,
    ContainerPlugins,
    KubeletVersion,

    // Raw orchestrator resources
    CoeResources,
}

impl PayloadField {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn shape(self) -> FieldShape {
        use PayloadField::*;
        match self {
            Status => FieldShape::Status,
            StatusNotes | Components | ClusterManagers | ClusterNodes | ContainerPlugins => {
                FieldShape::StringList
            }
            InstallationParameters | Resources | GpioPins | Vulnerabilities | Network
            | CoeResources => FieldShape::Object,
            InferredLocation => FieldShape::NumberList,
            Temperatures => FieldShape::List,
            ClusterNodeLabels => FieldShape::ObjectList,
            CurrentTime
            | NuvlaboxApiEndpoint
            | NuvlaboxEngineVersion
            | HostUserHome
            | LastBoot
            | OperatingSystem
            | Architecture
            | Ip
            | Hostname
            | DockerServerVersion
            | NodeId
            | ClusterId
            | ClusterNodeRole
            | SwarmNodeCertExpiryDate
            | ClusterJoinAddress
            | Orchestrator
            | KubeletVersion => FieldShape::String,
        }
    }
}

/// A field rejected while building a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub reason: &'static str,
}

/// `null`, empty string, empty list or empty object.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Empty values plus `false` and zero.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        other => is_empty_value(other),
    }
}

/// Validated telemetry report.
///
/// Only recognised fields with the expected shape are kept, and empty
/// values are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryPayload {
    fields: BTreeMap<PayloadField, Value>,
}

impl TelemetryPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a payload from merged monitor output.
    pub fn from_map(data: Map<String, Value>) -> (Self, Vec<ValidationIssue>) {
        let mut payload = Self::new();
        let issues = payload.apply(data, is_empty_value);
        (payload, issues)
    }

    /// Merge a status section, skipping falsy entries. Later merges win.
    pub fn merge(&mut self, data: Map<String, Value>) -> Vec<ValidationIssue> {
        self.apply(data, is_falsy)
    }

    fn apply(&mut self, data: Map<String, Value>, skip: fn(&Value) -> bool) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (key, value) in data {
            if skip(&value) {
                continue;
            }
            let Ok(field) = key.parse::<PayloadField>() else {
                issues.push(ValidationIssue {
                    field: key,
                    reason: "unrecognised field",
                });
                continue;
            };
            if !field.shape().accepts(&value) {
                issues.push(ValidationIssue {
                    field: key,
                    reason: "unexpected value shape",
                });
                continue;
            }
            self.fields.insert(field, value);
        }
        issues
    }

    pub fn get(&self, field: PayloadField) -> Option<&Value> {
        self.fields.get(&field)
    }

    pub fn status(&self) -> Option<NodeStatus> {
        self.get(PayloadField::Status)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn set_status(&mut self, status: NodeStatus) {
        self.fields
            .insert(PayloadField::Status, Value::String(status.to_string()));
    }

    pub fn current_time(&self) -> Option<&str> {
        self.get(PayloadField::CurrentTime).and_then(Value::as_str)
    }

    pub fn set_current_time(&mut self, stamp: impl Into<String>) {
        self.fields
            .insert(PayloadField::CurrentTime, Value::String(stamp.into()));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (PayloadField, &Value)> {
        self.fields.iter().map(|(field, value)| (*field, value))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
