//! Status sections maintained outside the monitor registry.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Ordered named sections of node state.
///
/// Collaborators such as the orchestrator client replace a whole section at
/// once; the aggregator merges every section into the payload in the order
/// the sections were first set.
#[derive(Debug, Default)]
pub struct EdgeStatus {
    sections: RwLock<Vec<(String, Arc<Map<String, Value>>)>>,
}

impl EdgeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a section, keeping its position.
    pub fn set_section(&self, name: impl Into<String>, data: Map<String, Value>) {
        let name = name.into();
        let data = Arc::new(data);
        let mut sections = self.sections.write();
        match sections.iter_mut().find(|(n, _)| *n == name) {
            Some((_, current)) => *current = data,
            None => sections.push((name, data)),
        }
    }

    pub fn section(&self, name: &str) -> Option<Arc<Map<String, Value>>> {
        self.sections
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
    }

    /// Every section in merge order.
    pub fn sections(&self) -> Vec<(String, Arc<Map<String, Value>>)> {
        self.sections.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sections_keep_first_insertion_order() {
        let status = EdgeStatus::new();
        status.set_section("orchestrator", map(json!({"orchestrator": "docker"})));
        status.set_section("vulnerabilities", map(json!({"vulnerabilities": {"count": 1}})));
        status.set_section("orchestrator", map(json!({"orchestrator": "kubernetes"})));

        let sections = status.sections();
        assert_eq!(sections[0].0, "orchestrator");
        assert_eq!(sections[0].1["orchestrator"], "kubernetes");
        assert_eq!(sections[1].0, "vulnerabilities");
        assert!(status.section("gpio").is_none());
    }
}
