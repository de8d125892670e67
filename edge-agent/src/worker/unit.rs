//! The capability set every supervised unit implements.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::Result;

/// How a unit is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum UnitMode {
    /// Runs on its own task and schedules itself every period.
    Threaded,
    /// Updated synchronously by the registry on every health check.
    Inline,
}

/// A unit of work producing a fragment of telemetry.
///
/// Implementations publish their data as a complete snapshot at the end of
/// `update`, so `populate` never observes a half-updated record.
#[async_trait]
pub trait MonitorUnit: Send + Sync {
    /// Unique name of the unit.
    fn name(&self) -> &str;

    /// How the registry drives this unit.
    fn mode(&self) -> UnitMode;

    fn is_threaded(&self) -> bool {
        self.mode() == UnitMode::Threaded
    }

    /// Refresh the unit's data.
    async fn update(&self) -> Result<()>;

    /// Whether the unit has published data that can be collected.
    fn is_updated(&self) -> bool;

    /// Merge the latest published data into a telemetry report.
    fn populate(&self, report: &mut Map<String, Value>) -> Result<()>;
}

/// Builds fresh unit instances; invoked on registration and on recreation.
pub type UnitFactory = Arc<dyn Fn() -> Result<Arc<dyn MonitorUnit>> + Send + Sync>;

/// Wrap a closure as a [`UnitFactory`].
pub fn unit_factory<F>(build: F) -> UnitFactory
where
    F: Fn() -> Result<Arc<dyn MonitorUnit>> + Send + Sync + 'static,
{
    Arc::new(build)
}
