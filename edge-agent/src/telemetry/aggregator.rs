//! Telemetry collection cycle.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::channel::ReportChannel;
use super::edge_status::EdgeStatus;
use super::payload::{TelemetryPayload, ValidationIssue};
use super::status::StatusBroadcaster;
use crate::config::AgentConfig;
use crate::monitor::{MonitorSettings, register_monitors};
use crate::worker::{RegistryConfig, StopReport, WorkerRegistry};

/// Component name used in status reports.
pub const TELEMETRY_COMPONENT: &str = "Telemetry";

/// What happened to a cycle's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Queued without evicting anything.
    Enqueued,
    /// Queued after evicting the oldest payload.
    DroppedOldest,
    /// Not queued.
    Abandoned,
}

type WallClock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Second-precision UTC stamps that strictly increase.
struct TimestampClock {
    now: WallClock,
    last: Option<DateTime<Utc>>,
}

impl TimestampClock {
    fn system() -> Self {
        Self {
            now: Box::new(Utc::now),
            last: None,
        }
    }

    fn next_stamp(&mut self) -> String {
        let now = (self.now)().trunc_subsecs(0);
        let stamp = match self.last {
            Some(last) if now <= last => last + TimeDelta::seconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

/// Merges monitor output into telemetry payloads and queues them.
pub struct TelemetryAggregator {
    registry: WorkerRegistry,
    report_channel: ReportChannel<TelemetryPayload>,
    status: StatusBroadcaster,
    edge_status: Arc<EdgeStatus>,
    clock: TimestampClock,
    last_payload: Option<TelemetryPayload>,
}

impl TelemetryAggregator {
    /// Wrap an already populated registry. Publishes `STARTING`.
    pub fn new(
        registry: WorkerRegistry,
        report_channel: ReportChannel<TelemetryPayload>,
        status: StatusBroadcaster,
        edge_status: Arc<EdgeStatus>,
    ) -> Self {
        info!("Creating Telemetry object...");
        status.starting(TELEMETRY_COMPONENT);
        Self {
            registry,
            report_channel,
            status,
            edge_status,
            clock: TimestampClock::system(),
            last_payload: None,
        }
    }

    /// Build the monitor registry from configuration, skipping excluded
    /// monitors.
    pub fn from_config(
        config: &AgentConfig,
        report_channel: ReportChannel<TelemetryPayload>,
        status: StatusBroadcaster,
        edge_status: Arc<EdgeStatus>,
    ) -> Self {
        Self::with_monitors(
            config,
            &MonitorSettings::from_config(config),
            report_channel,
            status,
            edge_status,
        )
    }

    /// Like [`TelemetryAggregator::from_config`], with explicit monitor
    /// settings.
    pub fn with_monitors(
        config: &AgentConfig,
        settings: &MonitorSettings,
        report_channel: ReportChannel<TelemetryPayload>,
        status: StatusBroadcaster,
        edge_status: Arc<EdgeStatus>,
    ) -> Self {
        if !config.excluded_monitors.is_empty() {
            info!(
                "Excluded monitors received in Telemetry: {:?}",
                config.excluded_monitors
            );
        }
        let mut registry = WorkerRegistry::with_config(RegistryConfig {
            stop_grace: config.stop_grace(),
            inline_timeout: config.inline_timeout(),
        });
        let registered = register_monitors(&mut registry, settings, &config.excluded_monitors);
        debug!(monitors = ?registered, "Monitors registered");
        Self::new(registry, report_channel, status, edge_status)
    }

    /// Replace the wall clock used for `current_time`.
    pub fn with_clock<F>(mut self, now: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = TimestampClock {
            now: Box::new(now),
            last: None,
        };
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut WorkerRegistry {
        &mut self.registry
    }

    pub fn report_channel(&self) -> &ReportChannel<TelemetryPayload> {
        &self.report_channel
    }

    pub fn edge_status(&self) -> &Arc<EdgeStatus> {
        &self.edge_status
    }

    /// Payload built by the latest cycle.
    pub fn last_payload(&self) -> Option<&TelemetryPayload> {
        self.last_payload.as_ref()
    }

    /// Start threaded monitors and run a first health pass.
    pub async fn start(&mut self) {
        self.registry.start();
        self.registry.health_check().await;
    }

    pub async fn stop(&mut self) -> StopReport {
        self.registry.stop().await
    }

    /// Run one telemetry cycle.
    pub async fn run(&mut self) -> DeliveryOutcome {
        self.status.running(TELEMETRY_COMPONENT);

        info!("Collecting monitor metrics...");
        self.registry.health_check().await;
        let collected = self.collect_monitor_metrics();
        let (mut payload, issues) = TelemetryPayload::from_map(collected);
        log_issues("monitors", &issues);

        info!("Translating telemetry data");
        self.sync_edge_status(&mut payload);

        // Always changes, so two cycles never produce the same payload.
        payload.set_current_time(self.clock.next_stamp());

        if tracing::enabled!(tracing::Level::DEBUG) {
            match payload.to_json() {
                Ok(json) => debug!("Writing telemetry to Agent Queue: {}", json),
                Err(e) => debug!(error = %e, "Telemetry payload is not serializable"),
            }
        }

        let outcome = self.deliver(payload.clone());
        self.last_payload = Some(payload);
        outcome
    }

    fn collect_monitor_metrics(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for unit in self.registry.units() {
            if !unit.is_updated() {
                info!("Data not updated yet in monitor {}", unit.name());
                continue;
            }
            // A failing monitor must not leave half of its fields behind.
            let mut contribution = Map::new();
            match unit.populate(&mut contribution) {
                Ok(()) => merged.extend(contribution),
                Err(e) => warn!(
                    monitor = unit.name(),
                    error = %e,
                    "Error retrieving data from monitor"
                ),
            }
        }
        merged
    }

    fn sync_edge_status(&self, payload: &mut TelemetryPayload) {
        for (name, section) in self.edge_status.sections() {
            let issues = payload.merge(section.as_ref().clone());
            log_issues(&name, &issues);
        }
    }

    fn deliver(&self, payload: TelemetryPayload) -> DeliveryOutcome {
        match self.report_channel.force_send(payload) {
            Ok(None) => DeliveryOutcome::Enqueued,
            Ok(Some(_)) => {
                warn!(
                    "Telemetry Queue is full, agent not consuming data... Discarding oldest telemetry."
                );
                DeliveryOutcome::DroppedOldest
            }
            Err(_) => {
                error!(
                    capacity = self.report_channel.capacity(),
                    "Telemetry could not be queued, discarding this cycle"
                );
                DeliveryOutcome::Abandoned
            }
        }
    }
}

fn log_issues(source: &str, issues: &[ValidationIssue]) {
    for issue in issues {
        warn!(
            source,
            field = %issue.field,
            reason = issue.reason,
            "Dropping telemetry field"
        );
    }
}
