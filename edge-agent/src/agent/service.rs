//! The agent main loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::control_plane::ControlPlane;
use crate::Result;
use crate::config::AgentConfig;
use crate::scheduler::{ActionContext, ActionScheduler, ActionView, ScheduledAction};
use crate::telemetry::{
    EdgeStatus, ReportChannel, StatusBroadcaster, TelemetryAggregator, TelemetryPayload,
};
use crate::worker::StopReport;

pub const HEARTBEAT_ACTION: &str = "heartbeat";
pub const TELEMETRY_ACTION: &str = "telemetry";
pub const SYNC_RESOURCES_ACTION: &str = "sync_resources";

/// Component name used in status reports.
pub const AGENT_COMPONENT: &str = "Agent";

/// Last node document fields acted upon by `sync_resources`.
#[derive(Debug)]
struct SyncState {
    updated: Option<String>,
    vpn_server_id: Option<String>,
    /// Periods applied when the document leaves an interval unset.
    default_telemetry: Duration,
    default_heartbeat: Duration,
}

impl SyncState {
    fn new(config: &AgentConfig) -> Self {
        Self {
            updated: None,
            vpn_server_id: None,
            default_telemetry: Duration::from_secs(config.telemetry_interval),
            default_heartbeat: Duration::from_secs(config.heartbeat_interval),
        }
    }
}

/// Result of a completed agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentShutdown {
    /// Actions run by the main loop.
    pub cycles: u64,
    pub workers: StopReport,
}

/// Wires the periodic actions to the control plane and the telemetry
/// pipeline, and drives them until the exit token fires.
pub struct Agent {
    config: AgentConfig,
    scheduler: ActionScheduler,
    telemetry: Arc<tokio::sync::Mutex<TelemetryAggregator>>,
    control_plane: Arc<dyn ControlPlane>,
    report_channel: ReportChannel<TelemetryPayload>,
    status: StatusBroadcaster,
    exit: CancellationToken,
    sender: Option<JoinHandle<()>>,
    cycles: u64,
}

impl Agent {
    /// Build the agent and its telemetry pipeline from configuration.
    pub fn from_config(
        config: AgentConfig,
        control_plane: Arc<dyn ControlPlane>,
        exit: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let status = StatusBroadcaster::new();
        let telemetry = TelemetryAggregator::from_config(
            &config,
            ReportChannel::new(config.report_capacity),
            status.clone(),
            Arc::new(EdgeStatus::new()),
        );
        Self::new(config, telemetry, status, control_plane, exit)
    }

    /// Build the agent around an existing telemetry aggregator.
    pub fn new(
        config: AgentConfig,
        telemetry: TelemetryAggregator,
        status: StatusBroadcaster,
        control_plane: Arc<dyn ControlPlane>,
        exit: CancellationToken,
    ) -> Result<Self> {
        let report_channel = telemetry.report_channel().clone();
        let telemetry = Arc::new(tokio::sync::Mutex::new(telemetry));
        let mut scheduler = ActionScheduler::with_policy(config.period_policy);

        let heartbeat = Duration::from_secs(config.heartbeat_interval);
        let plane = control_plane.clone();
        scheduler.add(
            ScheduledAction::new(HEARTBEAT_ACTION, heartbeat, move |_ctx: ActionContext| {
                let plane = plane.clone();
                async move { plane.heartbeat().await }
            })
            .with_remaining(heartbeat),
        )?;

        // First telemetry halfway through its period, staggered from the
        // heartbeat.
        let telemetry_period = Duration::from_secs(config.telemetry_interval);
        let aggregator = telemetry.clone();
        scheduler.add(
            ScheduledAction::new(TELEMETRY_ACTION, telemetry_period, move |_ctx: ActionContext| {
                let aggregator = aggregator.clone();
                async move {
                    let outcome = aggregator.lock().await.run().await;
                    debug!(%outcome, "Telemetry cycle finished");
                    Ok(())
                }
            })
            .with_remaining(telemetry_period / 2),
        )?;

        let plane = control_plane.clone();
        let sync_state = Arc::new(Mutex::new(SyncState::new(&config)));
        let sync_exit = exit.clone();
        let sync_status = status.clone();
        scheduler.add(ScheduledAction::new(
            SYNC_RESOURCES_ACTION,
            Duration::from_secs(config.sync_interval),
            move |ctx: ActionContext| {
                sync_resources(
                    ctx,
                    plane.clone(),
                    sync_state.clone(),
                    sync_status.clone(),
                    sync_exit.clone(),
                )
            },
        ))?;

        status.starting(AGENT_COMPONENT);
        Ok(Self {
            config,
            scheduler,
            telemetry,
            control_plane,
            report_channel,
            status,
            exit,
            sender: None,
            cycles: 0,
        })
    }

    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    pub fn status(&self) -> &StatusBroadcaster {
        &self.status
    }

    pub fn telemetry(&self) -> Arc<tokio::sync::Mutex<TelemetryAggregator>> {
        self.telemetry.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Current schedule of the top-level actions.
    pub fn actions(&self) -> Vec<ActionView> {
        self.scheduler.actions()
    }

    /// Time until the next action is due.
    pub fn sleep_time(&self) -> Duration {
        self.scheduler.sleep_time()
    }

    /// Start the monitors and the telemetry sender.
    pub async fn start(&mut self) {
        info!("Starting agent");
        self.telemetry.lock().await.start().await;

        if self.sender.is_none() {
            self.sender = Some(tokio::spawn(send_telemetry(
                self.report_channel.clone(),
                self.control_plane.clone(),
                self.exit.clone(),
            )));
        }
        self.status.running(AGENT_COMPONENT);
    }

    /// Run the next due action.
    pub async fn step(&mut self) -> Option<String> {
        let name = self.scheduler.next().await;
        if name.is_some() {
            self.cycles += 1;
        }
        name
    }

    /// Run until the exit token fires, then shut down.
    pub async fn run(mut self) -> AgentShutdown {
        self.start().await;

        while !self.exit.is_cancelled() {
            self.step().await;
            if self.exit.is_cancelled() {
                break;
            }

            let wait = self.scheduler.sleep_time();
            debug!(?wait, "Waiting for next action");
            tokio::select! {
                _ = self.exit.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.shutdown().await
    }

    /// Stop the sender task and the monitors.
    pub async fn shutdown(mut self) -> AgentShutdown {
        info!("Agent exiting");
        self.exit.cancel();

        if let Some(mut sender) = self.sender.take() {
            let grace = self.config.stop_grace();
            if tokio::time::timeout(grace, &mut sender).await.is_err() {
                warn!("Telemetry sender did not stop in time, aborting");
                sender.abort();
            }
        }

        let mut telemetry = self.telemetry.lock().await;
        let workers = telemetry.stop().await;
        info!("{}", telemetry.registry().summary());

        AgentShutdown {
            cycles: self.cycles,
            workers,
        }
    }
}

/// Check the node document for decommissioning and period changes.
async fn sync_resources(
    ctx: ActionContext,
    control_plane: Arc<dyn ControlPlane>,
    state: Arc<Mutex<SyncState>>,
    status: StatusBroadcaster,
    exit: CancellationToken,
) -> Result<()> {
    let node = control_plane.fetch_node().await?;

    if node.is_decommissioned() {
        warn!(state = %node.state, "Node is being decommissioned, exiting");
        status.failed(AGENT_COMPONENT, format!("node state {}", node.state));
        exit.cancel();
        return Ok(());
    }

    let mut state = state.lock();
    if state.updated != node.updated {
        info!(updated = ?node.updated, "Node document changed, applying intervals");
        let telemetry = node
            .refresh_interval
            .filter(|s| *s > 0)
            .map_or(state.default_telemetry, Duration::from_secs);
        let heartbeat = node
            .heartbeat_interval
            .filter(|s| *s > 0)
            .map_or(state.default_heartbeat, Duration::from_secs);
        ctx.scheduler.edit_period(TELEMETRY_ACTION, telemetry);
        ctx.scheduler.edit_period(HEARTBEAT_ACTION, heartbeat);
        state.updated = node.updated;
    }

    if state.vpn_server_id != node.vpn_server_id {
        info!(
            from = ?state.vpn_server_id,
            to = ?node.vpn_server_id,
            "VPN server changed"
        );
        state.vpn_server_id = node.vpn_server_id;
    }

    Ok(())
}

/// Drain the report channel into the control plane until `exit` fires.
async fn send_telemetry(
    channel: ReportChannel<TelemetryPayload>,
    control_plane: Arc<dyn ControlPlane>,
    exit: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = exit.cancelled() => break,
            payload = channel.recv() => payload,
        };
        if let Err(e) = control_plane.send_telemetry(&payload).await {
            warn!(error = %e, "Failed to send telemetry");
        }
    }
    debug!(pending = channel.len(), "Telemetry sender stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::control_plane::{NodeResource, OfflineControlPlane};
    use crate::telemetry::ComponentState;
    use crate::worker::WorkerRegistry;

    fn config() -> AgentConfig {
        AgentConfig {
            heartbeat_interval: 20,
            telemetry_interval: 60,
            sync_interval: 30,
            ..AgentConfig::default()
        }
    }

    fn agent(plane: Arc<OfflineControlPlane>, exit: CancellationToken) -> Agent {
        let status = StatusBroadcaster::new();
        let telemetry = TelemetryAggregator::new(
            WorkerRegistry::new(),
            ReportChannel::new(4),
            status.clone(),
            Arc::new(EdgeStatus::new()),
        );
        Agent::new(config(), telemetry, status, plane, exit).unwrap()
    }

    fn remaining(agent: &Agent, name: &str) -> f64 {
        agent
            .actions()
            .into_iter()
            .find(|a| a.name == name)
            .unwrap()
            .remaining_secs
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_stagger() {
        let plane = Arc::new(OfflineControlPlane::commissioned("node/1"));
        let agent = agent(plane, CancellationToken::new());

        assert_eq!(remaining(&agent, HEARTBEAT_ACTION), 20.0);
        assert_eq!(remaining(&agent, TELEMETRY_ACTION), 30.0);
        assert_eq!(remaining(&agent, SYNC_RESOURCES_ACTION), 0.0);
        assert_eq!(agent.sleep_time(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_applies_node_intervals_once_per_update() {
        let plane = Arc::new(OfflineControlPlane::commissioned("node/1"));
        plane.set_node(NodeResource {
            id: "node/1".to_string(),
            state: "COMMISSIONED".to_string(),
            updated: Some("2024-05-01T10:00:00Z".to_string()),
            refresh_interval: Some(10),
            heartbeat_interval: Some(5),
            vpn_server_id: None,
        });
        let mut agent = agent(plane, CancellationToken::new());

        assert_eq!(agent.step().await.as_deref(), Some(SYNC_RESOURCES_ACTION));

        let views = agent.actions();
        let telemetry = views.iter().find(|a| a.name == TELEMETRY_ACTION).unwrap();
        assert_eq!(telemetry.period, Duration::from_secs(10));
        assert_eq!(telemetry.remaining_secs, 10.0);
        let heartbeat = views.iter().find(|a| a.name == HEARTBEAT_ACTION).unwrap();
        assert_eq!(heartbeat.period, Duration::from_secs(5));
        assert_eq!(heartbeat.remaining_secs, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_intervals_fall_back_to_config() {
        let plane = Arc::new(OfflineControlPlane::commissioned("node/1"));
        plane.set_node(NodeResource {
            id: "node/1".to_string(),
            state: "COMMISSIONED".to_string(),
            updated: Some("2024-05-01T10:00:00Z".to_string()),
            refresh_interval: Some(10),
            heartbeat_interval: Some(5),
            vpn_server_id: None,
        });
        let mut agent = agent(plane.clone(), CancellationToken::new());
        agent.step().await;

        // The next edit drops both keys.
        plane.set_node(NodeResource {
            id: "node/1".to_string(),
            state: "COMMISSIONED".to_string(),
            updated: Some("2024-05-01T11:00:00Z".to_string()),
            ..NodeResource::default()
        });
        tokio::time::advance(Duration::from_secs(30)).await;
        while agent.step().await.as_deref() != Some(SYNC_RESOURCES_ACTION) {}

        let views = agent.actions();
        let telemetry = views.iter().find(|a| a.name == TELEMETRY_ACTION).unwrap();
        assert_eq!(telemetry.period, Duration::from_secs(60));
        let heartbeat = views.iter().find(|a| a.name == HEARTBEAT_ACTION).unwrap();
        assert_eq!(heartbeat.period, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decommission_fires_exit() {
        let plane = Arc::new(OfflineControlPlane::commissioned("node/1"));
        plane.set_node(NodeResource {
            id: "node/1".to_string(),
            state: "DECOMMISSIONING".to_string(),
            ..NodeResource::default()
        });
        let exit = CancellationToken::new();
        let agent = agent(plane, exit.clone());
        let mut reports = agent.status().subscribe();

        let shutdown = agent.run().await;

        assert!(exit.is_cancelled());
        assert_eq!(shutdown.cycles, 1);

        let mut last = None;
        while let Ok(report) = reports.try_recv() {
            last = Some(report);
        }
        let last = last.unwrap();
        assert_eq!(last.component, AGENT_COMPONENT);
        assert_eq!(last.state, ComponentState::Failed);
        assert_eq!(last.note.as_deref(), Some("node state DECOMMISSIONING"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_interrupts_wait() {
        let plane = Arc::new(OfflineControlPlane::commissioned("node/1"));
        let exit = CancellationToken::new();
        let agent = agent(plane.clone(), exit.clone());

        let run = tokio::spawn(agent.run());
        tokio::time::sleep(Duration::from_secs(25)).await;
        exit.cancel();
        let shutdown = run.await.unwrap();

        // sync at 0s, heartbeat at 20s; the wait for 30s is interrupted.
        assert_eq!(shutdown.cycles, 2);
        assert_eq!(plane.heartbeat_count(), 1);
    }
}
