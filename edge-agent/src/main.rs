use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use edge_agent::agent::{Agent, OfflineControlPlane};
use edge_agent::config::AgentConfig;
use edge_agent::logging::{self, LogSettings};
use edge_agent::panic_hook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::from_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = logging::init_logging(&LogSettings::from_config(&config))?;
    panic_hook::install();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        heartbeat = config.heartbeat_interval,
        telemetry = config.telemetry_interval,
        sync = config.sync_interval,
        "edge-agent starting"
    );

    let exit = CancellationToken::new();
    let signal_exit = exit.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal_exit.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let control_plane = Arc::new(OfflineControlPlane::commissioned(config.node_id.clone()));

    let agent = Agent::from_config(config, control_plane, exit)?;
    let shutdown = agent.run().await;

    info!(
        cycles = shutdown.cycles,
        workers = shutdown.workers.total,
        forced = shutdown.workers.forced,
        "edge-agent stopped"
    );
    Ok(())
}
