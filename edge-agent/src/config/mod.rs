//! Agent configuration.
//!
//! Defaults mirror the intervals the control plane expects from a freshly
//! commissioned node. Every value can be overridden through `EDGE_AGENT_*`
//! environment variables (a `.env` file is honoured).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scheduler::PeriodPolicy;
use crate::{Error, Result};

/// Default heartbeat period in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 20;
/// Default telemetry period in seconds.
pub const DEFAULT_TELEMETRY_INTERVAL: u64 = 60;
/// Default resource synchronisation period in seconds.
pub const DEFAULT_SYNC_INTERVAL: u64 = 30;
/// Default outbound telemetry queue capacity.
pub const DEFAULT_REPORT_CAPACITY: usize = 10;

const ENV_PREFIX: &str = "EDGE_AGENT_";

/// Runtime configuration consumed by the agent core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifier of this node on the control plane.
    pub node_id: String,
    /// Heartbeat period (seconds).
    pub heartbeat_interval: u64,
    /// Telemetry collection period (seconds).
    pub telemetry_interval: u64,
    /// Resource synchronisation period (seconds).
    pub sync_interval: u64,
    /// Monitor names skipped when the telemetry registry is built.
    pub excluded_monitors: Vec<String>,
    /// Capacity of the outbound telemetry queue.
    pub report_capacity: usize,
    /// Grace period granted to each worker on stop (seconds).
    pub stop_grace_period: u64,
    /// Upper bound for a single inline monitor update (seconds).
    pub inline_timeout: u64,
    /// How `edit_period` treats the countdown of a running action.
    pub period_policy: PeriodPolicy,
    /// File holding persisted traffic counter state.
    pub network_state_file: PathBuf,
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Raise the default log level to debug.
    pub debug: bool,
    /// Report per-core CPU load in the resources monitor.
    pub per_core_cpu: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: "local".to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            excluded_monitors: Vec::new(),
            report_capacity: DEFAULT_REPORT_CAPACITY,
            stop_grace_period: 5,
            inline_timeout: 10,
            period_policy: PeriodPolicy::Clamp,
            network_state_file: PathBuf::from("/var/lib/edge-agent/network-stats.json"),
            log_dir: None,
            debug: false,
            per_core_cpu: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Keys are the full variable names, e.g. `EDGE_AGENT_HEARTBEAT_INTERVAL`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(v) = get("NODE_ID") {
            config.node_id = v;
        }
        if let Some(v) = get("HEARTBEAT_INTERVAL") {
            config.heartbeat_interval = parse_value("HEARTBEAT_INTERVAL", &v)?;
        }
        if let Some(v) = get("TELEMETRY_INTERVAL") {
            config.telemetry_interval = parse_value("TELEMETRY_INTERVAL", &v)?;
        }
        if let Some(v) = get("SYNC_INTERVAL") {
            config.sync_interval = parse_value("SYNC_INTERVAL", &v)?;
        }
        if let Some(v) = get("EXCLUDED_MONITORS") {
            config.excluded_monitors = parse_exclusions(&v);
        }
        if let Some(v) = get("REPORT_CAPACITY") {
            config.report_capacity = parse_value("REPORT_CAPACITY", &v)?;
        }
        if let Some(v) = get("STOP_GRACE_PERIOD") {
            config.stop_grace_period = parse_value("STOP_GRACE_PERIOD", &v)?;
        }
        if let Some(v) = get("INLINE_TIMEOUT") {
            config.inline_timeout = parse_value("INLINE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("PERIOD_POLICY") {
            config.period_policy = parse_value("PERIOD_POLICY", &v)?;
        }
        if let Some(v) = get("NETWORK_STATE_FILE") {
            config.network_state_file = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_DIR") {
            config.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DEBUG") {
            config.debug = parse_flag("DEBUG", &v)?;
        }
        if let Some(v) = get("PER_CORE_CPU") {
            config.per_core_cpu = parse_flag("PER_CORE_CPU", &v)?;
        }

        config.validate()?;
        debug!(?config, "Loaded agent configuration");
        Ok(config)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("telemetry_interval", self.telemetry_interval),
            ("sync_interval", self.sync_interval),
            ("inline_timeout", self.inline_timeout),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{name} must be a positive number of seconds")));
            }
        }
        if self.report_capacity == 0 {
            return Err(Error::config("report_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period)
    }

    pub fn inline_timeout(&self) -> Duration {
        Duration::from_secs(self.inline_timeout)
    }
}

/// Parse the exclusion list the way the installer writes it: a comma
/// separated string that may carry stray single quotes.
pub fn parse_exclusions(raw: &str) -> Vec<String> {
    raw.replace('\'', "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::config(format!("Invalid {ENV_PREFIX}{name} '{raw}': {e}")))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "Invalid {ENV_PREFIX}{name} '{raw}': expected a boolean"
        ))),
    }
}
