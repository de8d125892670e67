//! Logging setup.
//!
//! Console output always; a daily rolling file when a log directory is
//! configured. Timestamps use the local timezone.

use std::path::PathBuf;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AgentConfig;
use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "edge_agent=info";

/// Filter directive used when debug logging is requested.
pub const DEBUG_LOG_FILTER: &str = "edge_agent=debug";

/// Variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "EDGE_AGENT_LOG";

const LOG_FILE_PREFIX: &str = "edge-agent.log";

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// What [`init_logging`] needs to know.
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    pub log_dir: Option<PathBuf>,
    pub debug: bool,
}

impl LogSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            debug: config.debug,
        }
    }

    /// Filter directive: an explicit environment directive wins over the
    /// debug flag.
    fn directive<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(LOG_ENV)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| {
                if self.debug {
                    DEBUG_LOG_FILTER.to_string()
                } else {
                    DEFAULT_LOG_FILTER.to_string()
                }
            })
    }
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the process.
pub fn init_logging(settings: &LogSettings) -> crate::Result<Option<WorkerGuard>> {
    let directive = settings.directive(|key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| crate::Error::config(format!("invalid log filter '{directive}': {e}")))?;

    let (file_layer, guard) = match &settings.log_dir {
        Some(log_dir) => {
            fs::ensure_dir_all_sync_with_op("creating log directory", log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}
