//! Worker registry: lifecycle, health checks and status reporting.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accounting::WorkerAccounting;
use super::unit::{MonitorUnit, UnitFactory};
use crate::Error;
use crate::scheduler::panic_message;

type SharedAccounting = Arc<Mutex<WorkerAccounting>>;

/// Configuration for the worker registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Time each threaded worker is given to stop before it is aborted.
    pub stop_grace: Duration,
    /// Upper bound for a single inline update.
    pub inline_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
            inline_timeout: Duration::from_secs(10),
        }
    }
}

/// A running threaded unit.
struct RunningTask {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

/// Registry entry for one named worker.
struct WorkerHandle {
    name: String,
    period: Duration,
    factory: UnitFactory,
    actions: Vec<String>,
    unit: Arc<dyn MonitorUnit>,
    task: Option<RunningTask>,
    accounting: SharedAccounting,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.handle.is_finished())
    }
}

/// Per-worker summary for logs and status endpoints.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub name: String,
    pub period: Duration,
    /// Time until the worker is next expected to run.
    pub remaining: Duration,
    pub threaded: bool,
    pub alive: bool,
    pub error_count: u64,
    /// Distinct failure kinds observed.
    pub error_kinds: BTreeSet<String>,
    pub restarts: u64,
    pub last_process_duration: Option<Duration>,
    pub actions: Vec<String>,
}

/// Outcome of [`WorkerRegistry::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Threaded workers that had a task when stop began.
    pub total: usize,
    /// Tasks that finished within the grace period.
    pub graceful: usize,
    /// Tasks that had to be aborted.
    pub forced: usize,
}

impl StopReport {
    pub fn all_graceful(&self) -> bool {
        self.forced == 0
    }
}

/// Named collection of supervised workers.
///
/// Only the registry starts, stops or recreates a worker's task.
pub struct WorkerRegistry {
    workers: Vec<WorkerHandle>,
    config: RegistryConfig,
    cancellation_token: CancellationToken,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            workers: Vec::new(),
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.iter().any(|w| w.name == name)
    }

    /// Worker names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.name.as_str())
    }

    /// Current unit instances in registration order.
    pub fn units(&self) -> Vec<Arc<dyn MonitorUnit>> {
        self.workers.iter().map(|w| w.unit.clone()).collect()
    }

    pub fn unit(&self, name: &str) -> Option<Arc<dyn MonitorUnit>> {
        self.find(name).map(|w| w.unit.clone())
    }

    /// Whether the worker's task is running. `None` for unknown names.
    ///
    /// Inline workers never have a task and always report `false`.
    pub fn is_alive(&self, name: &str) -> Option<bool> {
        self.find(name).map(WorkerHandle::is_alive)
    }

    pub fn accounting(&self, name: &str) -> Option<WorkerAccounting> {
        self.find(name).map(|w| w.accounting.lock().clone())
    }

    pub fn error_count(&self, name: &str) -> Option<u64> {
        self.find(name).map(|w| w.accounting.lock().error_count())
    }

    fn find(&self, name: &str) -> Option<&WorkerHandle> {
        self.workers.iter().find(|w| w.name == name)
    }

    /// Register a worker.
    ///
    /// The first unit instance is built right away. Returns `false` without
    /// touching the registry when the name is taken or the factory fails.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        factory: UnitFactory,
        actions: Vec<String>,
    ) -> bool {
        let name = name.into();
        if self.contains(&name) {
            warn!("Worker {} already registered", name);
            return false;
        }

        let unit = match factory() {
            Ok(unit) => unit,
            Err(e) => {
                warn!(worker = %name, error = %e, "Failed to build worker");
                return false;
            }
        };

        debug!("Registering worker: {} in manager", name);
        self.workers.push(WorkerHandle {
            name,
            period,
            factory,
            actions,
            unit,
            task: None,
            accounting: Arc::new(Mutex::new(WorkerAccounting::new())),
        });
        true
    }

    /// Remove a worker, aborting its task if one is running.
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(index) = self.workers.iter().position(|w| w.name == name) else {
            return false;
        };
        let worker = self.workers.remove(index);
        if let Some(task) = worker.task {
            task.token.cancel();
            task.handle.abort();
        }
        info!(worker = %name, "Worker unregistered");
        true
    }

    /// Start every threaded worker that is not already running.
    pub fn start(&mut self) {
        let parent = self.cancellation_token.clone();
        for worker in &mut self.workers {
            if !worker.unit.is_threaded() {
                continue;
            }
            if worker.is_alive() {
                debug!("Worker {} already running", worker.name);
                continue;
            }
            info!("Starting {} worker...", worker.name);
            spawn_worker(worker, &parent);
        }
    }

    /// Stop every threaded worker.
    ///
    /// Each task is cancelled and given the configured grace period, then
    /// aborted.
    pub async fn stop(&mut self) -> StopReport {
        let mut report = StopReport::default();

        for worker in &self.workers {
            if let Some(task) = &worker.task {
                info!("Stopping {} worker...", worker.name);
                task.token.cancel();
                report.total += 1;
            }
        }

        for worker in &mut self.workers {
            let Some(mut task) = worker.task.take() else {
                continue;
            };
            match tokio::time::timeout(self.config.stop_grace, &mut task.handle).await {
                Ok(Ok(())) => report.graceful += 1,
                Ok(Err(e)) if e.is_panic() => {
                    warn!(worker = %worker.name, "Worker panicked while stopping");
                    report.graceful += 1;
                }
                Ok(Err(_)) => report.graceful += 1,
                Err(_) => {
                    warn!(
                        worker = %worker.name,
                        grace = ?self.config.stop_grace,
                        "Worker did not stop in time, aborting"
                    );
                    task.handle.abort();
                    report.forced += 1;
                }
            }
        }

        info!(
            total = report.total,
            graceful = report.graceful,
            forced = report.forced,
            "Workers stopped"
        );
        report
    }

    /// Check every worker once.
    ///
    /// Threaded workers with a dead task are rebuilt from their factory and
    /// restarted, keeping their accounting. Inline workers are updated in
    /// place, bounded by the inline timeout.
    pub async fn health_check(&mut self) {
        let parent = self.cancellation_token.clone();
        let inline_timeout = self.config.inline_timeout;

        for worker in &mut self.workers {
            debug!(
                "Worker: {} - Threaded: {} - Alive: {}",
                worker.name,
                worker.unit.is_threaded(),
                worker.is_alive()
            );

            if worker.unit.is_threaded() {
                check_threaded(worker, &parent).await;
            } else {
                run_inline(worker, inline_timeout).await;
            }
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let durations: Vec<String> = self
                .workers
                .iter()
                .map(|w| {
                    format!(
                        "{}={:?}",
                        w.name,
                        w.accounting.lock().last_process_duration()
                    )
                })
                .collect();
            debug!("Workers processing duration: {}", durations.join(", "));
        }
    }

    /// Summary of every worker, in registration order.
    pub fn status_report(&self) -> Vec<WorkerStatus> {
        let now = Instant::now();
        self.workers
            .iter()
            .map(|w| {
                let accounting = w.accounting.lock();
                let remaining = accounting
                    .last_run()
                    .map(|at| w.period.saturating_sub(now.saturating_duration_since(at)))
                    .unwrap_or(Duration::ZERO);
                WorkerStatus {
                    name: w.name.clone(),
                    period: w.period,
                    remaining,
                    threaded: w.unit.is_threaded(),
                    alive: w.is_alive(),
                    error_count: accounting.error_count(),
                    error_kinds: accounting.distinct_exceptions(),
                    restarts: accounting.restarts(),
                    last_process_duration: accounting.last_process_duration(),
                    actions: w.actions.clone(),
                }
            })
            .collect()
    }

    /// Fixed-width table of [`Self::status_report`] for logs.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Worker Summary:\n{:<20} {:>10} {:>10} {:>10} {:>25}\n",
            "Name", "Period", "Rem. Time", "Err. Count", "Errors"
        );
        for status in self.status_report() {
            let kinds = status.error_kinds.into_iter().collect::<Vec<_>>().join(",");
            let _ = writeln!(
                out,
                "{:<20} {:>10} {:>10} {:>10} {:>25}",
                status.name,
                status.period.as_secs(),
                status.remaining.as_secs(),
                status.error_count,
                kinds
            );
        }
        out
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

async fn check_threaded(worker: &mut WorkerHandle, parent: &CancellationToken) {
    if worker.is_alive() {
        debug!("Thread {} is alive", worker.name);
        return;
    }

    match worker.task.take() {
        Some(task) => {
            match task.handle.await {
                Ok(()) => warn!(worker = %worker.name, "Worker task exited"),
                Err(e) if e.is_panic() => {
                    let panic = e.into_panic();
                    error!(
                        worker = %worker.name,
                        panic = %panic_message(&*panic),
                        "Worker task panicked"
                    );
                }
                Err(e) => warn!(worker = %worker.name, error = %e, "Worker task ended"),
            }

            info!("Recreating {} thread.", worker.name);
            match (worker.factory)() {
                Ok(unit) => {
                    worker.unit = unit;
                    worker.accounting.lock().record_restart();
                }
                Err(e) => {
                    warn!(worker = %worker.name, error = %e, "Failed to rebuild worker");
                    worker.accounting.lock().record_failure(e.kind(), None);
                    return;
                }
            }
        }
        None => info!("Creating {} thread.", worker.name),
    }

    spawn_worker(worker, parent);
}

/// Run one inline update on its own task, bounded by `timeout`.
///
/// The update runs on a separate task so that a unit blocking its thread
/// cannot hold the timer back on a multi-threaded runtime.
async fn run_inline(worker: &mut WorkerHandle, timeout: Duration) {
    let started = Instant::now();
    let unit = worker.unit.clone();
    let mut task = tokio::spawn(async move { unit.update().await });
    let result = match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            task.abort();
            Ok(Err(Error::Timeout(timeout)))
        }
    };
    let elapsed = started.elapsed();

    let mut accounting = worker.accounting.lock();
    match result {
        Ok(Ok(())) => accounting.record_success(elapsed),
        Ok(Err(e)) => {
            warn!(worker = %worker.name, error = %e, "Worker update failed");
            accounting.record_failure(e.kind(), Some(elapsed));
        }
        Err(join_error) if join_error.is_panic() => {
            let panic = join_error.into_panic();
            error!(
                worker = %worker.name,
                panic = %panic_message(&*panic),
                "Worker update panicked"
            );
            accounting.record_failure("panic", Some(elapsed));
        }
        Err(join_error) => {
            warn!(worker = %worker.name, error = %join_error, "Worker update cancelled");
            accounting.record_failure("cancelled", Some(elapsed));
        }
    }
}

fn spawn_worker(worker: &mut WorkerHandle, parent: &CancellationToken) {
    let token = parent.child_token();
    let handle = tokio::spawn(run_threaded(
        worker.name.clone(),
        worker.unit.clone(),
        worker.period,
        worker.accounting.clone(),
        token.clone(),
    ));
    worker.task = Some(RunningTask { handle, token });
}

/// Body of a threaded worker: update, then sleep for a period, until cancelled.
async fn run_threaded(
    name: String,
    unit: Arc<dyn MonitorUnit>,
    period: Duration,
    accounting: SharedAccounting,
    token: CancellationToken,
) {
    debug!(worker = %name, "Worker task started");
    loop {
        let started = Instant::now();
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = unit.update() => result,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => accounting.lock().record_success(elapsed),
            Err(e) => {
                warn!(worker = %name, error = %e, "Worker update failed");
                accounting.lock().record_failure(e.kind(), Some(elapsed));
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }
    debug!(worker = %name, "Worker task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::unit::{UnitMode, unit_factory};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted unit: fails on the listed calls, panics on `panic_on`.
    struct ScriptedUnit {
        name: String,
        mode: UnitMode,
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        panic_on: Option<usize>,
        delay: Duration,
        /// Blocks the calling thread instead of yielding.
        block: Duration,
        updated: AtomicBool,
    }

    impl ScriptedUnit {
        fn new(name: &str, mode: UnitMode) -> Self {
            Self {
                name: name.to_string(),
                mode,
                calls: AtomicUsize::new(0),
                fail_on: Vec::new(),
                panic_on: None,
                delay: Duration::ZERO,
                block: Duration::ZERO,
                updated: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MonitorUnit for ScriptedUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn mode(&self) -> UnitMode {
            self.mode
        }

        async fn update(&self) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if !self.block.is_zero() {
                std::thread::sleep(self.block);
            }
            if self.panic_on == Some(call) {
                panic!("unit {} crashed", self.name);
            }
            if self.fail_on.contains(&call) {
                return Err(Error::unavailable("sensor"));
            }
            self.updated.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_updated(&self) -> bool {
            self.updated.load(Ordering::SeqCst)
        }

        fn populate(&self, report: &mut Map<String, Value>) -> Result<()> {
            report.insert(self.name.clone(), json!(true));
            Ok(())
        }
    }

    fn counting_factory<F>(builds: Arc<AtomicUsize>, make: F) -> UnitFactory
    where
        F: Fn(usize) -> ScriptedUnit + Send + Sync + 'static,
    {
        unit_factory(move || {
            let n = builds.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(make(n)) as Arc<dyn MonitorUnit>)
        })
    }

    #[tokio::test]
    async fn test_register_duplicate_is_noop() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::new();
        let factory = counting_factory(builds.clone(), |_| ScriptedUnit::new("net", UnitMode::Threaded));

        assert!(registry.register("net", Duration::from_secs(10), factory.clone(), vec![]));
        assert!(!registry.register("net", Duration::from_secs(99), factory, vec![]));

        assert_eq!(registry.len(), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(registry.is_alive("net"), Some(false));
        assert_eq!(registry.status_report()[0].period, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_register_factory_failure() {
        let mut registry = WorkerRegistry::new();
        let factory = unit_factory(|| Err(Error::unavailable("no counters")));
        assert!(!registry.register("net", Duration::from_secs(10), factory, vec![]));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_inline_failure_is_isolated() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::new();
        registry.register(
            "broken",
            Duration::from_secs(10),
            counting_factory(builds.clone(), |_| {
                let mut unit = ScriptedUnit::new("broken", UnitMode::Inline);
                unit.fail_on = vec![1, 2];
                unit
            }),
            vec![],
        );
        registry.register(
            "healthy",
            Duration::from_secs(10),
            counting_factory(builds, |_| ScriptedUnit::new("healthy", UnitMode::Inline)),
            vec![],
        );

        registry.health_check().await;
        registry.health_check().await;

        assert_eq!(registry.error_count("broken"), Some(2));
        assert_eq!(registry.error_count("healthy"), Some(0));
        assert!(registry.unit("healthy").unwrap().is_updated());
        assert!(!registry.unit("broken").unwrap().is_updated());
        assert!(
            registry
                .accounting("healthy")
                .unwrap()
                .last_process_duration()
                .is_some()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_timeout_counts_as_failure() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::with_config(RegistryConfig {
            stop_grace: Duration::from_secs(1),
            inline_timeout: Duration::from_secs(2),
        });
        registry.register(
            "slow",
            Duration::from_secs(10),
            counting_factory(builds, |_| {
                let mut unit = ScriptedUnit::new("slow", UnitMode::Inline);
                unit.delay = Duration::from_secs(30);
                unit
            }),
            vec![],
        );

        registry.health_check().await;

        let accounting = registry.accounting("slow").unwrap();
        assert_eq!(accounting.error_count(), 1);
        assert_eq!(accounting.exceptions().collect::<Vec<_>>(), vec!["timeout"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_inline_update_is_bounded() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::with_config(RegistryConfig {
            stop_grace: Duration::from_secs(1),
            inline_timeout: Duration::from_millis(200),
        });
        registry.register(
            "stuck",
            Duration::from_secs(10),
            counting_factory(builds.clone(), |_| {
                let mut unit = ScriptedUnit::new("stuck", UnitMode::Inline);
                unit.block = Duration::from_secs(3);
                unit
            }),
            vec![],
        );
        registry.register(
            "healthy",
            Duration::from_secs(10),
            counting_factory(builds, |_| ScriptedUnit::new("healthy", UnitMode::Inline)),
            vec![],
        );

        let started = std::time::Instant::now();
        registry.health_check().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        let accounting = registry.accounting("stuck").unwrap();
        assert_eq!(accounting.exceptions().collect::<Vec<_>>(), vec!["timeout"]);
        assert!(registry.unit("healthy").unwrap().is_updated());
        assert_eq!(registry.error_count("healthy"), Some(0));
    }

    #[tokio::test]
    async fn test_inline_panic_counts_as_failure() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::new();
        registry.register(
            "crashy",
            Duration::from_secs(10),
            counting_factory(builds, |_| {
                let mut unit = ScriptedUnit::new("crashy", UnitMode::Inline);
                unit.panic_on = Some(1);
                unit
            }),
            vec![],
        );

        registry.health_check().await;
        registry.health_check().await;

        let accounting = registry.accounting("crashy").unwrap();
        assert_eq!(accounting.error_count(), 1);
        assert_eq!(accounting.exceptions().collect::<Vec<_>>(), vec!["panic"]);
        assert!(registry.unit("crashy").unwrap().is_updated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_threaded_unit_is_recreated_with_accounting() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::new();
        registry.register(
            "net",
            Duration::from_secs(1),
            counting_factory(builds.clone(), |n| {
                let mut unit = ScriptedUnit::new("net", UnitMode::Threaded);
                if n == 1 {
                    // First instance: one transient failure, then it dies.
                    unit.fail_on = vec![1];
                    unit.panic_on = Some(2);
                }
                unit
            }),
            vec!["telemetry".to_string()],
        );

        registry.start();
        assert_eq!(registry.is_alive("net"), Some(true));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(registry.is_alive("net"), Some(false));
        assert_eq!(registry.error_count("net"), Some(1));

        registry.health_check().await;

        assert_eq!(registry.is_alive("net"), Some(true));
        assert_eq!(registry.error_count("net"), Some(1));
        assert_eq!(registry.accounting("net").unwrap().restarts(), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);

        let report = registry.stop().await;
        assert_eq!(report, StopReport { total: 1, graceful: 1, forced: 0 });
        assert_eq!(registry.is_alive("net"), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_creates_missing_task() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::new();
        registry.register(
            "net",
            Duration::from_secs(5),
            counting_factory(builds.clone(), |_| ScriptedUnit::new("net", UnitMode::Threaded)),
            vec![],
        );

        registry.health_check().await;
        assert_eq!(registry.is_alive("net"), Some(true));
        // Creating a task for the first time reuses the registered instance.
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(registry.accounting("net").unwrap().restarts(), 0);

        registry.health_check().await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        registry.stop().await;
    }

    #[tokio::test]
    async fn test_unregister_removes_worker() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::new();
        registry.register(
            "net",
            Duration::from_secs(5),
            counting_factory(builds, |_| ScriptedUnit::new("net", UnitMode::Threaded)),
            vec![],
        );
        registry.start();

        assert!(registry.unregister("net"));
        assert!(!registry.unregister("net"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_summary_table() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkerRegistry::new();
        registry.register(
            "resources",
            Duration::from_secs(60),
            counting_factory(builds, |_| {
                let mut unit = ScriptedUnit::new("resources", UnitMode::Inline);
                unit.fail_on = vec![1];
                unit
            }),
            vec![],
        );
        registry.health_check().await;

        let summary = registry.summary();
        let header = format!(
            "Worker Summary:\n{:<20} {:>10} {:>10} {:>10} {:>25}\n",
            "Name", "Period", "Rem. Time", "Err. Count", "Errors"
        );
        assert!(summary.starts_with(&header));
        assert!(summary.contains("resources"));
        assert!(summary.contains("unavailable"));

        let status = &registry.status_report()[0];
        assert_eq!(status.error_count, 1);
        assert!(status.error_kinds.contains("unavailable"));
        assert!(!status.threaded);
    }
}
