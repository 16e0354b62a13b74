//! Top-level control loops.
//!
//! `HealthMonitor::start` spawns three cooperative tasks sharing one cancel
//! token:
//!
//! - the probe loop: probe, store, evaluate thresholds, analyze trends and
//!   diagnose on a slower cadence. Automatic repairs run in batches spawned
//!   beside it so a slow fix never delays sampling;
//! - the scheduler loop: fire due maintenance tasks and apply retention;
//! - the request loop: on-demand work sent through the `MonitorHandle`.
//!
//! Results leave through four bounded channels. A full channel drops the
//! item rather than stalling the producer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::diagnostics::{DiagnosticEngine, Issue};
use crate::core::repair::{RepairDispatcher, RepairRecord};
use crate::core::scheduler::TaskScheduler;
use crate::core::storage::{StorageOp, WriteBehindQueue};
use crate::core::system_monitor::temperature::clear_temperature_cache;
use crate::core::system_monitor::{
    health_index, Alert, MetricSample, Prediction, PredictionKind, Probe, RetentionPolicy,
    SampleStore, ThresholdEngine, TrendAnalyzer, TrendReport,
};
use crate::error::{HealthError, Result};

pub const OUTPUT_CHANNEL_CAPACITY: usize = 64;
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const PROBE_FAILURES_BEFORE_ALERT: u32 = 5;

const PROBE_BACKOFF_START: Duration = Duration::from_secs(1);
const PROBE_BACKOFF_CAP: Duration = Duration::from_secs(60);
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Loop cadences and behaviour switches.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub probe_interval: Duration,
    /// Minimum spacing between trend analyses.
    pub rule_interval: Duration,
    pub scheduler_tick: Duration,
    pub diagnose_interval: Duration,
    /// Apply fixes for auto-fixable issues found by periodic diagnosis.
    pub auto_repair: bool,
    pub backoff_start: Duration,
    pub backoff_cap: Duration,
    pub channel_capacity: usize,
    pub retention: RetentionPolicy,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl MonitorOptions {
    pub fn from_config(config: &Config) -> Self {
        let m = &config.monitor;
        Self {
            probe_interval: Duration::from_secs(m.probe_interval_secs),
            rule_interval: Duration::from_secs(m.rule_interval_secs),
            scheduler_tick: Duration::from_secs(m.scheduler_tick_secs),
            diagnose_interval: Duration::from_secs(m.diagnose_interval_secs),
            auto_repair: m.auto_repair,
            backoff_start: PROBE_BACKOFF_START,
            backoff_cap: PROBE_BACKOFF_CAP,
            channel_capacity: OUTPUT_CHANNEL_CAPACITY,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Exponential backoff for consecutive probe failures.
pub fn probe_backoff(consecutive_failures: u32, start: Duration, cap: Duration) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(16);
    start.saturating_mul(1u32 << exp).min(cap)
}

/// Point-in-time view for the `HealthSnapshot` request.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub sample: Option<MetricSample>,
    pub health_index: Option<u8>,
    pub report: Option<TrendReport>,
    pub sample_count: usize,
    pub probe_failures: u32,
    pub storage_degraded: bool,
    pub pending_tasks: usize,
}

/// On-demand work for the request loop.
#[derive(Debug)]
pub enum MonitorRequest {
    DiagnoseNow {
        reply: oneshot::Sender<Vec<Issue>>,
    },
    ApplyRepair {
        issue: Issue,
        reply: oneshot::Sender<RepairRecord>,
    },
    HealthSnapshot {
        reply: oneshot::Sender<HealthSnapshot>,
    },
    RegenerateTasks {
        reply: oneshot::Sender<Result<usize>>,
    },
    Snooze {
        until: Option<DateTime<Utc>>,
        reply: oneshot::Sender<()>,
    },
}

struct Outputs {
    alerts: mpsc::Sender<Alert>,
    predictions: mpsc::Sender<Prediction>,
    issues: mpsc::Sender<Issue>,
    repairs: mpsc::Sender<RepairRecord>,
}

fn offer<T>(tx: &mpsc::Sender<T>, item: T, stream: &str) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(item) {
        log::debug!("{} channel full, dropping item", stream);
    }
}

struct Shared {
    probe: Arc<Mutex<Box<dyn Probe>>>,
    store: Arc<SampleStore>,
    thresholds: Mutex<ThresholdEngine>,
    trend: TrendAnalyzer,
    last_report: RwLock<Option<TrendReport>>,
    diagnostics: DiagnosticEngine,
    dispatcher: Arc<RepairDispatcher>,
    scheduler: Arc<TaskScheduler>,
    storage: Option<Arc<WriteBehindQueue>>,
    probe_failures: AtomicU32,
    options: MonitorOptions,
    outputs: Outputs,
}

impl Shared {
    async fn persist(&self, op: StorageOp) {
        if let Some(queue) = &self.storage {
            queue.write(op).await;
        }
    }

    async fn run_probe(&self) -> Result<MetricSample> {
        let probe = Arc::clone(&self.probe);
        tokio::task::spawn_blocking(move || probe.lock().probe())
            .await
            .map_err(|e| HealthError::probe(format!("probe task failed: {}", e)))?
            .map_err(HealthError::from)
    }

    async fn diagnose(&self) -> Vec<Issue> {
        let Some(sample) = self.store.latest() else {
            log::info!("No samples yet, skipping diagnosis");
            return Vec::new();
        };
        let probe = Arc::clone(&self.probe);
        let input = match tokio::task::spawn_blocking(move || probe.lock().diagnostic_input(sample)).await {
            Ok(input) => input,
            Err(e) => {
                log::error!("Diagnostic input collection failed: {}", e);
                return Vec::new();
            }
        };
        self.diagnostics.diagnose(&input)
    }

    async fn repair(&self, issue: &Issue, cancel: &CancellationToken) -> RepairRecord {
        let record = self.dispatcher.apply(issue, cancel).await;
        self.persist(StorageOp::AppendRepair(record.clone())).await;
        offer(&self.outputs.repairs, record.clone(), "repair");
        record
    }

    fn snapshot(&self) -> HealthSnapshot {
        let latest = self.store.latest();
        HealthSnapshot {
            health_index: latest.as_deref().map(health_index),
            sample: latest.as_deref().cloned(),
            report: self.last_report.read().clone(),
            sample_count: self.store.len(),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            storage_degraded: self.storage.as_ref().is_some_and(|q| q.is_degraded()),
            pending_tasks: self.scheduler.pending().len(),
        }
    }
}

/// Builder for the monitor's control loops.
pub struct HealthMonitor {
    probe: Box<dyn Probe>,
    store: Arc<SampleStore>,
    thresholds: ThresholdEngine,
    trend: TrendAnalyzer,
    diagnostics: DiagnosticEngine,
    dispatcher: Arc<RepairDispatcher>,
    scheduler: Arc<TaskScheduler>,
    storage: Option<Arc<WriteBehindQueue>>,
    options: MonitorOptions,
}

impl HealthMonitor {
    pub fn new(
        config: &Config,
        probe: Box<dyn Probe>,
        dispatcher: Arc<RepairDispatcher>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        let options = MonitorOptions::from_config(config);
        Self {
            probe,
            store: Arc::new(SampleStore::with_retention(options.retention)),
            thresholds: ThresholdEngine::from_config(config),
            trend: TrendAnalyzer::default(),
            diagnostics: DiagnosticEngine::from_config(config),
            dispatcher,
            scheduler,
            storage: None,
            options,
        }
    }

    pub fn options(mut self, options: MonitorOptions) -> Self {
        self.store = Arc::new(SampleStore::with_retention(options.retention));
        self.options = options;
        self
    }

    pub fn thresholds(mut self, thresholds: ThresholdEngine) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn trend(mut self, trend: TrendAnalyzer) -> Self {
        self.trend = trend;
        self
    }

    pub fn diagnostics(mut self, diagnostics: DiagnosticEngine) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Persist samples and repair records through `queue`, and seed the
    /// sample store from its history.
    pub fn storage(mut self, queue: Arc<WriteBehindQueue>) -> Self {
        self.storage = Some(queue);
        self
    }

    /// Spawn the loops on the current tokio runtime.
    pub fn start(self) -> MonitorHandle {
        if let Some(queue) = &self.storage {
            match queue.backend().load_samples(self.trend.window()) {
                Ok(history) => {
                    let loaded = self.store.hydrate(history);
                    log::info!("Restored {} samples from storage", loaded);
                }
                Err(e) => log::warn!("Could not restore sample history: {}", e),
            }
        }

        let capacity = self.options.channel_capacity.max(1);
        let (alerts_tx, alerts) = mpsc::channel(capacity);
        let (predictions_tx, predictions) = mpsc::channel(capacity);
        let (issues_tx, issues) = mpsc::channel(capacity);
        let (repairs_tx, repairs) = mpsc::channel(capacity);
        let (requests, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);

        let store = Arc::clone(&self.store);
        let storage = self.storage.clone();
        let shared = Arc::new(Shared {
            probe: Arc::new(Mutex::new(self.probe)),
            store: self.store,
            thresholds: Mutex::new(self.thresholds),
            trend: self.trend,
            last_report: RwLock::new(None),
            diagnostics: self.diagnostics,
            dispatcher: self.dispatcher,
            scheduler: self.scheduler,
            storage: self.storage,
            probe_failures: AtomicU32::new(0),
            options: self.options,
            outputs: Outputs {
                alerts: alerts_tx,
                predictions: predictions_tx,
                issues: issues_tx,
                repairs: repairs_tx,
            },
        });

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(probe_loop(Arc::clone(&shared), cancel.clone())),
            tokio::spawn(scheduler_loop(Arc::clone(&shared), cancel.clone())),
            tokio::spawn(request_loop(shared, requests_rx, cancel.clone())),
        ];
        log::info!("Health monitor started");

        MonitorHandle {
            alerts,
            predictions,
            issues,
            repairs,
            requests,
            store,
            storage,
            cancel,
            tasks,
        }
    }
}

/// Running monitor. Dropping the handle without `shutdown` leaves the loops
/// running until the cancel token fires.
pub struct MonitorHandle {
    pub alerts: mpsc::Receiver<Alert>,
    pub predictions: mpsc::Receiver<Prediction>,
    pub issues: mpsc::Receiver<Issue>,
    pub repairs: mpsc::Receiver<RepairRecord>,
    requests: mpsc::Sender<MonitorRequest>,
    store: Arc<SampleStore>,
    storage: Option<Arc<WriteBehindQueue>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> MonitorRequest) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| HealthError::Cancelled)?;
        rx.await.map_err(|_| HealthError::Cancelled)
    }

    pub async fn diagnose_now(&self) -> Result<Vec<Issue>> {
        self.request(|reply| MonitorRequest::DiagnoseNow { reply }).await
    }

    pub async fn apply_repair(&self, issue: Issue) -> Result<RepairRecord> {
        self.request(|reply| MonitorRequest::ApplyRepair { issue, reply }).await
    }

    pub async fn health_snapshot(&self) -> Result<HealthSnapshot> {
        self.request(|reply| MonitorRequest::HealthSnapshot { reply }).await
    }

    pub async fn regenerate_tasks(&self) -> Result<usize> {
        self.request(|reply| MonitorRequest::RegenerateTasks { reply }).await?
    }

    /// Suppress alert emission until `until`; `None` lifts the snooze.
    pub async fn snooze(&self, until: Option<DateTime<Utc>>) -> Result<()> {
        self.request(|reply| MonitorRequest::Snooze { until, reply }).await
    }

    /// Cancel every loop and wait up to `SHUTDOWN_GRACE` for them to drain.
    /// Loops still running after the grace window are aborted. Returns true
    /// when everything drained in time.
    pub async fn shutdown(mut self) -> bool {
        log::info!("Shutting down health monitor");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut self.tasks);
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for task in tasks {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        log::error!("Monitor task panicked: {}", e);
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            log::warn!("Monitor loops did not drain within {:?}, aborting", SHUTDOWN_GRACE);
            for abort in aborts {
                abort.abort();
            }
        }

        if let Some(queue) = &self.storage {
            queue.flush();
            if queue.is_degraded() {
                log::warn!("{} storage writes could not be saved", queue.pending_len());
            }
        }
        clear_temperature_cache();
        drained
    }
}

async fn probe_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let options = shared.options.clone();
    let mut delay = Duration::ZERO;
    let mut last_trend: Option<tokio::time::Instant> = None;
    let mut last_diagnosis = tokio::time::Instant::now();
    let mut previous_kinds: HashSet<PredictionKind> = HashSet::new();
    let mut previous_issues: HashSet<String> = HashSet::new();
    let mut repairs: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
        while repairs.try_join_next().is_some() {}

        let sample = match shared.run_probe().await {
            Ok(sample) => sample,
            Err(e) => {
                let failures = shared.probe_failures.fetch_add(1, Ordering::Relaxed) + 1;
                delay = probe_backoff(failures, options.backoff_start, options.backoff_cap);
                log::warn!("Probe failed ({} in a row), retrying in {:?}: {}", failures, delay, e);
                if failures == PROBE_FAILURES_BEFORE_ALERT && !cancel.is_cancelled() {
                    offer(
                        &shared.outputs.alerts,
                        Alert::probe_failure(failures, &e.to_string(), Utc::now()),
                        "alert",
                    );
                }
                continue;
            }
        };
        if shared.probe_failures.swap(0, Ordering::Relaxed) > 0 {
            log::info!("Probe recovered");
        }
        delay = options.probe_interval;

        if cancel.is_cancelled() {
            break;
        }

        let sample = match shared.store.append(sample) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("Dropping sample: {}", e);
                continue;
            }
        };
        shared.persist(StorageOp::AppendSample((*sample).clone())).await;

        let alerts = shared.thresholds.lock().evaluate(&sample);
        if cancel.is_cancelled() {
            break;
        }
        for alert in alerts {
            log::info!("Alert [{}] {}", alert.severity, alert.message);
            offer(&shared.outputs.alerts, alert, "alert");
        }

        if last_trend.map_or(true, |t| t.elapsed() >= options.rule_interval) {
            last_trend = Some(tokio::time::Instant::now());
            let window = shared.store.last_n(shared.trend.window());
            if let Some(report) = shared.trend.analyze(&window) {
                let kinds: HashSet<PredictionKind> = report.predictions.iter().map(|p| p.kind).collect();
                for prediction in &report.predictions {
                    if !previous_kinds.contains(&prediction.kind) {
                        offer(&shared.outputs.predictions, prediction.clone(), "prediction");
                    }
                }
                previous_kinds = kinds;
                *shared.last_report.write() = Some(report);
            }
        }

        if last_diagnosis.elapsed() >= options.diagnose_interval {
            last_diagnosis = tokio::time::Instant::now();
            let issues = shared.diagnose().await;
            if cancel.is_cancelled() {
                break;
            }
            let ids: HashSet<String> = issues.iter().map(|i| i.id.clone()).collect();
            let mut batch = Vec::new();
            for issue in issues {
                if previous_issues.contains(&issue.id) {
                    continue;
                }
                log::info!("Issue [{}] {}", issue.severity, issue.description);
                offer(&shared.outputs.issues, issue.clone(), "issue");
                if options.auto_repair && issue.auto_fixable {
                    batch.push(issue);
                }
            }
            previous_issues = ids;

            if !batch.is_empty() {
                let shared = Arc::clone(&shared);
                let cancel = cancel.clone();
                repairs.spawn(async move {
                    for issue in batch {
                        if cancel.is_cancelled() {
                            break;
                        }
                        shared.repair(&issue, &cancel).await;
                    }
                });
            }
        }
    }

    // Repairs watch the same token; let them wind down inside the shutdown grace.
    while let Some(result) = repairs.join_next().await {
        if let Err(e) = result {
            if e.is_panic() {
                log::error!("Repair batch panicked: {}", e);
            }
        }
    }
    log::debug!("Probe loop stopped");
}

async fn scheduler_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.options.scheduler_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Local::now().naive_local();
                let records = shared.scheduler.tick(now, &shared.dispatcher, &cancel).await;
                for record in records {
                    shared.persist(StorageOp::AppendRepair(record.clone())).await;
                    offer(&shared.outputs.repairs, record, "repair");
                }
                shared.scheduler.purge(now);

                if let Some(queue) = &shared.storage {
                    queue.flush();
                    let retention = shared.options.retention;
                    let horizon = Utc::now() - retention.max_age;
                    if let Err(e) = queue.backend().trim_samples(horizon, retention.min_samples) {
                        log::warn!("Sample retention failed: {}", e);
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    log::debug!("Scheduler loop stopped");
}

async fn request_loop(
    shared: Arc<Shared>,
    mut requests: mpsc::Receiver<MonitorRequest>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        match request {
            MonitorRequest::DiagnoseNow { reply } => {
                let issues = shared.diagnose().await;
                for issue in &issues {
                    offer(&shared.outputs.issues, issue.clone(), "issue");
                }
                let _ = reply.send(issues);
            }
            MonitorRequest::ApplyRepair { issue, reply } => {
                let record = shared.repair(&issue, &cancel).await;
                let _ = reply.send(record);
            }
            MonitorRequest::HealthSnapshot { reply } => {
                let _ = reply.send(shared.snapshot());
            }
            MonitorRequest::RegenerateTasks { reply } => {
                let _ = reply.send(shared.scheduler.regenerate(Local::now().naive_local()));
            }
            MonitorRequest::Snooze { until, reply } => {
                shared.thresholds.lock().set_delay_until(until);
                log::info!("Alerts snoozed until {:?}", until);
                let _ = reply.send(());
            }
        }
    }
    log::debug!("Request loop stopped");
}
