use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use healthmon::core::config::Config;
use healthmon::core::diagnostics::IssueKind;
use healthmon::core::repair::RepairRecord;
use healthmon::core::scheduler::{MaintenanceTask, TaskError, TaskScheduler};
use healthmon::core::storage::{SqliteBackend, StateBackend, WriteBehindQueue};
use healthmon::core::system_monitor::{
    AlertKind, MetricField, MetricSample, Predicate, Probe, Rule, Severity, ThresholdEngine,
};
use healthmon::error::ProbeError;
use healthmon::{HealthMonitor, MonitorOptions};

use super::support::{dispatcher, FakeActions};

const WAIT: Duration = Duration::from_secs(5);

/// Replays a fixed CPU/RAM script, then repeats the last entry.
struct ScriptedProbe {
    script: Vec<(f32, f32)>,
    next: usize,
}

impl ScriptedProbe {
    fn new(script: &[(f32, f32)]) -> Self {
        Self {
            script: script.to_vec(),
            next: 0,
        }
    }
}

impl Probe for ScriptedProbe {
    fn probe(&mut self) -> Result<MetricSample, ProbeError> {
        let idx = self.next.min(self.script.len() - 1);
        self.next += 1;
        let (cpu, ram) = self.script[idx];
        Ok(MetricSample {
            cpu_percent: cpu,
            ram_percent: ram,
            disk_percent: Some(40.0),
            ..MetricSample::at(Utc::now())
        })
    }
}

struct BrokenProbe;

impl Probe for BrokenProbe {
    fn probe(&mut self) -> Result<MetricSample, ProbeError> {
        Err(ProbeError::new("sensor bus unavailable"))
    }
}

fn fast_options() -> MonitorOptions {
    MonitorOptions {
        probe_interval: Duration::from_millis(10),
        rule_interval: Duration::from_millis(10),
        scheduler_tick: Duration::from_secs(3600),
        diagnose_interval: Duration::from_secs(3600),
        auto_repair: false,
        backoff_start: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(2),
        ..MonitorOptions::default()
    }
}

fn monitor(probe: Box<dyn Probe>) -> HealthMonitor {
    let config = Config::default();
    HealthMonitor::new(
        &config,
        probe,
        Arc::new(dispatcher(Arc::new(FakeActions::default()), false)),
        Arc::new(TaskScheduler::new(config.scheduler.clone())),
    )
    .options(fast_options())
}

fn busy_cpu_engine(cooldown: chrono::Duration) -> ThresholdEngine {
    let mut engine = ThresholdEngine::empty();
    engine.register(
        Rule::new(
            "busy_cpu",
            AlertKind::Custom("busy_cpu".to_string()),
            Predicate::above(MetricField::CpuPercent, 50.0),
            chrono::Duration::zero(),
        )
        .cooldown(cooldown),
    );
    engine
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_alerts_flow_and_shutdown_drains() {
    let mut handle = monitor(Box::new(ScriptedProbe::new(&[(20.0, 30.0), (20.0, 30.0), (75.0, 30.0)])))
        .thresholds(busy_cpu_engine(chrono::Duration::hours(1)))
        .start();

    let alert = timeout(WAIT, handle.alerts.recv())
        .await
        .expect("alert within deadline")
        .expect("alert stream open");
    assert_eq!(alert.kind, AlertKind::Custom("busy_cpu".to_string()));
    assert_eq!(alert.observed_value, 75.0);
    assert!(handle.store().len() >= 3);

    let (_keep, placeholder) = mpsc::channel(1);
    let mut alerts = std::mem::replace(&mut handle.alerts, placeholder);
    assert!(handle.shutdown().await);

    // Senders are gone once every loop has stopped; the cooldown keeps the
    // rule quiet, so the stream just ends.
    let tail = timeout(WAIT, alerts.recv()).await.expect("stream closes");
    assert!(tail.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeated_probe_failures_raise_one_alert() {
    let mut handle = monitor(Box::new(BrokenProbe)).start();

    let alert = timeout(WAIT, handle.alerts.recv())
        .await
        .expect("probe failure alert within deadline")
        .expect("alert stream open");
    assert_eq!(alert.kind, AlertKind::Custom("probe-failure".to_string()));
    assert_eq!(alert.severity, Severity::Critical);
    assert!(alert.message.contains("sensor bus unavailable"));

    let snapshot = handle.health_snapshot().await.unwrap();
    assert!(snapshot.probe_failures >= 5);
    assert_eq!(snapshot.sample_count, 0);
    assert!(snapshot.health_index.is_none());

    assert!(handle.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_on_demand_diagnosis_and_snapshot() {
    let handle = monitor(Box::new(ScriptedProbe::new(&[(30.0, 97.0)]))).start();

    timeout(WAIT, async {
        while handle.store().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first sample stored");

    let issues = handle.diagnose_now().await.unwrap();
    assert!(issues.iter().any(|i| i.kind == IssueKind::HighMemoryCritical));

    let snapshot = handle.health_snapshot().await.unwrap();
    assert!(snapshot.sample.is_some());
    assert!(snapshot.health_index.is_some_and(|score| score < 100));
    assert!(!snapshot.storage_degraded);

    assert!(handle.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_samples_persist_and_rehydrate() {
    let backend: Arc<dyn StateBackend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
    let queue = Arc::new(WriteBehindQueue::new(backend.clone()));

    let handle = monitor(Box::new(ScriptedProbe::new(&[(25.0, 35.0)])))
        .storage(queue.clone())
        .start();
    timeout(WAIT, async {
        while handle.store().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("samples collected");
    assert!(handle.shutdown().await);

    let stored = backend.load_samples(100).unwrap().len();
    assert!(stored >= 3);

    // A second monitor over the same backend starts from the stored history.
    let restarted = monitor(Box::new(ScriptedProbe::new(&[(25.0, 35.0)])))
        .storage(queue)
        .start();
    assert!(restarted.store().len() >= stored);
    assert!(restarted.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snooze_silences_alerts() {
    let mut handle = monitor(Box::new(ScriptedProbe::new(&[(90.0, 30.0)])))
        .thresholds(busy_cpu_engine(chrono::Duration::zero()))
        .start();

    let first = timeout(WAIT, handle.alerts.recv()).await.unwrap().unwrap();
    assert_eq!(first.observed_value, 90.0);

    handle
        .snooze(Some(Utc::now() + chrono::Duration::hours(1)))
        .await
        .unwrap();
    // Let an evaluation that raced the snooze finish, then drop what it sent.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while handle.alerts.try_recv().is_ok() {}

    assert!(timeout(Duration::from_millis(100), handle.alerts.recv()).await.is_err());
    assert!(handle.store().len() > 1);

    assert!(handle.shutdown().await);
}

/// Reports a nearly full system disk on every call.
struct FullDiskProbe;

impl Probe for FullDiskProbe {
    fn probe(&mut self) -> Result<MetricSample, ProbeError> {
        Ok(MetricSample {
            cpu_percent: 20.0,
            ram_percent: 30.0,
            disk_percent: Some(96.0),
            ..MetricSample::at(Utc::now())
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sampling_continues_while_a_repair_runs() {
    let actions = Arc::new(FakeActions {
        clean_delay: Duration::from_secs(30),
        ..Default::default()
    });
    let config = Config::default();
    let mut handle = HealthMonitor::new(
        &config,
        Box::new(FullDiskProbe),
        Arc::new(dispatcher(actions.clone(), true)),
        Arc::new(TaskScheduler::new(config.scheduler.clone())),
    )
    .options(MonitorOptions {
        diagnose_interval: Duration::from_millis(20),
        auto_repair: true,
        ..fast_options()
    })
    .start();

    let issue = timeout(WAIT, handle.issues.recv())
        .await
        .expect("disk issue within deadline")
        .expect("issue stream open");
    assert!(matches!(issue.kind, IssueKind::DiskFull | IssueKind::DiskLow));

    let before = handle.store().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.store().len() >= before + 5);
    // The cleanup is still sleeping.
    assert_eq!(actions.cleaned.load(std::sync::atomic::Ordering::SeqCst), 0);

    // Shutdown cancels the cleanup, so the loops drain inside the grace window.
    assert!(handle.shutdown().await);
}

/// SQLite store that cancels the monitor while it is writing a busy sample.
struct CancellingStore {
    inner: SqliteBackend,
    cancel: Mutex<Option<CancellationToken>>,
}

impl StateBackend for CancellingStore {
    fn append_sample(&self, sample: &MetricSample) -> healthmon::Result<()> {
        if sample.cpu_percent > 50.0 {
            if let Some(cancel) = self.cancel.lock().as_ref() {
                cancel.cancel();
            }
        }
        self.inner.append_sample(sample)
    }
    fn load_samples(&self, limit: usize) -> healthmon::Result<Vec<MetricSample>> {
        self.inner.load_samples(limit)
    }
    fn trim_samples(&self, older_than: DateTime<Utc>, keep_min: usize) -> healthmon::Result<usize> {
        self.inner.trim_samples(older_than, keep_min)
    }
    fn append_repair(&self, record: &RepairRecord) -> healthmon::Result<()> {
        self.inner.append_repair(record)
    }
    fn load_repairs(&self, limit: usize) -> healthmon::Result<Vec<RepairRecord>> {
        self.inner.load_repairs(limit)
    }
    fn save_task(&self, task: &MaintenanceTask) -> healthmon::Result<()> {
        self.inner.save_task(task)
    }
    fn delete_task(&self, id: i64) -> healthmon::Result<()> {
        self.inner.delete_task(id)
    }
    fn load_tasks(&self) -> healthmon::Result<Vec<MaintenanceTask>> {
        self.inner.load_tasks()
    }
    fn append_task_error(&self, error: &TaskError) -> healthmon::Result<()> {
        self.inner.append_task_error(error)
    }
    fn load_task_errors(&self, task_id: Option<i64>) -> healthmon::Result<Vec<TaskError>> {
        self.inner.load_task_errors(task_id)
    }
    fn set_setting(&self, key: &str, value: &str) -> healthmon::Result<()> {
        self.inner.set_setting(key, value)
    }
    fn get_setting(&self, key: &str) -> healthmon::Result<Option<String>> {
        self.inner.get_setting(key)
    }
    fn settings(&self) -> healthmon::Result<Vec<(String, String)>> {
        self.inner.settings()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_alert_from_sample_stored_after_cancel() {
    let store = Arc::new(CancellingStore {
        inner: SqliteBackend::open_in_memory().unwrap(),
        cancel: Mutex::new(None),
    });
    let mut handle = monitor(Box::new(ScriptedProbe::new(&[
        (20.0, 30.0),
        (20.0, 30.0),
        (20.0, 30.0),
        (20.0, 30.0),
        (75.0, 30.0),
    ])))
    .thresholds(busy_cpu_engine(chrono::Duration::zero()))
    .storage(Arc::new(WriteBehindQueue::new(store.clone())))
    .start();
    *store.cancel.lock() = Some(handle.cancel_token());

    let cancel = handle.cancel_token();
    timeout(WAIT, cancel.cancelled()).await.expect("busy sample reached the store");

    let (_keep, placeholder) = mpsc::channel(1);
    let mut alerts = std::mem::replace(&mut handle.alerts, placeholder);
    assert!(handle.shutdown().await);

    let tail = timeout(WAIT, alerts.recv()).await.expect("stream closes");
    assert!(tail.is_none());
}
