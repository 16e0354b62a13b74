use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;

use healthmon::core::config::SchedulerSettings;
use healthmon::core::repair::{RepairRecord, RepairSubject};
use healthmon::core::scheduler::{MaintenanceTask, NewTask, TaskCategory, TaskError, TaskScheduler, TaskStatus};
use healthmon::core::storage::{SqliteBackend, StateBackend, WriteBehindQueue};
use healthmon::core::system_monitor::MetricSample;
use healthmon::HealthError;

use super::support::{dispatcher, FakeActions};

fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    // 2024-01-01 is a Monday.
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn cleanup_only() -> SchedulerSettings {
    SchedulerSettings {
        auto_cleanup: true,
        auto_defrag: false,
        auto_updates: false,
        auto_backup: false,
        cleanup_time: "02:00".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_due_cleanup_completes_with_record() {
    let actions = Arc::new(FakeActions::default());
    let dispatcher = dispatcher(actions.clone(), false);
    let scheduler = TaskScheduler::new(cleanup_only());
    scheduler.regenerate(at(1, 1, 0, 0)).unwrap();

    let cleanup = scheduler
        .pending()
        .into_iter()
        .find(|t| t.category == TaskCategory::Cleanup && t.scheduled_at == at(1, 2, 0, 0))
        .expect("cleanup scheduled at 02:00");

    let records = scheduler
        .tick(at(1, 2, 0, 30), &dispatcher, &CancellationToken::new())
        .await;

    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(
        records[0].subject,
        RepairSubject::Maintenance {
            category: TaskCategory::Cleanup
        }
    );
    assert!(records[0].bytes_freed > 0);

    let done = scheduler.get(cleanup.id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.completed_at, Some(at(1, 2, 0, 30)));
    assert!(actions.cleaned.load(std::sync::atomic::Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_tick_before_schedule_runs_nothing() {
    let dispatcher = dispatcher(Arc::new(FakeActions::default()), false);
    let scheduler = TaskScheduler::new(cleanup_only());
    scheduler.regenerate(at(1, 1, 0, 0)).unwrap();

    let records = scheduler
        .tick(at(1, 1, 59, 59), &dispatcher, &CancellationToken::new())
        .await;
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_cancelled_tick_leaves_tasks_pending() {
    let dispatcher = dispatcher(Arc::new(FakeActions::default()), false);
    let scheduler = TaskScheduler::new(cleanup_only());
    scheduler.regenerate(at(1, 1, 0, 0)).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let records = scheduler.tick(at(1, 2, 0, 30), &dispatcher, &cancel).await;

    assert!(records.is_empty());
    assert!(scheduler.pending().iter().all(|t| t.attempts == 0));
}

#[test]
fn test_schedule_survives_restart() {
    let backend: Arc<dyn StateBackend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
    let first = TaskScheduler::with_backend(cleanup_only(), backend.clone()).unwrap();
    first.regenerate(at(1, 1, 0, 0)).unwrap();
    let user = first
        .add_task(NewTask::new("Dust the fans", TaskCategory::Custom, at(2, 18, 0, 0)))
        .unwrap();
    first.postpone(user.id, Duration::hours(2)).unwrap();

    let second = TaskScheduler::with_backend(cleanup_only(), backend).unwrap();
    assert_eq!(first.list(), second.list());
    assert_eq!(second.get(user.id).unwrap().scheduled_at, at(2, 20, 0, 0));
}

#[test]
fn test_disabling_cleanup_drops_its_pending_tasks() {
    let scheduler = TaskScheduler::new(cleanup_only());
    scheduler.regenerate(at(1, 1, 0, 0)).unwrap();
    assert!(scheduler.pending().iter().any(|t| t.category == TaskCategory::Cleanup));

    let settings = SchedulerSettings {
        auto_cleanup: false,
        ..cleanup_only()
    };
    scheduler.update_settings(settings, at(1, 1, 0, 0)).unwrap();
    assert!(!scheduler.pending().iter().any(|t| t.category == TaskCategory::Cleanup));
}

#[test]
fn test_unknown_task_is_reported() {
    let scheduler = TaskScheduler::new(cleanup_only());
    assert!(matches!(scheduler.complete(999, at(1, 0, 0, 0)), Err(HealthError::TaskNotFound(999))));
    assert!(matches!(scheduler.delete_task(999), Err(HealthError::TaskNotFound(999))));
}

/// Rejects task writes while `down` is set.
struct FlakyTaskStore {
    inner: SqliteBackend,
    down: AtomicBool,
}

impl FlakyTaskStore {
    fn check(&self) -> healthmon::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(HealthError::other("database is locked"));
        }
        Ok(())
    }
}

impl StateBackend for FlakyTaskStore {
    fn append_sample(&self, sample: &MetricSample) -> healthmon::Result<()> {
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
        self.check()?;
        self.inner.save_task(task)
    }
    fn delete_task(&self, id: i64) -> healthmon::Result<()> {
        self.check()?;
        self.inner.delete_task(id)
    }
    fn load_tasks(&self) -> healthmon::Result<Vec<MaintenanceTask>> {
        self.inner.load_tasks()
    }
    fn append_task_error(&self, error: &TaskError) -> healthmon::Result<()> {
        self.check()?;
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

#[tokio::test]
async fn test_task_writes_survive_a_storage_outage() {
    let store = Arc::new(FlakyTaskStore {
        inner: SqliteBackend::open_in_memory().unwrap(),
        down: AtomicBool::new(true),
    });
    let queue = Arc::new(WriteBehindQueue::new(store.clone()).backoff(std::time::Duration::from_millis(5)));
    let scheduler = TaskScheduler::with_storage(SchedulerSettings::default(), queue.clone()).unwrap();

    let kept = scheduler
        .add_task(NewTask::new("Defragment", TaskCategory::Optimization, at(2, 20, 0, 0)))
        .unwrap();
    let scratch = scheduler
        .add_task(NewTask::new("Scratch", TaskCategory::Custom, at(3, 20, 0, 0)))
        .unwrap();
    scheduler.delete_task(scratch.id).unwrap();

    assert!(queue.is_degraded());
    assert_eq!(queue.pending_len(), 3);
    assert!(store.load_tasks().unwrap().is_empty());

    store.down.store(false, Ordering::SeqCst);
    assert!(queue.retry_pending().await);

    // Replayed in order: the deletion lands after both saves.
    let stored: Vec<i64> = store.load_tasks().unwrap().iter().map(|t| t.id).collect();
    assert_eq!(stored, vec![kept.id]);
}

#[tokio::test]
async fn test_failed_run_error_is_stored_after_outage() {
    let store = Arc::new(FlakyTaskStore {
        inner: SqliteBackend::open_in_memory().unwrap(),
        down: AtomicBool::new(false),
    });
    let queue = Arc::new(WriteBehindQueue::new(store.clone()).backoff(std::time::Duration::from_millis(5)));
    let scheduler = TaskScheduler::with_storage(SchedulerSettings::default(), queue.clone()).unwrap();
    let task = scheduler
        .add_task(NewTask::new("Install updates", TaskCategory::Updates, at(1, 9, 0, 0)))
        .unwrap();

    store.down.store(true, Ordering::SeqCst);
    let actions = Arc::new(FakeActions {
        maintenance_fails: true,
        ..Default::default()
    });
    let dispatcher = dispatcher(actions, false);
    let records = scheduler
        .tick(at(1, 9, 0, 1), &dispatcher, &CancellationToken::new())
        .await;
    assert_eq!(records.len(), 1);
    assert!(queue.is_degraded());

    store.down.store(false, Ordering::SeqCst);
    assert!(queue.retry_pending().await);
    let errors = store.load_task_errors(Some(task.id)).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(store.load_tasks().unwrap()[0].attempts, 1);
}
