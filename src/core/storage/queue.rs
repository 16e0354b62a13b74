use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::StateBackend;
use crate::core::repair::RepairRecord;
use crate::core::scheduler::{MaintenanceTask, TaskError};
use crate::core::system_monitor::MetricSample;
use crate::error::Result;

/// Attempts per write before it is parked in memory.
pub const WRITE_ATTEMPTS: u32 = 3;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// A single deferred write.
#[derive(Debug, Clone)]
pub enum StorageOp {
    AppendSample(MetricSample),
    AppendRepair(RepairRecord),
    SaveTask(MaintenanceTask),
    DeleteTask(i64),
    AppendTaskError(TaskError),
    SetSetting { key: String, value: String },
}

impl StorageOp {
    pub fn apply(&self, backend: &dyn StateBackend) -> Result<()> {
        match self {
            StorageOp::AppendSample(sample) => backend.append_sample(sample),
            StorageOp::AppendRepair(record) => backend.append_repair(record),
            StorageOp::SaveTask(task) => backend.save_task(task),
            StorageOp::DeleteTask(id) => backend.delete_task(*id),
            StorageOp::AppendTaskError(error) => backend.append_task_error(error),
            StorageOp::SetSetting { key, value } => backend.set_setting(key, value),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            StorageOp::AppendSample(_) => "sample",
            StorageOp::AppendRepair(_) => "repair record",
            StorageOp::SaveTask(_) => "task",
            StorageOp::DeleteTask(_) => "task deletion",
            StorageOp::AppendTaskError(_) => "task error",
            StorageOp::SetSetting { .. } => "setting",
        }
    }
}

/// Retrying writer in front of a backend. Writes that keep failing are
/// held in memory, in order, until the backend recovers; past the cap the
/// oldest pending write is dropped.
pub struct WriteBehindQueue {
    backend: Arc<dyn StateBackend>,
    pending: Mutex<VecDeque<StorageOp>>,
    capacity: usize,
    backoff: Duration,
    dropped: AtomicU64,
    retrying: AtomicBool,
}

impl WriteBehindQueue {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(backend: Arc<dyn StateBackend>, capacity: usize) -> Self {
        Self {
            backend,
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            backoff: DEFAULT_BACKOFF,
            dropped: AtomicU64::new(0),
            retrying: AtomicBool::new(false),
        }
    }

    /// Base delay between attempts; doubles after each failure.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    /// Write `op`, retrying with backoff. Returns false when the write was
    /// queued instead of stored.
    pub async fn write(&self, op: StorageOp) -> bool {
        if self.is_degraded() {
            self.flush();
            if self.is_degraded() {
                self.enqueue(op);
                return false;
            }
        }

        let mut delay = self.backoff;
        for attempt in 1..=WRITE_ATTEMPTS {
            match op.apply(self.backend.as_ref()) {
                Ok(()) => return true,
                Err(e) => {
                    log::warn!(
                        "Storing {} failed (attempt {}/{}): {}",
                        op.label(),
                        attempt,
                        WRITE_ATTEMPTS,
                        e
                    );
                    if attempt < WRITE_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        log::error!("Storage unavailable, keeping {} in memory", op.label());
        self.enqueue(op);
        false
    }

    /// Write `op` from synchronous code. One attempt is made inline; a
    /// failed write is parked behind earlier ones and replayed with backoff
    /// on the current tokio runtime, if there is one. Returns false when the
    /// write was queued instead of stored.
    pub fn submit(self: &Arc<Self>, op: StorageOp) -> bool {
        if self.is_degraded() {
            self.flush();
        }
        if !self.is_degraded() {
            match op.apply(self.backend.as_ref()) {
                Ok(()) => return true,
                Err(e) => log::warn!(
                    "Storing {} failed (attempt 1/{}): {}",
                    op.label(),
                    WRITE_ATTEMPTS,
                    e
                ),
            }
        }
        self.enqueue(op);
        self.spawn_retry();
        false
    }

    fn spawn_retry(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.retrying.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = Arc::clone(self);
        runtime.spawn(async move {
            queue.retry_pending().await;
            queue.retrying.store(false, Ordering::SeqCst);
        });
    }

    /// Replay queued writes up to `WRITE_ATTEMPTS` times, doubling the delay
    /// between rounds. Returns true once nothing is pending.
    pub async fn retry_pending(&self) -> bool {
        let mut delay = self.backoff;
        for _ in 0..WRITE_ATTEMPTS {
            if !self.is_degraded() {
                return true;
            }
            tokio::time::sleep(delay).await;
            self.flush();
            delay *= 2;
        }
        if self.is_degraded() {
            log::error!("{} storage writes still waiting for the backend", self.pending_len());
            return false;
        }
        true
    }

    fn enqueue(&self, op: StorageOp) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            pending.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        pending.push_back(op);
    }

    /// Replay queued writes in order, stopping at the first failure.
    /// Returns how many were stored.
    pub fn flush(&self) -> usize {
        let mut pending = self.pending.lock();
        let mut stored = 0;
        while let Some(op) = pending.front() {
            if let Err(e) = op.apply(self.backend.as_ref()) {
                log::debug!("Replay of queued {} failed: {}", op.label(), e);
                break;
            }
            pending.pop_front();
            stored += 1;
        }
        if stored > 0 {
            log::info!("Replayed {} queued storage writes", stored);
        }
        stored
    }

    /// True while writes are waiting for the backend.
    pub fn is_degraded(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Writes lost to the capacity cap.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::SqliteBackend;
    use crate::error::HealthError;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` calls that touch samples or settings.
    struct FlakyBackend {
        inner: SqliteBackend,
        failures: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                inner: SqliteBackend::open_in_memory().unwrap(),
                failures: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(HealthError::other("disk I/O error"));
            }
            Ok(())
        }
    }

    impl StateBackend for FlakyBackend {
        fn append_sample(&self, sample: &MetricSample) -> Result<()> {
            self.trip()?;
            self.inner.append_sample(sample)
        }
        fn load_samples(&self, limit: usize) -> Result<Vec<MetricSample>> {
            self.inner.load_samples(limit)
        }
        fn trim_samples(&self, older_than: DateTime<Utc>, keep_min: usize) -> Result<usize> {
            self.inner.trim_samples(older_than, keep_min)
        }
        fn append_repair(&self, record: &RepairRecord) -> Result<()> {
            self.inner.append_repair(record)
        }
        fn load_repairs(&self, limit: usize) -> Result<Vec<RepairRecord>> {
            self.inner.load_repairs(limit)
        }
        fn save_task(&self, task: &MaintenanceTask) -> Result<()> {
            self.inner.save_task(task)
        }
        fn delete_task(&self, id: i64) -> Result<()> {
            self.inner.delete_task(id)
        }
        fn load_tasks(&self) -> Result<Vec<MaintenanceTask>> {
            self.inner.load_tasks()
        }
        fn append_task_error(&self, error: &TaskError) -> Result<()> {
            self.inner.append_task_error(error)
        }
        fn load_task_errors(&self, task_id: Option<i64>) -> Result<Vec<TaskError>> {
            self.inner.load_task_errors(task_id)
        }
        fn set_setting(&self, key: &str, value: &str) -> Result<()> {
            self.trip()?;
            self.inner.set_setting(key, value)
        }
        fn get_setting(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_setting(key)
        }
        fn settings(&self) -> Result<Vec<(String, String)>> {
            self.inner.settings()
        }
    }

    fn sample(secs: i64) -> StorageOp {
        StorageOp::AppendSample(MetricSample::at(Utc.timestamp_opt(secs, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let backend = Arc::new(FlakyBackend::new(2));
        let queue = WriteBehindQueue::new(backend.clone()).backoff(Duration::ZERO);

        assert!(queue.write(sample(1)).await);
        assert!(!queue.is_degraded());
        assert_eq!(backend.load_samples(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_queues_then_replays_in_order() {
        let backend = Arc::new(FlakyBackend::new(WRITE_ATTEMPTS + 1));
        let queue = WriteBehindQueue::new(backend.clone()).backoff(Duration::ZERO);

        assert!(!queue.write(sample(1)).await);
        assert!(queue.is_degraded());

        // One failure left: the replay fails, so the new write queues behind it.
        assert!(!queue.write(sample(2)).await);
        assert_eq!(queue.pending_len(), 2);

        assert_eq!(queue.flush(), 2);
        assert!(!queue.is_degraded());
        let secs: Vec<i64> = backend
            .load_samples(10)
            .unwrap()
            .iter()
            .map(|s| s.timestamp.timestamp())
            .collect();
        assert_eq!(secs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_cap_drops_oldest() {
        let backend = Arc::new(FlakyBackend::new(u32::MAX));
        let queue = WriteBehindQueue::with_capacity(backend, 2).backoff(Duration::ZERO);
        for i in 0..4 {
            queue
                .write(StorageOp::SetSetting {
                    key: format!("k{}", i),
                    value: "v".into(),
                })
                .await;
        }
        assert_eq!(queue.pending_len(), 2);
        assert_eq!(queue.dropped(), 2);
    }

    fn setting(key: &str) -> StorageOp {
        StorageOp::SetSetting {
            key: key.to_string(),
            value: "v".into(),
        }
    }

    #[test]
    fn test_submit_outside_runtime_parks_until_flush() {
        let backend = Arc::new(FlakyBackend::new(1));
        let queue = Arc::new(WriteBehindQueue::new(backend.clone()));

        assert!(!queue.submit(setting("a")));
        assert!(queue.is_degraded());
        // Later writes queue behind the parked one.
        assert!(queue.submit(setting("b")));
        assert!(!queue.is_degraded());
        assert_eq!(backend.get_setting("a").unwrap().as_deref(), Some("v"));
        assert_eq!(backend.get_setting("b").unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_submitted_write_is_retried_with_backoff() {
        let backend = Arc::new(FlakyBackend::new(2));
        let queue = Arc::new(WriteBehindQueue::new(backend.clone()).backoff(Duration::from_millis(1)));

        assert!(!queue.submit(setting("a")));
        assert!(queue.retry_pending().await);
        assert_eq!(backend.get_setting("a").unwrap().as_deref(), Some("v"));
    }
}
