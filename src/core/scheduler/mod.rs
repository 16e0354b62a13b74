//! Maintenance task lifecycle: generation, user edits and firing.

mod task;
mod templates;

pub use task::{MaintenanceTask, NewTask, Priority, TaskCategory, TaskError, TaskStatus};
pub use templates::{generate, SCHEDULE_HORIZON_DAYS};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::config::SchedulerSettings;
use crate::core::repair::{RepairDispatcher, RepairFailure, RepairRecord};
use crate::core::storage::{StateBackend, StorageOp, WriteBehindQueue};
use crate::error::{HealthError, Result};

/// Failed firings before a task is marked skipped.
pub const MAX_TASK_ATTEMPTS: u32 = 3;

/// Completed auto-generated tasks older than this are purged.
pub const COMPLETED_RETENTION_DAYS: i64 = 30;

pub fn default_postpone() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Default)]
struct TaskTable {
    tasks: BTreeMap<i64, MaintenanceTask>,
    next_id: i64,
}

impl TaskTable {
    fn from_tasks(tasks: Vec<MaintenanceTask>) -> Self {
        let next_id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        Self {
            tasks: tasks.into_iter().map(|t| (t.id, t)).collect(),
            next_id: next_id.max(1),
        }
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    fn get_mut(&mut self, id: i64) -> Result<&mut MaintenanceTask> {
        self.tasks.get_mut(&id).ok_or(HealthError::TaskNotFound(id))
    }
}

/// Owns the task table. Mutations take the table's write lock; the lock is
/// never held while a task action runs.
pub struct TaskScheduler {
    table: RwLock<TaskTable>,
    settings: RwLock<SchedulerSettings>,
    storage: Option<Arc<WriteBehindQueue>>,
    errors: Mutex<Vec<TaskError>>,
}

impl TaskScheduler {
    /// Scheduler with an in-memory table only.
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            table: RwLock::new(TaskTable::default()),
            settings: RwLock::new(settings),
            storage: None,
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Scheduler persisting to `backend` through a queue of its own.
    pub fn with_backend(settings: SchedulerSettings, backend: Arc<dyn StateBackend>) -> Result<Self> {
        Self::with_storage(settings, Arc::new(WriteBehindQueue::new(backend)))
    }

    /// Scheduler persisting through `queue`, so failed writes are retried
    /// and kept in order with the monitor's other writes.
    pub fn with_storage(settings: SchedulerSettings, queue: Arc<WriteBehindQueue>) -> Result<Self> {
        let tasks = queue.backend().load_tasks()?;
        log::debug!("Loaded {} scheduled tasks", tasks.len());
        Ok(Self {
            table: RwLock::new(TaskTable::from_tasks(tasks)),
            settings: RwLock::new(settings),
            storage: Some(queue),
            errors: Mutex::new(Vec::new()),
        })
    }

    /// Queue the scheduler writes through, if it persists at all.
    pub fn storage(&self) -> Option<&Arc<WriteBehindQueue>> {
        self.storage.as_ref()
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings.read().clone()
    }

    fn persist(&self, task: &MaintenanceTask) {
        if let Some(queue) = &self.storage {
            queue.submit(StorageOp::SaveTask(task.clone()));
        }
    }

    fn persist_delete(&self, id: i64) {
        if let Some(queue) = &self.storage {
            queue.submit(StorageOp::DeleteTask(id));
        }
    }

    /// Replace pending auto-generated tasks with a fresh schedule starting at
    /// `now`. User tasks are untouched. Slots that were already completed are
    /// not recreated, and a regenerated slot keeps the id it had before.
    pub fn regenerate(&self, now: NaiveDateTime) -> Result<usize> {
        let generated = generate(&self.settings.read(), now)?;

        let mut table = self.table.write();

        let stale: Vec<i64> = table
            .tasks
            .values()
            .filter(|t| t.auto_generated && t.status != TaskStatus::Completed)
            .map(|t| t.id)
            .collect();
        let mut previous_ids: HashMap<(String, NaiveDateTime), i64> = HashMap::new();
        for id in &stale {
            if let Some(task) = table.tasks.remove(id) {
                previous_ids.insert((task.title, task.scheduled_at), task.id);
            }
        }

        let mut inserted = Vec::with_capacity(generated.len());
        for new_task in generated {
            let done = table.tasks.values().any(|t| {
                t.auto_generated
                    && t.status == TaskStatus::Completed
                    && t.title == new_task.title
                    && t.scheduled_at == new_task.scheduled_at
            });
            if done {
                continue;
            }
            let id = match previous_ids.remove(&(new_task.title.clone(), new_task.scheduled_at)) {
                Some(id) => id,
                None => table.allocate_id(),
            };
            let task = new_task.into_task(id, true);
            table.tasks.insert(id, task.clone());
            inserted.push(task);
        }
        drop(table);

        for id in previous_ids.into_values() {
            self.persist_delete(id);
        }
        for task in &inserted {
            self.persist(task);
        }

        log::info!("Generated {} maintenance tasks", inserted.len());
        Ok(inserted.len())
    }

    /// Swap in new settings and regenerate. Invalid settings are refused and
    /// the previous ones stay active.
    pub fn update_settings(&self, settings: SchedulerSettings, now: NaiveDateTime) -> Result<usize> {
        settings.cleanup_time()?;
        *self.settings.write() = settings;
        self.regenerate(now)
    }

    pub fn add_task(&self, new_task: NewTask) -> Result<MaintenanceTask> {
        if new_task.title.trim().is_empty() {
            return Err(HealthError::invalid_transition("task title must not be empty"));
        }
        let task = {
            let mut table = self.table.write();
            let id = table.allocate_id();
            let task = new_task.into_task(id, false);
            table.tasks.insert(id, task.clone());
            task
        };
        self.persist(&task);
        log::info!("Added task {} '{}' at {}", task.id, task.title, task.scheduled_at);
        Ok(task)
    }

    pub fn delete_task(&self, id: i64) -> Result<()> {
        if self.table.write().tasks.remove(&id).is_none() {
            return Err(HealthError::TaskNotFound(id));
        }
        self.persist_delete(id);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<MaintenanceTask> {
        self.table.read().tasks.get(&id).cloned()
    }

    /// All tasks ordered by scheduled time.
    pub fn list(&self) -> Vec<MaintenanceTask> {
        let mut tasks: Vec<MaintenanceTask> = self.table.read().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn pending(&self) -> Vec<MaintenanceTask> {
        self.list().into_iter().filter(|t| t.is_pending()).collect()
    }

    /// Move a pending task later by `delta`.
    pub fn postpone(&self, id: i64, delta: Duration) -> Result<MaintenanceTask> {
        if delta <= Duration::zero() {
            return Err(HealthError::invalid_transition(format!(
                "postpone delta must be positive, got {}s",
                delta.num_seconds()
            )));
        }
        let task = {
            let mut table = self.table.write();
            let task = table.get_mut(id)?;
            if !task.is_pending() {
                return Err(HealthError::invalid_transition(format!(
                    "task {} is {}, only pending tasks can be postponed",
                    id,
                    task.status.as_str()
                )));
            }
            task.scheduled_at += delta;
            task.clone()
        };
        self.persist(&task);
        Ok(task)
    }

    /// Mark a pending task completed at `now`.
    pub fn complete(&self, id: i64, now: NaiveDateTime) -> Result<MaintenanceTask> {
        let task = {
            let mut table = self.table.write();
            let task = table.get_mut(id)?;
            if !task.is_pending() {
                return Err(HealthError::invalid_transition(format!(
                    "task {} is already {}",
                    id,
                    task.status.as_str()
                )));
            }
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            task.clone()
        };
        self.persist(&task);
        Ok(task)
    }

    /// Drop completed auto-generated tasks finished more than
    /// `COMPLETED_RETENTION_DAYS` before `now`.
    pub fn purge(&self, now: NaiveDateTime) -> usize {
        let cutoff = now - Duration::days(COMPLETED_RETENTION_DAYS);
        let removed: Vec<i64> = {
            let mut table = self.table.write();
            let ids: Vec<i64> = table
                .tasks
                .values()
                .filter(|t| {
                    t.auto_generated
                        && t.status == TaskStatus::Completed
                        && t.completed_at.unwrap_or(t.scheduled_at) < cutoff
                })
                .map(|t| t.id)
                .collect();
            for id in &ids {
                table.tasks.remove(id);
            }
            ids
        };
        for id in &removed {
            self.persist_delete(*id);
        }
        if !removed.is_empty() {
            log::info!("Purged {} completed tasks", removed.len());
        }
        removed.len()
    }

    /// Recorded firing failures, optionally for one task.
    pub fn task_errors(&self, task_id: Option<i64>) -> Vec<TaskError> {
        if let Some(queue) = &self.storage {
            match queue.backend().load_task_errors(task_id) {
                Ok(errors) => return errors,
                Err(e) => log::warn!("Failed to load task errors: {}", e),
            }
        }
        self.errors
            .lock()
            .iter()
            .filter(|e| task_id.map_or(true, |id| e.task_id == id))
            .cloned()
            .collect()
    }

    /// Fire every due pending task through `dispatcher`, oldest first.
    /// Successful tasks complete; failures are logged and retried on later
    /// ticks until `MAX_TASK_ATTEMPTS`, then skipped.
    pub async fn tick(
        &self,
        now: NaiveDateTime,
        dispatcher: &RepairDispatcher,
        cancel: &CancellationToken,
    ) -> Vec<RepairRecord> {
        let due: Vec<MaintenanceTask> = {
            let table = self.table.read();
            let mut due: Vec<MaintenanceTask> =
                table.tasks.values().filter(|t| t.is_due(now)).cloned().collect();
            due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
            due
        };

        let mut records = Vec::with_capacity(due.len());
        for task in due {
            if cancel.is_cancelled() {
                break;
            }
            log::info!("Running task {} '{}' ({})", task.id, task.title, task.category);
            let record = dispatcher.run_maintenance(task.category, cancel).await;
            self.settle(task.id, &record, now);
            records.push(record);
        }
        records
    }

    fn settle(&self, id: i64, record: &RepairRecord, now: NaiveDateTime) {
        let mut error = None;
        let task = {
            let mut table = self.table.write();
            let Some(task) = table.tasks.get_mut(&id) else {
                // Deleted while its action ran.
                return;
            };
            if !task.is_pending() {
                return;
            }

            if record.success {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now);
            } else if record.failure != Some(RepairFailure::Cancelled) {
                task.attempts += 1;
                error = Some(TaskError {
                    task_id: id,
                    occurred_at: now,
                    attempt: task.attempts,
                    message: record.message.clone(),
                });
                if task.attempts >= MAX_TASK_ATTEMPTS {
                    task.status = TaskStatus::Skipped;
                    log::warn!("Task {} '{}' skipped after {} failed attempts", id, task.title, task.attempts);
                }
            }
            task.clone()
        };

        if let Some(error) = error {
            log::error!("Task {} attempt {} failed: {}", id, error.attempt, error.message);
            if let Some(queue) = &self.storage {
                queue.submit(StorageOp::AppendTaskError(error.clone()));
            }
            self.errors.lock().push(error);
        }
        self.persist(&task);
    }
}
