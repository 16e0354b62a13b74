//! Persistence for samples, repairs, tasks and settings.
//!
//! Two interchangeable backends implement [`StateBackend`]: SQLite for the
//! full history and a single JSON document for lightweight installs.

mod json_file;
mod migrations;
mod queue;
mod sqlite;

pub use json_file::{JsonFileBackend, JSON_SAMPLE_CAP};
pub use queue::{StorageOp, WriteBehindQueue, DEFAULT_QUEUE_CAPACITY, WRITE_ATTEMPTS};
pub use sqlite::SqliteBackend;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::repair::RepairRecord;
use crate::core::scheduler::{MaintenanceTask, TaskError};
use crate::core::system_monitor::MetricSample;
use crate::error::{HealthError, Result};

/// Durable state shared by the monitor, dispatcher and scheduler.
pub trait StateBackend: Send + Sync {
    fn append_sample(&self, sample: &MetricSample) -> Result<()>;
    /// The most recent `limit` samples, oldest first.
    fn load_samples(&self, limit: usize) -> Result<Vec<MetricSample>>;
    /// Delete samples older than `older_than`, always keeping the newest `keep_min`.
    fn trim_samples(&self, older_than: DateTime<Utc>, keep_min: usize) -> Result<usize>;

    fn append_repair(&self, record: &RepairRecord) -> Result<()>;
    /// The most recent `limit` records, oldest first.
    fn load_repairs(&self, limit: usize) -> Result<Vec<RepairRecord>>;

    /// Insert or replace by id.
    fn save_task(&self, task: &MaintenanceTask) -> Result<()>;
    fn delete_task(&self, id: i64) -> Result<()>;
    fn load_tasks(&self) -> Result<Vec<MaintenanceTask>>;

    fn append_task_error(&self, error: &TaskError) -> Result<()>;
    fn load_task_errors(&self, task_id: Option<i64>) -> Result<Vec<TaskError>>;

    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn settings(&self) -> Result<Vec<(String, String)>>;
}

/// `<data dir>/healthmon`, created on demand.
pub fn data_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| HealthError::capability_missing("Could not determine data directory"))?
        .join("healthmon");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Backend kinds selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    JsonFile,
}

/// Open the default backend of `kind` under [`data_dir`].
pub fn open_default(kind: BackendKind) -> Result<Arc<dyn StateBackend>> {
    let dir = data_dir()?;
    let backend: Arc<dyn StateBackend> = match kind {
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&dir.join("healthmon.db"))?),
        BackendKind::JsonFile => Arc::new(JsonFileBackend::open(&dir.join("state.json"))?),
    };
    Ok(backend)
}
