use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::StateBackend;
use crate::core::repair::{RepairRecord, REPAIR_HISTORY_CAPACITY};
use crate::core::scheduler::{MaintenanceTask, TaskError};
use crate::core::system_monitor::MetricSample;
use crate::error::Result;

/// Most recent samples kept in the flat file.
pub const JSON_SAMPLE_CAP: usize = 100;

const TASK_ERROR_CAP: usize = 500;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StateDocument {
    system_history: Vec<MetricSample>,
    repair_history: Vec<RepairRecord>,
    scheduled_tasks: Vec<MaintenanceTask>,
    task_errors: Vec<TaskError>,
    settings: BTreeMap<String, String>,
}

/// Whole-state JSON document, rewritten atomically on every change.
pub struct JsonFileBackend {
    path: PathBuf,
    doc: Mutex<StateDocument>,
}

impl JsonFileBackend {
    /// Open `path`, starting empty when it is missing. A corrupt file is
    /// moved aside to `<name>.corrupt` rather than overwritten.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let doc = if path.exists() {
            let content = fs::read_to_string(path)?;
            match serde_json::from_str(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    let aside = path.with_extension("json.corrupt");
                    log::warn!(
                        "State file {} is corrupt ({}), moving it to {}",
                        path.display(),
                        e,
                        aside.display()
                    );
                    fs::rename(path, &aside)?;
                    StateDocument::default()
                }
            }
        } else {
            StateDocument::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, doc: &StateDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StateDocument),
    {
        let mut doc = self.doc.lock();
        f(&mut doc);
        self.persist(&doc)
    }
}

fn keep_last<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

fn tail<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    items[items.len().saturating_sub(n)..].to_vec()
}

impl StateBackend for JsonFileBackend {
    fn append_sample(&self, sample: &MetricSample) -> Result<()> {
        self.mutate(|doc| {
            doc.system_history.push(sample.clone());
            keep_last(&mut doc.system_history, JSON_SAMPLE_CAP);
        })
    }

    fn load_samples(&self, limit: usize) -> Result<Vec<MetricSample>> {
        Ok(tail(&self.doc.lock().system_history, limit))
    }

    fn trim_samples(&self, older_than: DateTime<Utc>, keep_min: usize) -> Result<usize> {
        let mut doc = self.doc.lock();
        let len = doc.system_history.len();
        let removable = len.saturating_sub(keep_min);
        let stale = doc
            .system_history
            .iter()
            .take(removable)
            .take_while(|s| s.timestamp < older_than)
            .count();
        if stale == 0 {
            return Ok(0);
        }
        doc.system_history.drain(..stale);
        self.persist(&doc)?;
        Ok(stale)
    }

    fn append_repair(&self, record: &RepairRecord) -> Result<()> {
        self.mutate(|doc| {
            doc.repair_history.push(record.clone());
            keep_last(&mut doc.repair_history, REPAIR_HISTORY_CAPACITY);
        })
    }

    fn load_repairs(&self, limit: usize) -> Result<Vec<RepairRecord>> {
        Ok(tail(&self.doc.lock().repair_history, limit))
    }

    fn save_task(&self, task: &MaintenanceTask) -> Result<()> {
        self.mutate(|doc| {
            match doc.scheduled_tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => doc.scheduled_tasks.push(task.clone()),
            }
            doc.scheduled_tasks
                .sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        })
    }

    fn delete_task(&self, id: i64) -> Result<()> {
        self.mutate(|doc| {
            doc.scheduled_tasks.retain(|t| t.id != id);
            doc.task_errors.retain(|e| e.task_id != id);
        })
    }

    fn load_tasks(&self) -> Result<Vec<MaintenanceTask>> {
        Ok(self.doc.lock().scheduled_tasks.clone())
    }

    fn append_task_error(&self, error: &TaskError) -> Result<()> {
        self.mutate(|doc| {
            doc.task_errors.push(error.clone());
            keep_last(&mut doc.task_errors, TASK_ERROR_CAP);
        })
    }

    fn load_task_errors(&self, task_id: Option<i64>) -> Result<Vec<TaskError>> {
        Ok(self
            .doc
            .lock()
            .task_errors
            .iter()
            .filter(|e| task_id.map_or(true, |id| e.task_id == id))
            .cloned()
            .collect())
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|doc| {
            doc.settings.insert(key.to_string(), value.to_string());
        })
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.doc.lock().settings.get(key).cloned())
    }

    fn settings(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .doc
            .lock()
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
