use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Maintenance area a task belongs to; selects the action run on firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Cleanup,
    Optimization,
    Updates,
    Backup,
    Security,
    DiskHealth,
    /// User reminder with no bound action.
    Custom,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 7] = [
        TaskCategory::Cleanup,
        TaskCategory::Optimization,
        TaskCategory::Updates,
        TaskCategory::Backup,
        TaskCategory::Security,
        TaskCategory::DiskHealth,
        TaskCategory::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Cleanup => "cleanup",
            TaskCategory::Optimization => "optimization",
            TaskCategory::Updates => "updates",
            TaskCategory::Backup => "backup",
            TaskCategory::Security => "security",
            TaskCategory::DiskHealth => "disk_health",
            TaskCategory::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "completed" => Some(TaskStatus::Completed),
            "skipped" => Some(TaskStatus::Skipped),
            _ => None,
        }
    }
}

/// A scheduled maintenance task. Times are local wall-clock times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub scheduled_at: NaiveDateTime,
    pub priority: Priority,
    pub category: TaskCategory,
    pub auto_generated: bool,
    pub status: TaskStatus,
    pub completed_at: Option<NaiveDateTime>,
    /// Failed firing attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl MaintenanceTask {
    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.is_pending() && self.scheduled_at <= now
    }
}

/// Fields supplied when creating a task; the scheduler assigns the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub scheduled_at: NaiveDateTime,
    pub priority: Priority,
    pub category: TaskCategory,
}

impl NewTask {
    pub fn new(title: &str, category: TaskCategory, scheduled_at: NaiveDateTime) -> Self {
        Self {
            title: title.to_string(),
            description: String::new(),
            scheduled_at,
            priority: Priority::Medium,
            category,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub(crate) fn into_task(self, id: i64, auto_generated: bool) -> MaintenanceTask {
        MaintenanceTask {
            id,
            title: self.title,
            description: self.description,
            scheduled_at: self.scheduled_at,
            priority: self.priority,
            category: self.category,
            auto_generated,
            status: TaskStatus::Pending,
            completed_at: None,
            attempts: 0,
        }
    }
}

/// A failed firing attempt, kept for the task error table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub task_id: i64,
    pub occurred_at: NaiveDateTime,
    pub attempt: u32,
    pub message: String,
}
