use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::diagnostics::IssueKind;
use crate::core::scheduler::TaskCategory;

/// Records kept in memory by the dispatcher.
pub const REPAIR_HISTORY_CAPACITY: usize = 200;

/// Why a repair did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairFailure {
    DisabledOrUnsafe,
    SafeListed,
    Timeout,
    Cancelled,
    NothingToDo,
    ActionFailed,
}

impl RepairFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairFailure::DisabledOrUnsafe => "disabled-or-unsafe",
            RepairFailure::SafeListed => "safe-listed",
            RepairFailure::Timeout => "timeout",
            RepairFailure::Cancelled => "cancelled",
            RepairFailure::NothingToDo => "nothing-to-do",
            RepairFailure::ActionFailed => "action-failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            RepairFailure::DisabledOrUnsafe,
            RepairFailure::SafeListed,
            RepairFailure::Timeout,
            RepairFailure::Cancelled,
            RepairFailure::NothingToDo,
            RepairFailure::ActionFailed,
        ]
        .into_iter()
        .find(|f| f.as_str() == s)
    }
}

impl fmt::Display for RepairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a repair was run for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairSubject {
    Issue { kind: IssueKind, issue_id: String },
    Maintenance { category: TaskCategory },
}

impl RepairSubject {
    pub fn issue_kind(&self) -> Option<IssueKind> {
        match self {
            RepairSubject::Issue { kind, .. } => Some(*kind),
            RepairSubject::Maintenance { .. } => None,
        }
    }

    /// Stable label used for storage and per-kind serialization.
    pub fn label(&self) -> String {
        match self {
            RepairSubject::Issue { kind, .. } => kind.as_str().to_string(),
            RepairSubject::Maintenance { category } => format!("maintenance:{}", category),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub timestamp: DateTime<Utc>,
    pub subject: RepairSubject,
    pub action: String,
    pub success: bool,
    pub failure: Option<RepairFailure>,
    pub message: String,
    pub duration: Duration,
    /// Bytes freed by cleanup-style actions.
    #[serde(default)]
    pub bytes_freed: u64,
    /// Processes terminated or reaped.
    #[serde(default)]
    pub processes_affected: u32,
}

impl RepairRecord {
    pub fn succeeded(subject: RepairSubject, action: &str, message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            subject,
            action: action.to_string(),
            success: true,
            failure: None,
            message,
            duration: Duration::ZERO,
            bytes_freed: 0,
            processes_affected: 0,
        }
    }

    pub fn failed(
        subject: RepairSubject,
        action: &str,
        failure: RepairFailure,
        message: String,
    ) -> Self {
        Self {
            success: false,
            failure: Some(failure),
            ..Self::succeeded(subject, action, message)
        }
    }

    /// The failure reason, if any, as its kebab-case string.
    pub fn reason(&self) -> Option<&'static str> {
        self.failure.map(RepairFailure::as_str)
    }

    pub fn issue_kind(&self) -> Option<IssueKind> {
        self.subject.issue_kind()
    }
}

/// Bounded, append-only record history; oldest entries fall off.
#[derive(Debug)]
pub struct RepairHistory {
    records: RwLock<VecDeque<RepairRecord>>,
    capacity: usize,
}

impl RepairHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, record: RepairRecord) {
        let mut records = self.records.write();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<RepairRecord> {
        let records = self.records.read();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RepairHistory {
    fn default() -> Self {
        Self::new(REPAIR_HISTORY_CAPACITY)
    }
}
