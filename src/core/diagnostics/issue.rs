use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::system_monitor::{ProcessInfo, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighCpu,
    HighMemoryCritical,
    HighMemoryWarn,
    DiskFull,
    DiskLow,
    HighCpuProcess,
    HighMemoryProcess,
    ZombieProcesses,
    SlowDiskIo,
    LargeTempFiles,
    TooManyConnections,
    NetworkErrors,
    HighTemperature,
    LongUptime,
    TooManyProcesses,
}

impl IssueKind {
    pub const ALL: [IssueKind; 15] = [
        IssueKind::HighCpu,
        IssueKind::HighMemoryCritical,
        IssueKind::HighMemoryWarn,
        IssueKind::DiskFull,
        IssueKind::DiskLow,
        IssueKind::HighCpuProcess,
        IssueKind::HighMemoryProcess,
        IssueKind::ZombieProcesses,
        IssueKind::SlowDiskIo,
        IssueKind::LargeTempFiles,
        IssueKind::TooManyConnections,
        IssueKind::NetworkErrors,
        IssueKind::HighTemperature,
        IssueKind::LongUptime,
        IssueKind::TooManyProcesses,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IssueKind::HighCpu => "high_cpu",
            IssueKind::HighMemoryCritical => "high_memory_critical",
            IssueKind::HighMemoryWarn => "high_memory_warn",
            IssueKind::DiskFull => "disk_full",
            IssueKind::DiskLow => "disk_low",
            IssueKind::HighCpuProcess => "high_cpu_process",
            IssueKind::HighMemoryProcess => "high_memory_process",
            IssueKind::ZombieProcesses => "zombie_processes",
            IssueKind::SlowDiskIo => "slow_disk_io",
            IssueKind::LargeTempFiles => "large_temp_files",
            IssueKind::TooManyConnections => "too_many_connections",
            IssueKind::NetworkErrors => "network_errors",
            IssueKind::HighTemperature => "high_temperature",
            IssueKind::LongUptime => "long_uptime",
            IssueKind::TooManyProcesses => "too_many_processes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Whether the repair dispatcher has a mitigation for this kind.
    pub fn auto_fixable(self) -> bool {
        !matches!(self, IssueKind::SlowDiskIo | IssueKind::LongUptime)
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an issue points at, when it points at something specific.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IssueTarget {
    Process { pid: u32, name: String },
    Partition { mount_point: String },
    Device { device: String },
}

impl IssueTarget {
    pub fn process(proc: &ProcessInfo) -> Self {
        IssueTarget::Process {
            pid: proc.pid,
            name: proc.name.clone(),
        }
    }

    fn key(&self) -> String {
        match self {
            IssueTarget::Process { pid, name } => format!("process:{}:{}", pid, name),
            IssueTarget::Partition { mount_point } => format!("partition:{}", mount_point),
            IssueTarget::Device { device } => format!("device:{}", device),
        }
    }
}

impl fmt::Display for IssueTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueTarget::Process { pid, name } => write!(f, "{} (pid {})", name, pid),
            IssueTarget::Partition { mount_point } => write!(f, "{}", mount_point),
            IssueTarget::Device { device } => write!(f, "/dev/{}", device),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    pub auto_fixable: bool,
    pub target: Option<IssueTarget>,
    pub observed_value: Option<f64>,
}

impl Issue {
    pub fn new(
        kind: IssueKind,
        severity: Severity,
        description: String,
        target: Option<IssueTarget>,
        observed_value: Option<f64>,
    ) -> Self {
        Self {
            id: issue_id(kind, target.as_ref()),
            kind,
            severity,
            description,
            auto_fixable: kind.auto_fixable(),
            target,
            observed_value,
        }
    }

    pub fn target_pid(&self) -> Option<u32> {
        match &self.target {
            Some(IssueTarget::Process { pid, .. }) => Some(*pid),
            _ => None,
        }
    }
}

/// Stable id: the same kind on the same target always hashes the same.
pub fn issue_id(kind: IssueKind, target: Option<&IssueTarget>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    if let Some(target) = target {
        hasher.update(b"|");
        hasher.update(target.key().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
