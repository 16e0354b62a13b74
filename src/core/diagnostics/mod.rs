//! Issue detection from the latest sample plus a process inventory.

mod issue;

pub use issue::{Issue, IssueKind, IssueTarget};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::repair::SafeList;
use crate::core::system_monitor::{MetricSample, ProcessInfo, Severity};

const GIB: u64 = 1024 * 1024 * 1024;

/// Cumulative I/O time for one block device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskIoTimes {
    pub device: String,
    pub read_time_ms: u64,
    pub write_time_ms: u64,
}

/// Everything the engine inspects. Missing optional inputs skip their checks.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticInput {
    pub sample: Arc<MetricSample>,
    pub processes: Vec<ProcessInfo>,
    pub disk_io: Vec<DiskIoTimes>,
    pub temp_files_bytes: Option<u64>,
    pub active_connections: Option<u32>,
    pub network_errors: Option<u64>,
}

impl DiagnosticInput {
    pub fn from_sample(sample: Arc<MetricSample>) -> Self {
        Self {
            sample,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticThresholds {
    pub cpu_percent: f32,
    pub ram_critical: f32,
    pub ram_warning: f32,
    pub disk_full: f32,
    pub disk_low: f32,
    pub process_cpu: f32,
    pub process_memory: f32,
    pub disk_io_time_ms: u64,
    pub temp_files_bytes: u64,
    pub connections: u32,
    pub network_errors: u64,
    pub temperature_c: f32,
    pub uptime_secs: u64,
    pub process_count: u32,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            ram_critical: 95.0,
            ram_warning: 85.0,
            disk_full: 95.0,
            disk_low: 85.0,
            process_cpu: 80.0,
            process_memory: 20.0,
            disk_io_time_ms: 10_000,
            temp_files_bytes: GIB,
            connections: 200,
            network_errors: 100,
            temperature_c: 85.0,
            uptime_secs: 7 * 24 * 3600,
            process_count: 300,
        }
    }
}

pub struct DiagnosticEngine {
    thresholds: DiagnosticThresholds,
    safe_list: SafeList,
}

impl DiagnosticEngine {
    pub fn new(thresholds: DiagnosticThresholds, safe_list: SafeList) -> Self {
        Self {
            thresholds,
            safe_list,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let thresholds = DiagnosticThresholds {
            ram_warning: config.thresholds.ram_warning,
            ..Default::default()
        };
        Self::new(thresholds, SafeList::for_current_platform())
    }

    pub fn thresholds(&self) -> &DiagnosticThresholds {
        &self.thresholds
    }

    /// Inspect `input` and return every issue found, in a fixed order.
    pub fn diagnose(&self, input: &DiagnosticInput) -> Vec<Issue> {
        let mut issues = Vec::new();
        self.check_cpu(input, &mut issues);
        self.check_memory(input, &mut issues);
        self.check_disks(input, &mut issues);
        self.check_processes(input, &mut issues);
        self.check_disk_io(input, &mut issues);
        self.check_temp_files(input, &mut issues);
        self.check_network(input, &mut issues);
        self.check_temperature(input, &mut issues);
        self.check_uptime(input, &mut issues);
        self.check_process_count(input, &mut issues);
        issues
    }

    fn check_cpu(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        let cpu = input.sample.cpu_percent;
        if cpu > self.thresholds.cpu_percent {
            issues.push(Issue::new(
                IssueKind::HighCpu,
                Severity::Warning,
                format!("CPU usage at {:.1}%", cpu),
                None,
                Some(cpu as f64),
            ));
        }
    }

    fn check_memory(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        let ram = input.sample.ram_percent;
        if ram > self.thresholds.ram_critical {
            issues.push(Issue::new(
                IssueKind::HighMemoryCritical,
                Severity::Critical,
                format!("Memory usage critical at {:.1}%", ram),
                None,
                Some(ram as f64),
            ));
        } else if ram > self.thresholds.ram_warning {
            issues.push(Issue::new(
                IssueKind::HighMemoryWarn,
                Severity::Warning,
                format!("Memory usage high at {:.1}%", ram),
                None,
                Some(ram as f64),
            ));
        }
    }

    fn check_disks(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        let partitions: Vec<(String, f32)> = if input.sample.per_partition.is_empty() {
            input
                .sample
                .disk_percent
                .map(|p| vec![(String::new(), p)])
                .unwrap_or_default()
        } else {
            input
                .sample
                .per_partition
                .iter()
                .map(|p| (p.mount_point.clone(), p.usage_percent))
                .collect()
        };

        for (mount_point, usage) in partitions {
            let (kind, severity) = if usage > self.thresholds.disk_full {
                (IssueKind::DiskFull, Severity::Critical)
            } else if usage > self.thresholds.disk_low {
                (IssueKind::DiskLow, Severity::Warning)
            } else {
                continue;
            };
            let label = if mount_point.is_empty() {
                "System disk".to_string()
            } else {
                format!("Disk {}", mount_point)
            };
            let target = (!mount_point.is_empty()).then(|| IssueTarget::Partition { mount_point });
            issues.push(Issue::new(
                kind,
                severity,
                format!("{} at {:.1}% capacity", label, usage),
                target,
                Some(usage as f64),
            ));
        }
    }

    fn check_processes(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        for proc in &input.processes {
            if self.safe_list.is_protected(proc.pid, &proc.name) {
                continue;
            }
            if proc.cpu_percent > self.thresholds.process_cpu {
                issues.push(Issue::new(
                    IssueKind::HighCpuProcess,
                    Severity::Warning,
                    format!("{} (pid {}) using {:.1}% CPU", proc.name, proc.pid, proc.cpu_percent),
                    Some(IssueTarget::process(proc)),
                    Some(proc.cpu_percent as f64),
                ));
            }
            if proc.memory_percent > self.thresholds.process_memory {
                issues.push(Issue::new(
                    IssueKind::HighMemoryProcess,
                    Severity::Warning,
                    format!(
                        "{} (pid {}) using {:.1}% of memory",
                        proc.name, proc.pid, proc.memory_percent
                    ),
                    Some(IssueTarget::process(proc)),
                    Some(proc.memory_percent as f64),
                ));
            }
        }

        let zombies = input.processes.iter().filter(|p| p.is_zombie).count();
        if zombies > 0 {
            issues.push(Issue::new(
                IssueKind::ZombieProcesses,
                Severity::Info,
                format!("{} zombie process(es) waiting to be reaped", zombies),
                None,
                Some(zombies as f64),
            ));
        }
    }

    fn check_disk_io(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        let limit = self.thresholds.disk_io_time_ms;
        for io in &input.disk_io {
            if io.read_time_ms > limit || io.write_time_ms > limit {
                issues.push(Issue::new(
                    IssueKind::SlowDiskIo,
                    Severity::Warning,
                    format!(
                        "Device {} spent {} ms reading and {} ms writing",
                        io.device, io.read_time_ms, io.write_time_ms
                    ),
                    Some(IssueTarget::Device {
                        device: io.device.clone(),
                    }),
                    Some(io.read_time_ms.max(io.write_time_ms) as f64),
                ));
            }
        }
    }

    fn check_temp_files(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        if let Some(bytes) = input.temp_files_bytes {
            if bytes > self.thresholds.temp_files_bytes {
                issues.push(Issue::new(
                    IssueKind::LargeTempFiles,
                    Severity::Info,
                    format!(
                        "Temporary files occupy {:.2} GiB",
                        bytes as f64 / GIB as f64
                    ),
                    None,
                    Some(bytes as f64),
                ));
            }
        }
    }

    fn check_network(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        if let Some(conns) = input.active_connections {
            if conns > self.thresholds.connections {
                issues.push(Issue::new(
                    IssueKind::TooManyConnections,
                    Severity::Warning,
                    format!("{} active network connections", conns),
                    None,
                    Some(conns as f64),
                ));
            }
        }
        if let Some(errors) = input.network_errors {
            if errors > self.thresholds.network_errors {
                issues.push(Issue::new(
                    IssueKind::NetworkErrors,
                    Severity::Warning,
                    format!("{} network errors on interfaces", errors),
                    None,
                    Some(errors as f64),
                ));
            }
        }
    }

    fn check_temperature(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        if let Some(temp) = input.sample.temperature() {
            if temp > self.thresholds.temperature_c {
                issues.push(Issue::new(
                    IssueKind::HighTemperature,
                    Severity::Critical,
                    format!("CPU temperature at {:.1}°C", temp),
                    None,
                    Some(temp as f64),
                ));
            }
        }
    }

    fn check_uptime(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        if let Some(uptime) = input.sample.uptime_seconds {
            if uptime > self.thresholds.uptime_secs {
                issues.push(Issue::new(
                    IssueKind::LongUptime,
                    Severity::Info,
                    format!("System up for {} days without a restart", uptime / 86_400),
                    None,
                    Some(uptime as f64),
                ));
            }
        }
    }

    fn check_process_count(&self, input: &DiagnosticInput, issues: &mut Vec<Issue>) {
        if let Some(count) = input.sample.process_count {
            if count > self.thresholds.process_count {
                issues.push(Issue::new(
                    IssueKind::TooManyProcesses,
                    Severity::Info,
                    format!("{} processes running", count),
                    None,
                    Some(count as f64),
                ));
            }
        }
    }
}

impl Default for DiagnosticEngine {
    fn default() -> Self {
        Self::new(DiagnosticThresholds::default(), SafeList::for_current_platform())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::system_monitor::{PartitionMetrics, SensorReading};

    fn input(sample: MetricSample) -> DiagnosticInput {
        DiagnosticInput::from_sample(Arc::new(sample))
    }

    fn kinds(issues: &[Issue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_quiet_system_has_no_issues() {
        let engine = DiagnosticEngine::default();
        assert!(engine.diagnose(&input(MetricSample::default())).is_empty());
    }

    #[test]
    fn test_memory_bands() {
        let engine = DiagnosticEngine::default();
        let warn = engine.diagnose(&input(MetricSample {
            ram_percent: 90.0,
            ..Default::default()
        }));
        assert_eq!(kinds(&warn), vec![IssueKind::HighMemoryWarn]);

        let crit = engine.diagnose(&input(MetricSample {
            ram_percent: 96.0,
            ..Default::default()
        }));
        assert_eq!(kinds(&crit), vec![IssueKind::HighMemoryCritical]);

        let edge = engine.diagnose(&input(MetricSample {
            ram_percent: 95.0,
            ..Default::default()
        }));
        assert_eq!(kinds(&edge), vec![IssueKind::HighMemoryWarn]);
    }

    #[test]
    fn test_partitions_checked_individually() {
        let engine = DiagnosticEngine::default();
        let issues = engine.diagnose(&input(MetricSample {
            per_partition: vec![
                PartitionMetrics::new("a", "/", 100, 2),
                PartitionMetrics::new("b", "/home", 100, 10),
                PartitionMetrics::new("c", "/data", 100, 50),
            ],
            ..Default::default()
        }));
        assert_eq!(kinds(&issues), vec![IssueKind::DiskFull, IssueKind::DiskLow]);
        assert_ne!(issues[0].id, issues[1].id);
    }

    #[test]
    fn test_safe_listed_process_not_reported() {
        let engine = DiagnosticEngine::default();
        let mut diag = input(MetricSample::default());
        diag.processes = vec![
            ProcessInfo {
                pid: 4242,
                name: "kernel".to_string(),
                cpu_percent: 99.0,
                ..Default::default()
            },
            ProcessInfo {
                pid: 4343,
                name: "miner".to_string(),
                cpu_percent: 99.0,
                memory_percent: 30.0,
                ..Default::default()
            },
        ];
        let issues = engine.diagnose(&diag);
        assert_eq!(
            kinds(&issues),
            vec![IssueKind::HighCpuProcess, IssueKind::HighMemoryProcess]
        );
        assert!(issues.iter().all(|i| i.auto_fixable));
    }

    #[test]
    fn test_extended_inputs() {
        let engine = DiagnosticEngine::default();
        let mut diag = input(MetricSample {
            cpu_temp_c: Some(SensorReading::measured(91.0)),
            uptime_seconds: Some(8 * 86_400),
            process_count: Some(420),
            ..Default::default()
        });
        diag.disk_io = vec![DiskIoTimes {
            device: "sda".to_string(),
            read_time_ms: 20_000,
            write_time_ms: 0,
        }];
        diag.temp_files_bytes = Some(2 * GIB);
        diag.active_connections = Some(250);
        diag.network_errors = Some(150);

        let issues = engine.diagnose(&diag);
        assert_eq!(
            kinds(&issues),
            vec![
                IssueKind::SlowDiskIo,
                IssueKind::LargeTempFiles,
                IssueKind::TooManyConnections,
                IssueKind::NetworkErrors,
                IssueKind::HighTemperature,
                IssueKind::LongUptime,
                IssueKind::TooManyProcesses,
            ]
        );
        let slow = &issues[0];
        assert!(!slow.auto_fixable);
    }

    #[test]
    fn test_ids_stable_across_runs() {
        let engine = DiagnosticEngine::default();
        let sample = MetricSample {
            cpu_percent: 95.0,
            ..Default::default()
        };
        let a = engine.diagnose(&input(sample.clone()));
        let b = engine.diagnose(&input(MetricSample {
            cpu_percent: 97.0,
            ..sample
        }));
        assert_eq!(a[0].id, b[0].id);
    }
}
