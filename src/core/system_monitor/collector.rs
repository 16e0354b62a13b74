use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sysinfo::{
    Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind,
    ProcessStatus, ProcessesToUpdate, RefreshKind, System,
};

use super::metrics::*;
use super::temperature::{resolve_temperature, synthesize_fan_rpm, TEMPERATURE_CACHE_TTL};
use crate::core::cleaner::TempCleaner;
use crate::core::diagnostics::DiagnosticInput;
use crate::error::ProbeError;
use crate::platform::sensors;

/// Source of metric samples.
///
/// `SensorProbe` reads the host; tests drive the orchestrator with scripted
/// implementations.
pub trait Probe: Send {
    /// Take one sample. May block for a bounded interval.
    fn probe(&mut self) -> Result<MetricSample, ProbeError>;

    /// Gather everything the diagnostic engine needs beyond the sample.
    fn diagnostic_input(&mut self, sample: Arc<MetricSample>) -> DiagnosticInput {
        DiagnosticInput::from_sample(sample)
    }

    /// Current process inventory.
    fn processes(&mut self) -> Vec<ProcessInfo> {
        Vec::new()
    }
}

/// Configuration for metrics collection
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub collect_temperature: bool,
    pub collect_fan: bool,
    pub collect_battery: bool,
    pub collect_network: bool,
    pub collect_partitions: bool,
    pub temperature_ttl: Duration,
    /// Wait before the first CPU reading so usage is meaningful; capped at 2 s.
    pub warmup: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collect_temperature: true,
            collect_fan: true,
            collect_battery: true,
            collect_network: true,
            collect_partitions: true,
            temperature_ttl: TEMPERATURE_CACHE_TTL,
            warmup: sysinfo::MINIMUM_CPU_UPDATE_INTERVAL,
        }
    }
}

/// Collects system metrics from the host via sysinfo and platform sensors
pub struct SensorProbe {
    system: System,
    components: Components,
    disks: Disks,
    networks: Networks,
    config: CollectorConfig,
    warmed_up: bool,
}

impl SensorProbe {
    /// Create a new SensorProbe with default configuration
    pub fn new() -> Self {
        Self::with_config(CollectorConfig::default())
    }

    /// Create a new SensorProbe with custom configuration
    pub fn with_config(config: CollectorConfig) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram());

        Self {
            system: System::new_with_specifics(refresh_kind),
            components: Components::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            config,
            warmed_up: false,
        }
    }

    fn warm_up(&mut self) {
        if self.warmed_up {
            return;
        }
        self.system.refresh_cpu_usage();
        std::thread::sleep(self.config.warmup.min(Duration::from_secs(2)));
        self.warmed_up = true;
    }

    fn collect_partitions(&mut self) -> Vec<PartitionMetrics> {
        self.disks.refresh(true);
        self.disks
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| PartitionMetrics {
                fs_type: disk.file_system().to_string_lossy().to_string(),
                ..PartitionMetrics::new(
                    &disk.name().to_string_lossy(),
                    &disk.mount_point().to_string_lossy(),
                    disk.total_space(),
                    disk.available_space(),
                )
            })
            .collect()
    }

    fn collect_network_totals(&mut self) -> (u64, u64) {
        self.networks.refresh(true);
        self.networks.values().fold((0, 0), |(sent, recv), data| {
            (
                sent + data.total_transmitted(),
                recv + data.total_received(),
            )
        })
    }

    fn network_errors(&mut self) -> u64 {
        self.networks.refresh(true);
        self.networks
            .values()
            .map(|d| d.total_errors_on_received() + d.total_errors_on_transmitted())
            .sum()
    }

    fn refresh_processes(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
    }

    fn collect_processes(&self) -> Vec<ProcessInfo> {
        let total_memory = self.system.total_memory();
        self.system
            .processes()
            .values()
            .map(|proc| {
                let mem = proc.memory();
                ProcessInfo {
                    pid: proc.pid().as_u32(),
                    parent_pid: proc.parent().map(|p| p.as_u32()),
                    name: proc.name().to_string_lossy().to_string(),
                    cpu_percent: proc.cpu_usage(),
                    memory_percent: if total_memory > 0 {
                        (mem as f32 / total_memory as f32) * 100.0
                    } else {
                        0.0
                    },
                    memory_bytes: mem,
                    is_zombie: proc.status() == ProcessStatus::Zombie,
                }
            })
            .collect()
    }
}

impl Probe for SensorProbe {
    fn probe(&mut self) -> Result<MetricSample, ProbeError> {
        self.warm_up();
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu_count = self.system.cpus().len();
        let ram_total = self.system.total_memory();
        if cpu_count == 0 {
            return Err(ProbeError::new("CPU statistics unavailable"));
        }
        if ram_total == 0 {
            return Err(ProbeError::new("memory statistics unavailable"));
        }

        let cpu_percent = self.system.global_cpu_usage().clamp(0.0, 100.0);
        let ram_used = self.system.used_memory();

        let mut sample = MetricSample {
            timestamp: Utc::now(),
            cpu_percent,
            ram_percent: (ram_used as f32 / ram_total as f32) * 100.0,
            ram_used_bytes: ram_used,
            ram_total_bytes: ram_total,
            ..Default::default()
        };

        if self.config.collect_temperature {
            let components = &mut self.components;
            let reading = resolve_temperature(cpu_percent, self.config.temperature_ttl, || {
                let measured = sensors::read_cpu_temperature(components);
                if measured.is_none() {
                    sensors::log_sensor_unavailable("cpu_temperature", "no thermal sensor found");
                }
                measured
            });
            sample.cpu_temp_c = Some(reading);
        }

        if self.config.collect_fan {
            sample.fan_rpm = match sensors::read_fan_rpm() {
                Some(rpm) => Some(SensorReading::measured(rpm)),
                None => sample
                    .temperature()
                    .map(|t| SensorReading::synthesized(synthesize_fan_rpm(t))),
            };
        }

        if self.config.collect_partitions {
            sample.per_partition = self.collect_partitions();
            if let Some(system) = system_partition(&sample.per_partition) {
                sample.disk_percent = Some(system.usage_percent);
                sample.disk_free_bytes = Some(system.free_bytes);
                sample.disk_total_bytes = Some(system.total_bytes);
            }
        }

        let boot = System::boot_time();
        if boot > 0 {
            sample.boot_time = DateTime::from_timestamp(boot as i64, 0);
            sample.uptime_seconds = Some(System::uptime());
        }

        self.refresh_processes();
        sample.process_count = Some(self.system.processes().len() as u32);

        if self.config.collect_network {
            let (sent, recv) = self.collect_network_totals();
            sample.net_bytes_sent = Some(sent);
            sample.net_bytes_recv = Some(recv);
        }

        if self.config.collect_battery {
            if let Some((percent, plugged)) = sensors::read_battery() {
                sample.battery_percent = Some(percent);
                sample.battery_plugged = Some(plugged);
            }
        }

        Ok(sample)
    }

    fn diagnostic_input(&mut self, sample: Arc<MetricSample>) -> DiagnosticInput {
        self.refresh_processes();
        let temp_files_bytes = Some(TempCleaner::new().scan().total_size);

        DiagnosticInput {
            processes: self.collect_processes(),
            disk_io: sensors::read_disk_io_times(),
            temp_files_bytes,
            active_connections: sensors::count_active_connections(),
            network_errors: Some(self.network_errors()),
            ..DiagnosticInput::from_sample(sample)
        }
    }

    fn processes(&mut self) -> Vec<ProcessInfo> {
        self.refresh_processes();
        self.collect_processes()
    }
}

impl Default for SensorProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// The partition holding the OS, or the fullest one when it cannot be found.
pub fn system_partition(partitions: &[PartitionMetrics]) -> Option<&PartitionMetrics> {
    let root = if cfg!(windows) { "C:\\" } else { "/" };
    partitions
        .iter()
        .find(|p| p.mount_point.eq_ignore_ascii_case(root))
        .or_else(|| {
            partitions.iter().max_by(|a, b| {
                a.usage_percent
                    .partial_cmp(&b.usage_percent)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        })
}
