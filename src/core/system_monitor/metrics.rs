use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sensor value that may have been filled in by formula instead of read
/// from hardware.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading<T> {
    pub value: T,
    pub synthesized: bool,
}

impl<T> SensorReading<T> {
    pub fn measured(value: T) -> Self {
        Self {
            value,
            synthesized: false,
        }
    }

    pub fn synthesized(value: T) -> Self {
        Self {
            value,
            synthesized: true,
        }
    }
}

/// One snapshot of all metrics at an instant. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub cpu_temp_c: Option<SensorReading<f32>>,
    pub ram_percent: f32,
    pub ram_used_bytes: u64,
    pub ram_total_bytes: u64,
    pub disk_percent: Option<f32>,
    pub disk_free_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
    pub fan_rpm: Option<SensorReading<u32>>,
    pub boot_time: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<u64>,
    pub process_count: Option<u32>,
    pub net_bytes_sent: Option<u64>,
    pub net_bytes_recv: Option<u64>,
    pub battery_percent: Option<f32>,
    pub battery_plugged: Option<bool>,
    pub per_partition: Vec<PartitionMetrics>,
}

impl MetricSample {
    /// Empty sample at `timestamp`, handy as a base for struct update syntax.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn temperature(&self) -> Option<f32> {
        self.cpu_temp_c.map(|r| r.value)
    }

    pub fn fan(&self) -> Option<u32> {
        self.fan_rpm.map(|r| r.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    pub name: String,
    pub mount_point: String,
    pub fs_type: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f32,
}

impl PartitionMetrics {
    pub fn new(name: &str, mount_point: &str, total_bytes: u64, free_bytes: u64) -> Self {
        let used = total_bytes.saturating_sub(free_bytes);
        Self {
            name: name.to_string(),
            mount_point: mount_point.to_string(),
            fs_type: String::new(),
            total_bytes,
            free_bytes,
            usage_percent: if total_bytes > 0 {
                (used as f32 / total_bytes as f32) * 100.0
            } else {
                0.0
            },
        }
    }
}

/// A row of the process inventory used by diagnostics and repair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_bytes: u64,
    pub is_zombie: bool,
}
