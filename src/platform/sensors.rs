//! Optional sensors. Every reader returns `None` when the platform does not
//! expose the value; callers decide whether to synthesize a substitute.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sysinfo::Components;

use crate::core::diagnostics::DiskIoTimes;

const SENSOR_LOG_INTERVAL: Duration = Duration::from_secs(3600);

static SENSOR_LOG: Lazy<Mutex<HashMap<&'static str, Instant>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Log a transient sensor failure at most once per hour per sensor.
pub fn log_sensor_unavailable(sensor: &'static str, detail: &str) {
    let mut seen = SENSOR_LOG.lock();
    let due = seen
        .get(sensor)
        .map_or(true, |last| last.elapsed() >= SENSOR_LOG_INTERVAL);
    if due {
        seen.insert(sensor, Instant::now());
        log::warn!("Sensor '{}' unavailable: {}", sensor, detail);
    }
}

/// Hottest CPU-like component, falling back to the hottest component overall.
pub fn read_cpu_temperature(components: &mut Components) -> Option<f32> {
    components.refresh(true);

    const CPU_LABELS: [&str; 7] = ["cpu", "package", "tctl", "tdie", "core", "k10temp", "coretemp"];

    let readings: Vec<(String, f32)> = components
        .iter()
        .filter_map(|c| {
            c.temperature()
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(|t| (c.label().to_lowercase(), t))
        })
        .collect();

    let cpu_max = readings
        .iter()
        .filter(|(label, _)| CPU_LABELS.iter().any(|needle| label.contains(needle)))
        .map(|(_, t)| *t)
        .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |a| a.max(t))));

    cpu_max
        .or_else(|| {
            readings
                .iter()
                .map(|(_, t)| *t)
                .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |a| a.max(t))))
        })
        .or_else(read_thermal_zone)
}

#[cfg(windows)]
fn read_thermal_zone() -> Option<f32> {
    use serde::Deserialize;
    use wmi::WMIConnection;

    #[allow(non_camel_case_types)]
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    struct MSAcpi_ThermalZoneTemperature {
        current_temperature: Option<u32>,
    }

    let wmi_con = match WMIConnection::with_namespace_path("ROOT\\WMI") {
        Ok(con) => con,
        Err(e) => {
            log_sensor_unavailable("thermal_zone", &format!("WMI connection failed: {}", e));
            return None;
        }
    };
    let zones: Vec<MSAcpi_ThermalZoneTemperature> = match wmi_con.query() {
        Ok(zones) => zones,
        Err(e) => {
            log_sensor_unavailable("thermal_zone", &format!("WMI query failed: {}", e));
            return None;
        }
    };

    // Tenths of a Kelvin.
    zones
        .iter()
        .filter_map(|z| z.current_temperature)
        .map(|t| t as f32 / 10.0 - 273.15)
        .filter(|t| *t > 0.0 && *t < 150.0)
        .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |a| a.max(t))))
}

#[cfg(not(windows))]
fn read_thermal_zone() -> Option<f32> {
    None
}

/// Highest fan speed reported by hwmon.
#[cfg(target_os = "linux")]
pub fn read_fan_rpm() -> Option<u32> {
    let hwmon = std::fs::read_dir("/sys/class/hwmon").ok()?;
    let mut best: Option<u32> = None;

    for dev in hwmon.flatten() {
        let Ok(entries) = std::fs::read_dir(dev.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.starts_with("fan") && name.ends_with("_input")) {
                continue;
            }
            if let Some(rpm) = std::fs::read_to_string(entry.path())
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|rpm| *rpm > 0)
            {
                best = Some(best.map_or(rpm, |b| b.max(rpm)));
            }
        }
    }
    best
}

#[cfg(not(target_os = "linux"))]
pub fn read_fan_rpm() -> Option<u32> {
    None
}

/// Charge percentage and whether the machine is on external power.
pub fn read_battery() -> Option<(f32, bool)> {
    let manager = match battery::Manager::new() {
        Ok(m) => m,
        Err(e) => {
            log_sensor_unavailable("battery", &e.to_string());
            return None;
        }
    };
    let mut batteries = manager.batteries().ok()?;
    let battery = batteries.next()?.ok()?;

    let percent = battery.state_of_charge().value * 100.0;
    let plugged = matches!(
        battery.state(),
        battery::State::Charging | battery::State::Full
    );
    Some((percent, plugged))
}

/// Cumulative read/write milliseconds per block device.
#[cfg(target_os = "linux")]
pub fn read_disk_io_times() -> Vec<DiskIoTimes> {
    match std::fs::read_to_string("/proc/diskstats") {
        Ok(contents) => parse_diskstats(&contents),
        Err(e) => {
            log_sensor_unavailable("diskstats", &e.to_string());
            Vec::new()
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn read_disk_io_times() -> Vec<DiskIoTimes> {
    Vec::new()
}

/// Parse `/proc/diskstats`, skipping loop and ram devices.
pub fn parse_diskstats(contents: &str) -> Vec<DiskIoTimes> {
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 11 {
                return None;
            }
            let device = fields[2];
            if device.starts_with("loop") || device.starts_with("ram") {
                return None;
            }
            Some(DiskIoTimes {
                device: device.to_string(),
                read_time_ms: fields[6].parse().ok()?,
                write_time_ms: fields[10].parse().ok()?,
            })
        })
        .collect()
}

/// Established TCP connections (IPv4 + IPv6).
#[cfg(target_os = "linux")]
pub fn count_active_connections() -> Option<u32> {
    let mut total = 0;
    let mut any = false;
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            any = true;
            total += count_established(&contents);
        }
    }
    any.then_some(total)
}

#[cfg(not(target_os = "linux"))]
pub fn count_active_connections() -> Option<u32> {
    None
}

/// Count rows in state `01` (ESTABLISHED) of a `/proc/net/tcp` table.
pub fn count_established(contents: &str) -> u32 {
    contents
        .lines()
        .skip(1)
        .filter(|line| line.split_whitespace().nth(3) == Some("01"))
        .count() as u32
}
