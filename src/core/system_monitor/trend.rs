//! Health index and window-over-window predictions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::MetricSample;

/// Floor of the health index; a running machine never scores below this.
pub const MIN_HEALTH_INDEX: u8 = 15;

/// Three days of samples at the default 30 s rule cadence.
pub const DEFAULT_TREND_WINDOW: usize = 3 * 24 * 120;

/// Minimum window for the older/recent comparison.
pub const MIN_TREND_SAMPLES: usize = 5;
const OLDER_HEAD: usize = 2;
const RECENT_TAIL: usize = 3;

const CPU_RISING_DELTA: f64 = 10.0;
const RAM_FILLING_DELTA: f64 = 15.0;
const ELEVATED_MEAN_TEMP: f64 = 60.0;
const STABLE_SCORE: u8 = 80;

/// Per-resource penalties that make up a health index.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthBreakdown {
    pub cpu_penalty: f64,
    pub ram_penalty: f64,
    pub disk_penalty: f64,
    pub temp_penalty: f64,
    pub score: u8,
}

impl HealthBreakdown {
    pub fn total_penalty(&self) -> f64 {
        self.cpu_penalty + self.ram_penalty + self.disk_penalty + self.temp_penalty
    }
}

pub fn cpu_penalty(cpu: f64) -> f64 {
    if cpu < 20.0 {
        0.0
    } else if cpu < 50.0 {
        (cpu - 20.0) * 0.1
    } else if cpu < 80.0 {
        3.0 + (cpu - 50.0) * 0.2
    } else {
        9.0 + (cpu - 80.0) * 0.4
    }
}

pub fn ram_penalty(ram: f64) -> f64 {
    if ram < 50.0 {
        0.0
    } else if ram < 75.0 {
        (ram - 50.0) * 0.08
    } else if ram < 90.0 {
        2.0 + (ram - 75.0) * 0.3
    } else {
        6.5 + (ram - 90.0) * 0.5
    }
}

pub fn disk_penalty(disk: f64) -> f64 {
    if disk < 60.0 {
        0.0
    } else if disk < 85.0 {
        (disk - 60.0) * 0.05
    } else {
        1.25 + (disk - 85.0) * 0.2
    }
}

pub fn temp_penalty(temp: f64) -> f64 {
    if temp > 85.0 {
        15.0
    } else if temp > 75.0 {
        8.0
    } else if temp > 65.0 {
        3.0
    } else {
        0.0
    }
}

/// Health index of a single sample with its penalty breakdown.
///
/// Absent disk or temperature readings contribute no penalty.
pub fn health_breakdown(sample: &MetricSample) -> HealthBreakdown {
    let mut breakdown = HealthBreakdown {
        cpu_penalty: cpu_penalty(sample.cpu_percent as f64),
        ram_penalty: ram_penalty(sample.ram_percent as f64),
        disk_penalty: sample.disk_percent.map_or(0.0, |d| disk_penalty(d as f64)),
        temp_penalty: sample.temperature().map_or(0.0, |t| temp_penalty(t as f64)),
        score: 0,
    };
    let raw = 100.0 - breakdown.total_penalty();
    breakdown.score = raw.clamp(MIN_HEALTH_INDEX as f64, 100.0).floor() as u8;
    breakdown
}

pub fn health_index(sample: &MetricSample) -> u8 {
    health_breakdown(sample).score
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    CpuRising,
    MemoryFilling,
    ElevatedTemperature,
    SystemOverload,
    DiskExhaustion,
    MemoryExhaustion,
    RestartRecommended,
    Stable,
    Monitor,
}

impl PredictionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionKind::CpuRising => "cpu_rising",
            PredictionKind::MemoryFilling => "memory_filling",
            PredictionKind::ElevatedTemperature => "elevated_temperature",
            PredictionKind::SystemOverload => "system_overload",
            PredictionKind::DiskExhaustion => "disk_exhaustion",
            PredictionKind::MemoryExhaustion => "memory_exhaustion",
            PredictionKind::RestartRecommended => "restart_recommended",
            PredictionKind::Stable => "stable",
            PredictionKind::Monitor => "monitor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub kind: PredictionKind,
    /// In `[0, 1]`.
    pub probability: f64,
    pub estimated_horizon: Option<Duration>,
    pub rationale: String,
}

impl Prediction {
    fn new(kind: PredictionKind, probability: f64, horizon: Option<Duration>, rationale: String) -> Self {
        Self {
            kind,
            probability: probability.clamp(0.0, 1.0),
            estimated_horizon: horizon,
            rationale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendDeltas {
    pub cpu: f64,
    pub ram: f64,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub generated_at: DateTime<Utc>,
    pub sample_count: usize,
    pub health_index: u8,
    pub breakdown: HealthBreakdown,
    /// `None` when the window is too short to compare.
    pub deltas: Option<TrendDeltas>,
    pub mean_temperature: Option<f64>,
    pub predictions: Vec<Prediction>,
}

impl TrendReport {
    pub fn has(&self, kind: PredictionKind) -> bool {
        self.predictions.iter().any(|p| p.kind == kind)
    }
}

#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    window: usize,
}

impl TrendAnalyzer {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(MIN_TREND_SAMPLES),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Analyze `samples` (oldest first). Only the trailing `window` samples
    /// are used. Returns `None` for an empty history.
    pub fn analyze(&self, samples: &[Arc<MetricSample>]) -> Option<TrendReport> {
        let start = samples.len().saturating_sub(self.window);
        let window = &samples[start..];
        let latest = window.last()?;

        let breakdown = health_breakdown(latest);
        let deltas = window_deltas(window);
        let mean_temperature = mean(window.iter().filter_map(|s| s.temperature().map(f64::from)));

        let mut predictions = Vec::new();

        if let Some(d) = &deltas {
            if d.cpu > CPU_RISING_DELTA {
                predictions.push(Prediction::new(
                    PredictionKind::CpuRising,
                    0.5 + d.cpu / 100.0,
                    Some(Duration::from_secs(2 * 3600)),
                    format!(
                        "CPU rising by {:.1} points, problems expected in 2-3 hours",
                        d.cpu
                    ),
                ));
            }
            if d.ram > RAM_FILLING_DELTA {
                predictions.push(Prediction::new(
                    PredictionKind::MemoryFilling,
                    0.5 + d.ram / 100.0,
                    Some(Duration::from_secs(24 * 3600)),
                    format!(
                        "Memory filling by {:.1} points, restart recommended within a day",
                        d.ram
                    ),
                ));
            }
        }

        if let Some(temp) = mean_temperature.filter(|t| *t > ELEVATED_MEAN_TEMP) {
            predictions.push(Prediction::new(
                PredictionKind::ElevatedTemperature,
                ((temp - ELEVATED_MEAN_TEMP) / 40.0 + 0.5).min(0.95),
                None,
                format!("Elevated temperature (mean {:.1}°C), check cooling", temp),
            ));
        }

        predictions.extend(current_state_predictions(latest));

        if predictions.is_empty() {
            predictions.push(if breakdown.score > STABLE_SCORE {
                Prediction::new(
                    PredictionKind::Stable,
                    breakdown.score as f64 / 100.0,
                    None,
                    format!("System stable, health index {}", breakdown.score),
                )
            } else {
                Prediction::new(
                    PredictionKind::Monitor,
                    0.5,
                    None,
                    format!("Health index {}, keep monitoring", breakdown.score),
                )
            });
        }

        Some(TrendReport {
            generated_at: latest.timestamp,
            sample_count: window.len(),
            health_index: breakdown.score,
            breakdown,
            deltas,
            mean_temperature,
            predictions,
        })
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_TREND_WINDOW)
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Mean of the recent tail minus mean of the older head.
fn window_deltas(window: &[Arc<MetricSample>]) -> Option<TrendDeltas> {
    if window.len() < MIN_TREND_SAMPLES {
        return None;
    }
    let older = &window[..OLDER_HEAD];
    let recent = &window[window.len() - RECENT_TAIL..];

    let delta = |f: &dyn Fn(&MetricSample) -> Option<f64>| -> Option<f64> {
        let recent = mean(recent.iter().filter_map(|s| f(s.as_ref())))?;
        let older = mean(older.iter().filter_map(|s| f(s.as_ref())))?;
        Some(recent - older)
    };

    Some(TrendDeltas {
        cpu: delta(&|s: &MetricSample| Some(s.cpu_percent as f64)).unwrap_or(0.0),
        ram: delta(&|s: &MetricSample| Some(s.ram_percent as f64)).unwrap_or(0.0),
        temperature: delta(&|s: &MetricSample| s.temperature().map(f64::from)),
    })
}

fn current_state_predictions(latest: &MetricSample) -> Vec<Prediction> {
    let mut out = Vec::new();
    let cpu = latest.cpu_percent;
    let ram = latest.ram_percent;

    if cpu > 70.0 && ram > 70.0 {
        out.push(Prediction::new(
            PredictionKind::SystemOverload,
            0.8,
            Some(Duration::from_secs(3600)),
            format!("CPU {:.0}% and memory {:.0}% both high, overload likely", cpu, ram),
        ));
    }
    if let Some(disk) = latest.disk_percent.filter(|d| *d > 95.0) {
        out.push(Prediction::new(
            PredictionKind::DiskExhaustion,
            0.9,
            Some(Duration::from_secs(24 * 3600)),
            format!("Disk at {:.1}%, space will run out", disk),
        ));
    }
    if ram > 90.0 {
        out.push(Prediction::new(
            PredictionKind::MemoryExhaustion,
            0.85,
            Some(Duration::from_secs(3600)),
            format!("Memory at {:.1}%, applications may be killed or swap heavily", ram),
        ));
    }
    if let Some(uptime) = latest.uptime_seconds.filter(|u| *u > 48 * 3600) {
        out.push(Prediction::new(
            PredictionKind::RestartRecommended,
            0.6,
            None,
            format!("Up for {} hours, a restart is recommended", uptime / 3600),
        ));
    }
    out
}
