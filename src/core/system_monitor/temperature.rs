//! Process-wide temperature cache and synthesized fallbacks.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::metrics::SensorReading;

/// How long an acquired temperature stays valid.
pub const TEMPERATURE_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
struct CachedTemperature {
    celsius: f32,
    acquired_at: Instant,
}

static TEMPERATURE_CACHE: Lazy<Mutex<Option<CachedTemperature>>> = Lazy::new(|| Mutex::new(None));

/// Return the cached temperature if it is younger than `ttl`.
pub fn cached_temperature(ttl: Duration) -> Option<f32> {
    let cache = TEMPERATURE_CACHE.lock();
    cache
        .filter(|c| c.acquired_at.elapsed() < ttl)
        .map(|c| c.celsius)
}

pub fn store_temperature(celsius: f32) {
    *TEMPERATURE_CACHE.lock() = Some(CachedTemperature {
        celsius,
        acquired_at: Instant::now(),
    });
}

/// Drop the cached value. Called on orchestrator teardown.
pub fn clear_temperature_cache() {
    *TEMPERATURE_CACHE.lock() = None;
}

/// Resolve the CPU temperature: cache first, then `acquire`, then a
/// synthesized estimate from CPU load.
pub fn resolve_temperature<F>(cpu_percent: f32, ttl: Duration, acquire: F) -> SensorReading<f32>
where
    F: FnOnce() -> Option<f32>,
{
    if let Some(celsius) = cached_temperature(ttl) {
        return SensorReading::measured(celsius);
    }
    match acquire() {
        Some(celsius) => {
            store_temperature(celsius);
            SensorReading::measured(celsius)
        }
        None => SensorReading::synthesized(synthesize_temperature(cpu_percent)),
    }
}

pub fn synthesize_temperature(cpu_percent: f32) -> f32 {
    35.0 + cpu_percent * 0.5
}

/// Estimate fan speed from temperature bands.
pub fn synthesize_fan_rpm(temp_c: f32) -> u32 {
    let rpm = if temp_c <= 40.0 {
        900.0 + temp_c * 15.0
    } else if temp_c <= 50.0 {
        1200.0 + (temp_c - 40.0) * 40.0
    } else if temp_c <= 60.0 {
        1600.0 + (temp_c - 50.0) * 60.0
    } else if temp_c <= 70.0 {
        2200.0 + (temp_c - 60.0) * 60.0
    } else {
        2800.0 + (temp_c - 70.0) * 60.0
    };
    rpm.max(0.0).round() as u32
}
