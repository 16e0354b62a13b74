use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HealthError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu_warning: f32,
    pub ram_warning: f32,
    pub disk_warning: f32,
    pub uptime_warning_hours: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 80.0,
            ram_warning: 85.0,
            disk_warning: 90.0,
            uptime_warning_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub auto_cleanup: bool,
    pub auto_defrag: bool,
    pub auto_updates: bool,
    pub auto_backup: bool,
    /// Local time of the daily cleanup, `HH:MM`.
    pub cleanup_time: String,
    pub defrag_day: Weekday,
    pub update_frequency: Frequency,
    pub backup_frequency: Frequency,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            auto_cleanup: true,
            auto_defrag: true,
            auto_updates: true,
            auto_backup: false,
            cleanup_time: "02:00".to_string(),
            defrag_day: Weekday::Sun,
            update_frequency: Frequency::Weekly,
            backup_frequency: Frequency::Weekly,
        }
    }
}

impl SchedulerSettings {
    pub fn cleanup_time(&self) -> Result<NaiveTime> {
        parse_time(&self.cleanup_time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub auto_fix_enabled: bool,
    pub snooze_until: Option<DateTime<Utc>>,
    /// Shorten the temperature rule to 15 minutes and advise checking cooling.
    pub elevated_temperature_watch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub probe_interval_secs: u64,
    pub rule_interval_secs: u64,
    pub scheduler_tick_secs: u64,
    pub diagnose_interval_secs: u64,
    /// Apply fixes for auto-fixable issues found by periodic diagnosis.
    pub auto_repair: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: 10,
            rule_interval_secs: 30,
            scheduler_tick_secs: 60,
            diagnose_interval_secs: 300,
            auto_repair: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub scheduler: SchedulerSettings,
    pub global: GlobalSettings,
    pub monitor: MonitorSettings,
}

impl Config {
    /// Load from the default location. A missing or empty file yields the
    /// defaults; a file that does not parse or validate is a config error.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Like `load`, but an invalid file is reported and replaced by the
    /// defaults in memory. The file itself is left alone.
    pub fn load_or_default() -> Result<Self> {
        match Self::load() {
            Err(HealthError::Config(msg)) => {
                log::warn!("{}; continuing with defaults", msg);
                Ok(Config::default())
            }
            other => other,
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = fs::read(path)?;
        if data.is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_json::from_slice(&data).map_err(|e| {
            HealthError::config(format!("Invalid config at {}: {}", path.display(), e))
        })?;
        config.validate().map_err(|e| match e {
            HealthError::Config(msg) => {
                HealthError::config(format!("Invalid config at {}: {}", path.display(), msg))
            }
            other => other,
        })?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    /// Write through a temporary sibling so readers never see a partial file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| HealthError::config("Could not determine config directory"))?;
        Ok(config_dir.join("healthmon").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, value) in [
            ("cpu_warning", t.cpu_warning),
            ("ram_warning", t.ram_warning),
            ("disk_warning", t.disk_warning),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(HealthError::config(format!(
                    "thresholds.{} must be in (0, 100], got {}",
                    name, value
                )));
            }
        }
        if t.uptime_warning_hours == 0 {
            return Err(HealthError::config(
                "thresholds.uptime_warning_hours must be positive",
            ));
        }

        self.scheduler.cleanup_time()?;

        let m = &self.monitor;
        for (name, value) in [
            ("probe_interval_secs", m.probe_interval_secs),
            ("rule_interval_secs", m.rule_interval_secs),
            ("scheduler_tick_secs", m.scheduler_tick_secs),
            ("diagnose_interval_secs", m.diagnose_interval_secs),
        ] {
            if value == 0 {
                return Err(HealthError::config(format!(
                    "monitor.{} must be positive",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Replace this config with `new` if it validates; otherwise keep the
    /// current values and return the validation error.
    pub fn apply_update(&mut self, new: Config) -> Result<()> {
        new.validate()?;
        *self = new;
        Ok(())
    }

    /// Set a dotted key such as `thresholds.cpu_warning`. The value is parsed
    /// as JSON when possible, otherwise taken as a string.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, field) = key
            .split_once('.')
            .ok_or_else(|| HealthError::config(format!("Key must be section.field: {}", key)))?;

        let mut doc = serde_json::to_value(&*self)?;
        let slot = doc
            .get_mut(section)
            .and_then(|s| s.get_mut(field))
            .ok_or_else(|| HealthError::config(format!("Unknown config key: {}", key)))?;

        *slot = match serde_json::from_str::<Value>(value) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(value.to_string()),
        };
        // Weekday parses from strings; accept lowercase names too.
        if field == "defrag_day" {
            if let Some(name) = slot.as_str().map(str::to_string) {
                let day: Weekday = name
                    .parse()
                    .map_err(|_| HealthError::config(format!("Invalid weekday: {}", name)))?;
                *slot = serde_json::to_value(day)?;
            }
        }

        let updated: Config = serde_json::from_value(doc)
            .map_err(|e| HealthError::config(format!("Invalid value for {}: {}", key, e)))?;
        self.apply_update(updated)
    }

    /// Flatten into `section.field` → JSON pairs for the settings table.
    pub fn settings_entries(&self) -> Result<Vec<(String, String)>> {
        let doc = serde_json::to_value(self)?;
        let mut entries = Vec::new();
        if let Value::Object(sections) = doc {
            for (section, fields) in sections {
                if let Value::Object(fields) = fields {
                    for (field, value) in fields {
                        entries.push((format!("{}.{}", section, field), value.to_string()));
                    }
                }
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Rebuild from settings-table entries on top of the defaults; unknown
    /// keys are ignored.
    pub fn from_settings_entries(entries: &[(String, String)]) -> Result<Self> {
        let mut config = Config::default();
        for (key, value) in entries {
            if let Err(e) = config.set(key, value) {
                log::warn!("Skipping stored setting {}: {}", key, e);
            }
        }
        Ok(config)
    }
}

pub fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| HealthError::config(format!("Invalid time '{}', expected HH:MM", s)))
}
