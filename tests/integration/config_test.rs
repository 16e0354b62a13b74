use chrono::Weekday;
use tempfile::TempDir;

use healthmon::core::config::{Config, Frequency};
use healthmon::error::{HealthError, EXIT_CONFIG};

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.thresholds.cpu_warning, 80.0);
    assert_eq!(config.scheduler.cleanup_time, "02:00");
    assert!(!config.global.auto_fix_enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("healthmon").join("config.json");

    let mut config = Config::default();
    config.set("thresholds.disk_warning", "85").unwrap();
    config.set("scheduler.defrag_day", "wednesday").unwrap();
    config.set("scheduler.backup_frequency", "monthly").unwrap();
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.scheduler.defrag_day, Weekday::Wed);
    assert_eq!(loaded.scheduler.backup_frequency, Frequency::Monthly);
}

#[test]
fn test_config_load_missing_returns_default() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::load_from(&temp_dir.path().join("absent.json")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_load_invalid_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, r#"{"thresholds":{"cpu_warning":250}}"#).unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, HealthError::Config(_)));
    assert_eq!(err.exit_code(), EXIT_CONFIG);
    assert!(err.to_string().contains("cpu_warning"));
}

#[test]
fn test_rejected_update_keeps_previous_values() {
    let mut config = Config::default();
    let err = config.set("thresholds.cpu_warning", "0").unwrap_err();
    assert!(matches!(err, HealthError::Config(_)));
    assert_eq!(err.exit_code(), EXIT_CONFIG);
    assert_eq!(config.thresholds.cpu_warning, 80.0);

    assert!(config.set("scheduler.cleanup_time", "25:61").is_err());
    assert!(config.set("nonsense", "1").is_err());
    assert!(config.set("thresholds.unknown", "1").is_err());
    assert_eq!(config, Config::default());
}

#[test]
fn test_settings_entries_rebuild_config() {
    let mut config = Config::default();
    config.set("monitor.probe_interval_secs", "5").unwrap();
    config.set("global.elevated_temperature_watch", "true").unwrap();

    let entries = config.settings_entries().unwrap();
    assert!(entries.iter().any(|(k, v)| k == "monitor.probe_interval_secs" && v == "5"));

    let rebuilt = Config::from_settings_entries(&entries).unwrap();
    assert_eq!(rebuilt, config);
}
