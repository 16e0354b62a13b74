use chrono::Duration;

use healthmon::core::config::Config;
use healthmon::core::system_monitor::alerts::TEMP_SUSTAINED;
use healthmon::core::system_monitor::{
    AlertKind, MetricField, MetricSample, Predicate, Rule, Severity, ThresholdEngine,
};

use super::support::{at_secs, hot_sample, sample};

#[test]
fn test_sustained_temperature_alert_fires_after_thirty_minutes() {
    let mut engine = ThresholdEngine::from_config(&Config::default());

    for secs in (0..1800).step_by(60) {
        let alerts = engine.evaluate(&hot_sample(secs, 90.0));
        assert!(alerts.is_empty(), "no alert expected at t={}", secs);
    }

    let alerts = engine.evaluate(&hot_sample(1800, 90.0));
    let temp = alerts
        .iter()
        .find(|a| a.kind == AlertKind::TempSustained)
        .expect("temperature alert at t=1800");
    assert_eq!(temp.timestamp, at_secs(1800));
    assert_eq!(temp.observed_value, 90.0);
    // A sustained temperature breach also flags the cooling system, reporting
    // the temperature behind it.
    let cooling = alerts
        .iter()
        .find(|a| a.kind == AlertKind::Cooling)
        .expect("cooling alert at t=1800");
    assert_eq!(cooling.observed_value, 90.0);

    // Cooling down clears the breach.
    assert!(engine.evaluate(&hot_sample(1860, 60.0)).is_empty());
    assert_eq!(engine.state(TEMP_SUSTAINED).and_then(|s| s.first_seen), None);

    // Reheating starts a new 30 minute window.
    for secs in (1920..1920 + 1800).step_by(60) {
        let alerts = engine.evaluate(&hot_sample(secs, 90.0));
        assert!(
            !alerts.iter().any(|a| a.kind == AlertKind::TempSustained),
            "reheated alert too early at t={}",
            secs
        );
    }
    let alerts = engine.evaluate(&hot_sample(1920 + 1800, 90.0));
    assert!(alerts.iter().any(|a| a.kind == AlertKind::TempSustained));
}

#[test]
fn test_elevated_watch_shortens_temperature_window() {
    let mut config = Config::default();
    config.global.elevated_temperature_watch = true;
    let mut engine = ThresholdEngine::from_config(&config);

    for secs in (0..900).step_by(60) {
        assert!(engine.evaluate(&hot_sample(secs, 90.0)).is_empty());
    }
    let alerts = engine.evaluate(&hot_sample(900, 90.0));
    let temp = alerts
        .iter()
        .find(|a| a.kind == AlertKind::TempSustained)
        .expect("temperature alert after 15 minutes");
    assert!(temp.message.contains("check cooling"));
}

#[test]
fn test_disk_alert_escalates_to_critical() {
    let mut engine = ThresholdEngine::from_config(&Config::default());

    let warn = engine.evaluate(&MetricSample {
        disk_percent: Some(92.0),
        ..sample(0)
    });
    assert_eq!(warn.len(), 1);
    assert_eq!(warn[0].kind, AlertKind::DiskHigh);
    assert_eq!(warn[0].severity, Severity::Warning);

    let mut fresh = ThresholdEngine::from_config(&Config::default());
    let critical = fresh.evaluate(&MetricSample {
        disk_percent: Some(97.0),
        ..sample(0)
    });
    assert_eq!(critical[0].severity, Severity::Critical);
}

#[test]
fn test_snooze_suppresses_emission_but_keeps_state() {
    let mut engine = ThresholdEngine::from_config(&Config::default());
    engine.set_delay_until(Some(at_secs(600)));

    let full = MetricSample {
        disk_percent: Some(92.0),
        ..sample(0)
    };
    assert!(engine.evaluate(&full).is_empty());
    assert!(engine.state("disk_high").is_some_and(|s| s.sustained));

    let later = MetricSample {
        disk_percent: Some(92.0),
        ..sample(600)
    };
    assert_eq!(engine.evaluate(&later).len(), 1);
}

#[test]
fn test_registered_rule_joins_evaluation() {
    let mut engine = ThresholdEngine::empty();
    engine.register(
        Rule::new(
            "battery_low",
            AlertKind::Custom("battery_low".to_string()),
            Predicate::below(MetricField::BatteryPercent, 15.0),
            Duration::zero(),
        )
        .severity(Severity::Critical),
    );

    let drained = MetricSample {
        battery_percent: Some(9.0),
        ..sample(0)
    };
    let alerts = engine.evaluate(&drained);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].observed_value, 9.0);

    // Absent battery reading never matches.
    assert!(engine.evaluate(&sample(1)).is_empty());
}
