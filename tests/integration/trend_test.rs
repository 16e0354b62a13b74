use std::sync::Arc;

use healthmon::core::system_monitor::{
    health_breakdown, health_index, MetricSample, PredictionKind, SensorReading, TrendAnalyzer,
};

use super::support::sample;

fn cpu_series(values: &[f32]) -> Vec<Arc<MetricSample>> {
    values
        .iter()
        .enumerate()
        .map(|(i, cpu)| {
            Arc::new(MetricSample {
                cpu_percent: *cpu,
                ..sample(i as i64 * 60)
            })
        })
        .collect()
}

#[test]
fn test_health_index_penalties() {
    let s = MetricSample {
        cpu_percent: 50.0,
        ram_percent: 75.0,
        disk_percent: Some(60.0),
        cpu_temp_c: Some(SensorReading::measured(66.0)),
        ..sample(0)
    };
    let b = health_breakdown(&s);
    assert_eq!(b.cpu_penalty, 3.0);
    assert_eq!(b.ram_penalty, 2.0);
    assert_eq!(b.disk_penalty, 0.0);
    assert_eq!(b.temp_penalty, 3.0);
    assert_eq!(health_index(&s), 92);
}

#[test]
fn test_health_index_is_clamped() {
    let s = MetricSample {
        cpu_percent: 100.0,
        ram_percent: 100.0,
        disk_percent: Some(100.0),
        cpu_temp_c: Some(SensorReading::measured(105.0)),
        ..sample(0)
    };
    assert!(health_index(&s) >= 15);
}

#[test]
fn test_cpu_rising_prediction() {
    let report = TrendAnalyzer::default()
        .analyze(&cpu_series(&[30.0, 32.0, 55.0, 60.0, 58.0]))
        .unwrap();

    let deltas = report.deltas.as_ref().unwrap();
    assert!((deltas.cpu - 26.67).abs() < 0.01);
    assert!(report.has(PredictionKind::CpuRising));
    let rising = report
        .predictions
        .iter()
        .find(|p| p.kind == PredictionKind::CpuRising)
        .unwrap();
    assert!(rising.probability > 0.5 && rising.probability <= 1.0);
}

#[test]
fn test_short_history_has_no_deltas() {
    let report = TrendAnalyzer::default()
        .analyze(&cpu_series(&[30.0, 90.0, 95.0]))
        .unwrap();
    assert!(report.deltas.is_none());
    assert!(!report.has(PredictionKind::CpuRising));
}

#[test]
fn test_empty_history_yields_no_report() {
    assert!(TrendAnalyzer::default().analyze(&[]).is_none());
}

#[test]
fn test_quiet_machine_is_stable() {
    let report = TrendAnalyzer::default()
        .analyze(&cpu_series(&[10.0, 11.0, 10.0, 12.0, 11.0]))
        .unwrap();
    assert!(report.has(PredictionKind::Stable));
}
