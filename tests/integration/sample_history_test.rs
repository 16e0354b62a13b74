use chrono::Duration;

use healthmon::core::system_monitor::{RetentionPolicy, SampleStore};
use healthmon::HealthError;

use super::support::{at_secs, sample};

#[test]
fn test_retention_keeps_minimum_after_a_month() {
    let store = SampleStore::new();
    for secs in 0..60 {
        store.append(sample(secs)).unwrap();
    }

    let month_later = 31 * 24 * 3600;
    store.append(sample(month_later)).unwrap();

    let kept = store.last_n(100);
    assert_eq!(kept.len(), 50);
    assert_eq!(kept.last().unwrap().timestamp, at_secs(month_later));
}

#[test]
fn test_out_of_order_sample_is_rejected() {
    let store = SampleStore::new();
    store.append(sample(10)).unwrap();

    let err = store.append(sample(5)).unwrap_err();
    assert!(matches!(err, HealthError::OutOfOrderSample { .. }));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_range_is_inclusive_and_ordered() {
    let store = SampleStore::with_retention(RetentionPolicy {
        max_age: Duration::days(1),
        min_samples: 5,
    });
    for secs in 0..10 {
        store.append(sample(secs * 10)).unwrap();
    }
    let window = store.range(at_secs(20), at_secs(50));
    let secs: Vec<i64> = window
        .iter()
        .map(|s| (s.timestamp - at_secs(0)).num_seconds())
        .collect();
    assert_eq!(secs, vec![20, 30, 40, 50]);
}

#[test]
fn test_snapshots_are_unaffected_by_later_appends() {
    let store = SampleStore::new();
    store.append(sample(0)).unwrap();
    let snapshot = store.last_n(10);
    store.append(sample(1)).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(store.len(), 2);
}
