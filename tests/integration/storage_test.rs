use std::sync::Arc;

use chrono::Duration;
use tempfile::TempDir;

use healthmon::core::repair::{RepairFailure, RepairRecord, RepairSubject};
use healthmon::core::scheduler::TaskCategory;
use healthmon::core::storage::{JsonFileBackend, SqliteBackend, StateBackend, StorageOp, WriteBehindQueue};
use healthmon::core::system_monitor::{MetricSample, SensorReading};

use super::support::{at_secs, sample};

fn rich_sample(secs: i64) -> MetricSample {
    MetricSample {
        cpu_temp_c: Some(SensorReading::synthesized(58.5)),
        fan_rpm: Some(SensorReading::measured(1450)),
        uptime_seconds: Some(7200),
        process_count: Some(212),
        battery_percent: Some(64.0),
        battery_plugged: Some(false),
        ..sample(secs)
    }
}

fn both_backends(dir: &TempDir) -> Vec<(&'static str, Arc<dyn StateBackend>)> {
    vec![
        (
            "sqlite",
            Arc::new(SqliteBackend::open(&dir.path().join("healthmon.db")).unwrap()),
        ),
        (
            "json",
            Arc::new(JsonFileBackend::open(&dir.path().join("state.json")).unwrap()),
        ),
    ]
}

#[test]
fn test_samples_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = SqliteBackend::open(&dir.path().join("healthmon.db")).unwrap();
        db.append_sample(&sample(0)).unwrap();
        db.append_sample(&rich_sample(60)).unwrap();
    }

    let db = SqliteBackend::open(&dir.path().join("healthmon.db")).unwrap();
    let loaded = db.load_samples(10).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[1], rich_sample(60));
    assert_eq!(loaded[0].cpu_temp_c, None);
}

#[test]
fn test_backends_agree_on_history_and_trim() {
    let dir = TempDir::new().unwrap();
    for (name, backend) in both_backends(&dir) {
        for secs in 0..10 {
            backend.append_sample(&sample(secs * 60)).unwrap();
        }
        let removed = backend.trim_samples(at_secs(300), 7).unwrap();
        assert_eq!(removed, 3, "{} trimmed the wrong count", name);

        let kept = backend.load_samples(100).unwrap();
        assert_eq!(kept.len(), 7, "{}", name);
        assert_eq!(kept[0].timestamp, at_secs(180), "{}", name);
        assert_eq!(kept.last().unwrap().timestamp, at_secs(540), "{}", name);
    }
}

#[test]
fn test_backends_store_repairs_and_settings() {
    let dir = TempDir::new().unwrap();
    for (name, backend) in both_backends(&dir) {
        let ok = RepairRecord {
            bytes_freed: 1 << 20,
            ..RepairRecord::succeeded(
                RepairSubject::Maintenance {
                    category: TaskCategory::Cleanup,
                },
                "clean_temp",
                "Removed 12 files".to_string(),
            )
        };
        let refused = RepairRecord::failed(
            RepairSubject::Maintenance {
                category: TaskCategory::Updates,
            },
            "maintenance",
            RepairFailure::Timeout,
            "Timed out".to_string(),
        );
        backend.append_repair(&ok).unwrap();
        backend.append_repair(&refused).unwrap();

        let loaded = backend.load_repairs(10).unwrap();
        assert_eq!(loaded.len(), 2, "{}", name);
        assert!(loaded.iter().any(|r| r.success && r.bytes_freed == 1 << 20), "{}", name);
        assert!(
            loaded.iter().any(|r| r.failure == Some(RepairFailure::Timeout)),
            "{}",
            name
        );

        backend.set_setting("thresholds.cpu_warning", "75.0").unwrap();
        backend.set_setting("thresholds.cpu_warning", "70.0").unwrap();
        assert_eq!(
            backend.get_setting("thresholds.cpu_warning").unwrap().as_deref(),
            Some("70.0"),
            "{}",
            name
        );
        assert_eq!(backend.get_setting("missing").unwrap(), None, "{}", name);
    }
}

#[test]
fn test_corrupt_json_state_is_moved_aside() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let backend = JsonFileBackend::open(&path).unwrap();
    assert!(backend.load_samples(10).unwrap().is_empty());
    assert!(dir.path().join("state.json.corrupt").exists());

    backend.append_sample(&sample(0)).unwrap();
    let reopened = JsonFileBackend::open(&path).unwrap();
    assert_eq!(reopened.load_samples(10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_queue_writes_through_healthy_backend() {
    let backend: Arc<dyn StateBackend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
    let queue = WriteBehindQueue::new(backend.clone()).backoff(std::time::Duration::ZERO);

    assert!(queue.write(StorageOp::AppendSample(sample(0))).await);
    assert!(
        queue
            .write(StorageOp::AppendSample(MetricSample::at(at_secs(0) + Duration::seconds(5))))
            .await
    );
    assert!(!queue.is_degraded());
    assert_eq!(backend.load_samples(10).unwrap().len(), 2);
}
