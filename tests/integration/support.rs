//! Fakes and builders shared by the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use healthmon::core::cleaner::CleanupStats;
use healthmon::core::repair::{CleanupTarget, RepairDispatcher, RepairPolicy, SafeList, SystemActions};
use healthmon::core::scheduler::TaskCategory;
use healthmon::core::system_monitor::{MetricSample, ProcessInfo, SensorReading};
use healthmon::platform::{CommandOutcome, CommandStatus};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn at_secs(secs: i64) -> DateTime<Utc> {
    epoch() + Duration::seconds(secs)
}

pub fn sample(secs: i64) -> MetricSample {
    MetricSample {
        cpu_percent: 20.0,
        ram_percent: 40.0,
        ram_used_bytes: 4 << 30,
        ram_total_bytes: 10 << 30,
        disk_percent: Some(50.0),
        ..MetricSample::at(at_secs(secs))
    }
}

pub fn hot_sample(secs: i64, temp: f32) -> MetricSample {
    MetricSample {
        cpu_temp_c: Some(SensorReading::measured(temp)),
        ..sample(secs)
    }
}

/// Records every side effect instead of touching the host.
#[derive(Default)]
pub struct FakeActions {
    pub processes: Vec<ProcessInfo>,
    pub terminated: Mutex<Vec<u32>>,
    pub cleaned: AtomicUsize,
    pub maintenance_fails: bool,
    /// How long each cleanup takes unless cancelled first.
    pub clean_delay: std::time::Duration,
}

impl FakeActions {
    pub fn with_processes(processes: Vec<ProcessInfo>) -> Self {
        Self {
            processes,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SystemActions for FakeActions {
    async fn processes(&self) -> Vec<ProcessInfo> {
        self.processes.clone()
    }

    async fn process_name(&self, pid: u32) -> Option<String> {
        self.processes.iter().find(|p| p.pid == pid).map(|p| p.name.clone())
    }

    async fn terminate(&self, pid: u32, _expected_name: &str) -> bool {
        self.terminated.lock().push(pid);
        true
    }

    async fn drop_caches(&self) -> CommandOutcome {
        CommandOutcome::succeeded("sync")
    }

    async fn clean(&self, _target: CleanupTarget, cancel: &CancellationToken) -> CleanupStats {
        tokio::select! {
            _ = tokio::time::sleep(self.clean_delay) => {}
            _ = cancel.cancelled() => {
                return CleanupStats {
                    was_cancelled: true,
                    ..Default::default()
                };
            }
        }
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        CleanupStats {
            total_files: 2,
            total_size: 8192,
            deleted_files: 2,
            deleted_size: 8192,
            ..Default::default()
        }
    }

    async fn reap_zombie(&self, _zombie: &ProcessInfo) -> bool {
        true
    }

    async fn reset_network(&self) -> Vec<CommandOutcome> {
        vec![CommandOutcome::succeeded("ip")]
    }

    async fn maintenance(&self, category: TaskCategory) -> CommandOutcome {
        if self.maintenance_fails {
            return CommandOutcome::with_status(category.as_str(), CommandStatus::Failed(Some(1)));
        }
        CommandOutcome::succeeded(category.as_str())
    }
}

pub fn dispatcher(actions: Arc<FakeActions>, auto_fix_enabled: bool) -> RepairDispatcher {
    RepairDispatcher::new(
        actions,
        SafeList::for_current_platform(),
        RepairPolicy {
            auto_fix_enabled,
            ..Default::default()
        },
    )
}
