//! The seam between the dispatcher and the operating system.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::safe_list::normalize_process_name;
use crate::core::cleaner::{CleanupStats, TempCleaner};
use crate::core::scheduler::TaskCategory;
use crate::core::system_monitor::{Probe, ProcessInfo, SensorProbe};
use crate::platform::{self, process, CommandOutcome, DEFAULT_COMMAND_DEADLINE, NETWORK_RESET_DEADLINE};

/// Which cleaner a cleanup step targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTarget {
    TempFiles,
    BrowserCaches,
    StaleLogs,
}

/// OS operations used by repairs. Implementations must not hold locks
/// across subprocess calls.
#[async_trait]
pub trait SystemActions: Send + Sync {
    /// Current process inventory.
    async fn processes(&self) -> Vec<ProcessInfo>;

    /// Name of the process holding `pid` right now, if any.
    async fn process_name(&self, pid: u32) -> Option<String>;

    /// Ask a process to exit, but only while `pid` still belongs to
    /// `expected_name`. Returns true if the request was delivered.
    async fn terminate(&self, pid: u32, expected_name: &str) -> bool;

    /// Flush file system caches (Unix) or the DNS cache (Windows).
    async fn drop_caches(&self) -> CommandOutcome;

    /// Delete files for `target`, stopping early when `cancel` fires.
    async fn clean(&self, target: CleanupTarget, cancel: &CancellationToken) -> CleanupStats;

    /// Get a zombie's parent to reap it. Returns true if the zombie is gone.
    async fn reap_zombie(&self, zombie: &ProcessInfo) -> bool;

    /// Reset the network stack. One outcome per step, stopping at the first failure.
    async fn reset_network(&self) -> Vec<CommandOutcome>;

    /// Run the command bound to a maintenance category.
    async fn maintenance(&self, category: TaskCategory) -> CommandOutcome;
}

/// `SystemActions` backed by the real host.
pub struct HostActions {
    probe: Arc<Mutex<SensorProbe>>,
}

impl HostActions {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(Mutex::new(SensorProbe::new())),
        }
    }
}

impl Default for HostActions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemActions for HostActions {
    async fn processes(&self) -> Vec<ProcessInfo> {
        let probe = Arc::clone(&self.probe);
        tokio::task::spawn_blocking(move || probe.lock().processes())
            .await
            .unwrap_or_else(|e| {
                log::error!("Process inventory task failed: {}", e);
                Vec::new()
            })
    }

    async fn process_name(&self, pid: u32) -> Option<String> {
        tokio::task::spawn_blocking(move || process::process_name(pid))
            .await
            .unwrap_or(None)
    }

    async fn terminate(&self, pid: u32, expected_name: &str) -> bool {
        let expected = normalize_process_name(expected_name);
        tokio::task::spawn_blocking(move || {
            process::terminate_process(pid, |current| normalize_process_name(current) == expected)
        })
        .await
        .unwrap_or(false)
    }

    async fn drop_caches(&self) -> CommandOutcome {
        #[cfg(windows)]
        {
            platform::run_with_deadline("ipconfig", &["/flushdns"], DEFAULT_COMMAND_DEADLINE).await
        }
        #[cfg(target_os = "macos")]
        {
            if let Err(outcome) = platform::require_elevated("purge") {
                return outcome;
            }
            platform::run_with_deadline("purge", &[], DEFAULT_COMMAND_DEADLINE).await
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            if let Err(outcome) = platform::require_elevated("drop_caches") {
                return outcome;
            }
            platform::run_with_deadline(
                "sh",
                &["-c", "sync && echo 3 > /proc/sys/vm/drop_caches"],
                DEFAULT_COMMAND_DEADLINE,
            )
            .await
        }
    }

    async fn clean(&self, target: CleanupTarget, cancel: &CancellationToken) -> CleanupStats {
        if cancel.is_cancelled() {
            return CleanupStats {
                was_cancelled: true,
                ..Default::default()
            };
        }

        let flag = Arc::new(AtomicBool::new(false));
        let watcher = {
            let flag = Arc::clone(&flag);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                flag.store(true, Ordering::SeqCst);
            })
        };

        let worker_flag = Arc::clone(&flag);
        let stats = tokio::task::spawn_blocking(move || {
            let cleaner = match target {
                CleanupTarget::TempFiles => TempCleaner::new(),
                CleanupTarget::BrowserCaches => TempCleaner::browser_caches(),
                CleanupTarget::StaleLogs => TempCleaner::stale_logs(),
            };
            cleaner.cancel_flag(worker_flag).clean(false)
        })
        .await
        .unwrap_or_else(|e| {
            log::error!("Cleanup task failed: {}", e);
            CleanupStats::default()
        });

        watcher.abort();
        stats
    }

    async fn reap_zombie(&self, zombie: &ProcessInfo) -> bool {
        let Some(parent) = zombie.parent_pid else {
            return false;
        };
        let pid = zombie.pid;
        if !tokio::task::spawn_blocking(move || process::signal_parent_to_reap(parent))
            .await
            .unwrap_or(false)
        {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        !tokio::task::spawn_blocking(move || process::is_zombie(pid))
            .await
            .unwrap_or(true)
    }

    async fn reset_network(&self) -> Vec<CommandOutcome> {
        #[cfg(windows)]
        let steps: &[(&str, &[&str])] = &[
            ("ipconfig", &["/flushdns"]),
            ("netsh", &["winsock", "reset"]),
            ("netsh", &["int", "ip", "reset"]),
        ];
        #[cfg(target_os = "macos")]
        let steps: &[(&str, &[&str])] = &[
            ("dscacheutil", &["-flushcache"]),
            ("killall", &["-HUP", "mDNSResponder"]),
        ];
        #[cfg(all(unix, not(target_os = "macos")))]
        let steps: &[(&str, &[&str])] = &[
            ("resolvectl", &["flush-caches"]),
            ("systemctl", &["restart", "NetworkManager"]),
        ];

        if let Err(outcome) = platform::require_elevated("network reset") {
            return vec![outcome];
        }
        platform::run_sequence(steps, NETWORK_RESET_DEADLINE).await
    }

    async fn maintenance(&self, category: TaskCategory) -> CommandOutcome {
        let (program, args): (&str, &[&str]) = match maintenance_command(category) {
            Some(cmd) => cmd,
            None => {
                return CommandOutcome::unsupported(
                    category.as_str(),
                    "no command on this platform",
                )
            }
        };
        platform::run_with_deadline(program, args, DEFAULT_COMMAND_DEADLINE).await
    }
}

#[cfg(windows)]
fn maintenance_command(category: TaskCategory) -> Option<(&'static str, &'static [&'static str])> {
    match category {
        TaskCategory::Optimization => Some(("defrag", &["C:", "/O"])),
        TaskCategory::Updates => Some(("winget", &["upgrade"])),
        TaskCategory::Backup => Some((
            "powershell",
            &["-NoProfile", "-Command", "Checkpoint-Computer -Description healthmon"],
        )),
        TaskCategory::Security => Some((
            "powershell",
            &["-NoProfile", "-Command", "Start-MpScan -ScanType QuickScan"],
        )),
        TaskCategory::DiskHealth => Some((
            "powershell",
            &["-NoProfile", "-Command", "Get-PhysicalDisk | Select-Object FriendlyName, HealthStatus"],
        )),
        TaskCategory::Cleanup | TaskCategory::Custom => None,
    }
}

#[cfg(target_os = "macos")]
fn maintenance_command(category: TaskCategory) -> Option<(&'static str, &'static [&'static str])> {
    match category {
        TaskCategory::Updates => Some(("softwareupdate", &["--list"])),
        TaskCategory::Backup => Some(("tmutil", &["startbackup"])),
        TaskCategory::DiskHealth => Some(("diskutil", &["verifyVolume", "/"])),
        _ => None,
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn maintenance_command(category: TaskCategory) -> Option<(&'static str, &'static [&'static str])> {
    match category {
        TaskCategory::Optimization => Some(("fstrim", &["--all"])),
        TaskCategory::Updates => Some(("apt-get", &["--simulate", "upgrade"])),
        TaskCategory::Security => Some(("clamscan", &["--infected", "--recursive", "/tmp"])),
        TaskCategory::DiskHealth => Some(("smartctl", &["--health", "/dev/sda"])),
        _ => None,
    }
}
