//! Maps diagnosed issues and scheduled maintenance to mitigation actions.

mod actions;
mod record;
mod safe_list;

pub use actions::{CleanupTarget, HostActions, SystemActions};
pub use record::{RepairFailure, RepairHistory, RepairRecord, RepairSubject, REPAIR_HISTORY_CAPACITY};
pub use safe_list::{is_non_critical_app, normalize_process_name, SafeList, NON_CRITICAL_APPS};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use humansize::{format_size, BINARY};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::cleaner::CleanupStats;
use crate::core::diagnostics::{Issue, IssueKind, IssueTarget};
use crate::core::scheduler::TaskCategory;
use crate::core::system_monitor::ProcessInfo;
use crate::platform::{CommandOutcome, CommandStatus};

const MIB: u64 = 1024 * 1024;

/// Limits applied to automatic repairs.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairPolicy {
    pub auto_fix_enabled: bool,
    /// Processes terminated for a CPU issue.
    pub max_cpu_kills: usize,
    /// Processes terminated for a memory issue.
    pub max_memory_kills: usize,
    /// Ignore processes below this CPU share when picking victims.
    pub min_process_cpu: f32,
    /// Ignore processes below this memory share when picking victims.
    pub min_process_memory: f32,
    /// Memory repair succeeds once this much resident memory is freed.
    pub memory_freed_target: u64,
    pub clean_browser_caches: bool,
    pub clean_stale_logs: bool,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            auto_fix_enabled: false,
            max_cpu_kills: 3,
            max_memory_kills: 5,
            min_process_cpu: 10.0,
            min_process_memory: 5.0,
            memory_freed_target: 100 * MIB,
            clean_browser_caches: true,
            clean_stale_logs: true,
        }
    }
}

/// Result of one mitigation before it is stamped into a record.
struct Mitigation {
    action: &'static str,
    success: bool,
    failure: Option<RepairFailure>,
    message: String,
    bytes_freed: u64,
    processes_affected: u32,
}

impl Mitigation {
    fn ok(action: &'static str, message: String) -> Self {
        Self {
            action,
            success: true,
            failure: None,
            message,
            bytes_freed: 0,
            processes_affected: 0,
        }
    }

    fn fail(action: &'static str, failure: RepairFailure, message: String) -> Self {
        Self {
            success: false,
            failure: Some(failure),
            ..Self::ok(action, message)
        }
    }

    fn from_command(action: &'static str, outcome: &CommandOutcome) -> Self {
        match outcome.status {
            CommandStatus::Success => Self::ok(action, outcome.summary()),
            CommandStatus::TimedOut => Self::fail(action, RepairFailure::Timeout, outcome.summary()),
            _ => Self::fail(action, RepairFailure::ActionFailed, outcome.summary()),
        }
    }

    fn cancelled(action: &'static str) -> Self {
        Self::fail(action, RepairFailure::Cancelled, "Cancelled before completion".to_string())
    }
}

pub struct RepairDispatcher {
    actions: Arc<dyn SystemActions>,
    safe_list: SafeList,
    policy: RwLock<RepairPolicy>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    history: RepairHistory,
}

impl RepairDispatcher {
    pub fn new(actions: Arc<dyn SystemActions>, safe_list: SafeList, policy: RepairPolicy) -> Self {
        Self {
            actions,
            safe_list,
            policy: RwLock::new(policy),
            locks: Mutex::new(HashMap::new()),
            history: RepairHistory::default(),
        }
    }

    /// Dispatcher acting on this machine.
    pub fn for_host(auto_fix_enabled: bool) -> Self {
        Self::new(
            Arc::new(HostActions::new()),
            SafeList::for_current_platform(),
            RepairPolicy {
                auto_fix_enabled,
                ..Default::default()
            },
        )
    }

    pub fn policy(&self) -> RepairPolicy {
        self.policy.read().clone()
    }

    pub fn set_auto_fix_enabled(&self, enabled: bool) {
        self.policy.write().auto_fix_enabled = enabled;
    }

    pub fn safe_list(&self) -> &SafeList {
        &self.safe_list
    }

    pub fn history(&self) -> &RepairHistory {
        &self.history
    }

    fn lock_for(&self, key: String) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key).or_default())
    }

    fn finish(&self, subject: RepairSubject, started: Instant, m: Mitigation) -> RepairRecord {
        let record = RepairRecord {
            success: m.success,
            failure: m.failure,
            duration: started.elapsed(),
            bytes_freed: m.bytes_freed,
            processes_affected: m.processes_affected,
            ..RepairRecord::succeeded(subject, m.action, m.message)
        };

        if record.success {
            log::info!("Repair {} ({}) succeeded: {}", record.subject.label(), record.action, record.message);
        } else {
            log::warn!(
                "Repair {} ({}) failed [{}]: {}",
                record.subject.label(),
                record.action,
                record.reason().unwrap_or("unknown"),
                record.message
            );
        }
        self.history.push(record.clone());
        record
    }

    /// Mitigate `issue`. Calls for the same issue kind run one at a time.
    pub async fn apply(&self, issue: &Issue, cancel: &CancellationToken) -> RepairRecord {
        let started = Instant::now();
        let subject = RepairSubject::Issue {
            kind: issue.kind,
            issue_id: issue.id.clone(),
        };

        let policy = self.policy();
        if !policy.auto_fix_enabled || !issue.auto_fixable {
            let why = if !policy.auto_fix_enabled {
                "Automatic repair is disabled"
            } else {
                "Issue is not safe to fix automatically"
            };
            return self.finish(
                subject,
                started,
                Mitigation::fail("none", RepairFailure::DisabledOrUnsafe, why.to_string()),
            );
        }

        let lock = self.lock_for(subject.label());
        let _guard = lock.lock().await;

        if cancel.is_cancelled() {
            return self.finish(subject, started, Mitigation::cancelled("none"));
        }

        let mitigation = self.mitigate(issue, &policy, cancel).await;
        self.finish(subject, started, mitigation)
    }

    /// Run the action bound to a maintenance category. Not gated by
    /// `auto_fix_enabled`: scheduled maintenance is opted into per template.
    pub async fn run_maintenance(&self, category: TaskCategory, cancel: &CancellationToken) -> RepairRecord {
        let started = Instant::now();
        let subject = RepairSubject::Maintenance { category };

        let lock = self.lock_for(subject.label());
        let _guard = lock.lock().await;

        if cancel.is_cancelled() {
            return self.finish(subject, started, Mitigation::cancelled("none"));
        }

        let mitigation = match category {
            TaskCategory::Cleanup => {
                let policy = self.policy();
                let mut m = self.clean_all(&policy, cancel).await;
                // Nothing to free is still a completed scheduled cleanup.
                if m.failure == Some(RepairFailure::NothingToDo) {
                    m = Mitigation::ok("clean_temp", "No temporary files to remove".to_string());
                }
                m
            }
            TaskCategory::Custom => Mitigation::ok("reminder", "Reminder task, nothing to run".to_string()),
            other => {
                let outcome = self.actions.maintenance(other).await;
                Mitigation::from_command("maintenance", &outcome)
            }
        };
        self.finish(subject, started, mitigation)
    }

    async fn mitigate(&self, issue: &Issue, policy: &RepairPolicy, cancel: &CancellationToken) -> Mitigation {
        match issue.kind {
            IssueKind::HighCpuProcess | IssueKind::HighMemoryProcess if issue.target.is_some() => {
                self.terminate_target(issue).await
            }
            IssueKind::HighCpu | IssueKind::HighCpuProcess => self.relieve_cpu(policy).await,
            IssueKind::HighMemoryCritical | IssueKind::HighMemoryWarn | IssueKind::HighMemoryProcess => {
                self.relieve_memory(policy, cancel).await
            }
            IssueKind::DiskFull | IssueKind::DiskLow | IssueKind::LargeTempFiles => {
                self.clean_all(policy, cancel).await
            }
            IssueKind::ZombieProcesses => self.reap_zombies().await,
            IssueKind::TooManyConnections | IssueKind::NetworkErrors => self.reset_network(cancel).await,
            IssueKind::HighTemperature => {
                let cpu = self.relieve_cpu(policy).await;
                if cancel.is_cancelled() {
                    return Mitigation::cancelled("cool_down");
                }
                let clean = self.clean_temp_only(cancel).await;
                Mitigation {
                    action: "cool_down",
                    success: cpu.success || clean.success,
                    failure: if cpu.success || clean.success {
                        None
                    } else {
                        cpu.failure.or(clean.failure)
                    },
                    message: format!("{}; {}", cpu.message, clean.message),
                    bytes_freed: clean.bytes_freed,
                    processes_affected: cpu.processes_affected,
                }
            }
            IssueKind::TooManyProcesses => self.close_non_critical_apps().await,
            IssueKind::SlowDiskIo | IssueKind::LongUptime => Mitigation::fail(
                "none",
                RepairFailure::DisabledOrUnsafe,
                "No automatic mitigation".to_string(),
            ),
        }
    }

    async fn terminate_target(&self, issue: &Issue) -> Mitigation {
        let Some(IssueTarget::Process { pid, name }) = &issue.target else {
            return Mitigation::fail("terminate", RepairFailure::NothingToDo, "No process target".to_string());
        };
        if self.safe_list.is_protected(*pid, name) {
            return Mitigation::fail(
                "terminate",
                RepairFailure::SafeListed,
                format!("{} (pid {}) is protected", name, pid),
            );
        }
        // The issue may be minutes old; the pid can belong to another process by now.
        match self.actions.process_name(*pid).await {
            None => {
                return Mitigation::fail(
                    "terminate",
                    RepairFailure::NothingToDo,
                    format!("{} (pid {}) already exited", name, pid),
                )
            }
            Some(current) if self.safe_list.is_protected(*pid, &current) => {
                return Mitigation::fail(
                    "terminate",
                    RepairFailure::SafeListed,
                    format!("pid {} now belongs to protected {}", pid, current),
                )
            }
            Some(current) if normalize_process_name(&current) != normalize_process_name(name) => {
                return Mitigation::fail(
                    "terminate",
                    RepairFailure::NothingToDo,
                    format!("{} (pid {}) exited and the pid now belongs to {}", name, pid, current),
                )
            }
            Some(_) => {}
        }
        if self.actions.terminate(*pid, name).await {
            Mitigation {
                processes_affected: 1,
                ..Mitigation::ok("terminate", format!("Terminated {} (pid {})", name, pid))
            }
        } else {
            Mitigation::fail(
                "terminate",
                RepairFailure::ActionFailed,
                format!("Could not terminate {} (pid {})", name, pid),
            )
        }
    }

    /// Candidates sorted by `key` descending, excluding protected processes.
    fn victims<F>(&self, processes: Vec<ProcessInfo>, key: F, minimum: f32, limit: usize) -> Vec<ProcessInfo>
    where
        F: Fn(&ProcessInfo) -> f32,
    {
        let mut candidates: Vec<ProcessInfo> = processes
            .into_iter()
            .filter(|p| !p.is_zombie && key(p) >= minimum)
            .filter(|p| !self.safe_list.is_protected(p.pid, &p.name))
            .collect();
        candidates.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(limit);
        candidates
    }

    async fn terminate_all(&self, victims: &[ProcessInfo]) -> (Vec<String>, u64) {
        let mut killed = Vec::new();
        let mut freed = 0;
        for proc in victims {
            if self.actions.terminate(proc.pid, &proc.name).await {
                killed.push(format!("{} ({})", proc.name, proc.pid));
                freed += proc.memory_bytes;
            }
        }
        (killed, freed)
    }

    async fn relieve_cpu(&self, policy: &RepairPolicy) -> Mitigation {
        let processes = self.actions.processes().await;
        let victims = self.victims(processes, |p| p.cpu_percent, policy.min_process_cpu, policy.max_cpu_kills);
        if victims.is_empty() {
            return Mitigation::fail(
                "terminate_top_cpu",
                RepairFailure::NothingToDo,
                "No unprotected process is using significant CPU".to_string(),
            );
        }
        let (killed, _) = self.terminate_all(&victims).await;
        if killed.is_empty() {
            Mitigation::fail(
                "terminate_top_cpu",
                RepairFailure::ActionFailed,
                "No process could be terminated".to_string(),
            )
        } else {
            Mitigation {
                processes_affected: killed.len() as u32,
                ..Mitigation::ok("terminate_top_cpu", format!("Terminated {}", killed.join(", ")))
            }
        }
    }

    async fn relieve_memory(&self, policy: &RepairPolicy, cancel: &CancellationToken) -> Mitigation {
        let processes = self.actions.processes().await;
        let victims = self.victims(
            processes,
            |p| p.memory_percent,
            policy.min_process_memory,
            policy.max_memory_kills,
        );
        let (killed, freed) = self.terminate_all(&victims).await;

        if cancel.is_cancelled() {
            return Mitigation {
                processes_affected: killed.len() as u32,
                ..Mitigation::cancelled("free_memory")
            };
        }
        let caches = self.actions.drop_caches().await;

        let success = freed >= policy.memory_freed_target || caches.success();
        let message = format!(
            "Terminated {} process(es) freeing {}; cache drop: {}",
            killed.len(),
            format_size(freed, BINARY),
            caches.summary()
        );
        let m = if success {
            Mitigation::ok("free_memory", message)
        } else if caches.timed_out() {
            Mitigation::fail("free_memory", RepairFailure::Timeout, message)
        } else {
            Mitigation::fail("free_memory", RepairFailure::ActionFailed, message)
        };
        Mitigation {
            bytes_freed: freed,
            processes_affected: killed.len() as u32,
            ..m
        }
    }

    async fn run_cleanup_steps(&self, targets: &[CleanupTarget], cancel: &CancellationToken) -> CleanupStats {
        let mut total = CleanupStats::default();
        for target in targets {
            if cancel.is_cancelled() {
                total.was_cancelled = true;
                break;
            }
            let stats = self.actions.clean(*target, cancel).await;
            log::debug!("Cleanup {:?} freed {} bytes", target, stats.deleted_size);
            total.merge(&stats);
        }
        total
    }

    fn cleanup_mitigation(action: &'static str, stats: CleanupStats) -> Mitigation {
        let message = format!(
            "Removed {} file(s), freed {}",
            stats.deleted_files,
            format_size(stats.deleted_size, BINARY)
        );
        let m = if stats.deleted_size > 0 {
            Mitigation::ok(action, message)
        } else if stats.was_cancelled {
            Mitigation::cancelled(action)
        } else {
            Mitigation::fail(action, RepairFailure::NothingToDo, message)
        };
        Mitigation {
            bytes_freed: stats.deleted_size,
            ..m
        }
    }

    async fn clean_all(&self, policy: &RepairPolicy, cancel: &CancellationToken) -> Mitigation {
        let mut targets = vec![CleanupTarget::TempFiles];
        if policy.clean_browser_caches {
            targets.push(CleanupTarget::BrowserCaches);
        }
        if policy.clean_stale_logs {
            targets.push(CleanupTarget::StaleLogs);
        }
        let stats = self.run_cleanup_steps(&targets, cancel).await;
        Self::cleanup_mitigation("clean_temp", stats)
    }

    async fn clean_temp_only(&self, cancel: &CancellationToken) -> Mitigation {
        let stats = self.run_cleanup_steps(&[CleanupTarget::TempFiles], cancel).await;
        Self::cleanup_mitigation("clean_temp", stats)
    }

    async fn reap_zombies(&self) -> Mitigation {
        let zombies: Vec<ProcessInfo> = self
            .actions
            .processes()
            .await
            .into_iter()
            .filter(|p| p.is_zombie)
            .collect();
        if zombies.is_empty() {
            return Mitigation::fail("reap_zombies", RepairFailure::NothingToDo, "No zombies found".to_string());
        }
        let mut reaped = 0u32;
        for zombie in &zombies {
            if self.actions.reap_zombie(zombie).await {
                reaped += 1;
            }
        }
        let message = format!("Reaped {} of {} zombie process(es)", reaped, zombies.len());
        if reaped > 0 {
            Mitigation {
                processes_affected: reaped,
                ..Mitigation::ok("reap_zombies", message)
            }
        } else {
            Mitigation::fail("reap_zombies", RepairFailure::ActionFailed, message)
        }
    }

    async fn reset_network(&self, cancel: &CancellationToken) -> Mitigation {
        if cancel.is_cancelled() {
            return Mitigation::cancelled("reset_network");
        }
        let outcomes = self.actions.reset_network().await;
        let Some(failed) = outcomes.iter().find(|o| !o.success()) else {
            if outcomes.is_empty() {
                return Mitigation::fail("reset_network", RepairFailure::NothingToDo, "No reset steps".to_string());
            }
            let steps: Vec<String> = outcomes.iter().map(|o| o.summary()).collect();
            return Mitigation::ok("reset_network", steps.join("; "));
        };
        Mitigation::from_command("reset_network", failed)
    }

    async fn close_non_critical_apps(&self) -> Mitigation {
        let victims: Vec<ProcessInfo> = self
            .actions
            .processes()
            .await
            .into_iter()
            .filter(|p| is_non_critical_app(&p.name) && !self.safe_list.is_protected(p.pid, &p.name))
            .collect();
        if victims.is_empty() {
            return Mitigation::fail(
                "close_apps",
                RepairFailure::NothingToDo,
                "No known non-critical apps are running".to_string(),
            );
        }
        let (killed, _) = self.terminate_all(&victims).await;
        if killed.is_empty() {
            Mitigation::fail("close_apps", RepairFailure::ActionFailed, "No app could be closed".to_string())
        } else {
            Mitigation {
                processes_affected: killed.len() as u32,
                ..Mitigation::ok("close_apps", format!("Closed {}", killed.join(", ")))
            }
        }
    }
}
