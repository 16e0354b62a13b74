//! Process control: termination and zombie reaping.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};

fn refreshed(pid: u32) -> (System, Pid) {
    let mut system = System::new();
    let target = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::nothing(),
    );
    (system, target)
}

/// Name of the process currently holding `pid`.
pub fn process_name(pid: u32) -> Option<String> {
    let (system, target) = refreshed(pid);
    system
        .process(target)
        .map(|p| p.name().to_string_lossy().to_string())
}

/// Ask `pid` to terminate if `accept` approves the name it holds right now,
/// falling back to a hard kill when the platform has no graceful signal.
/// Returns true only when a signal was delivered.
pub fn terminate_process<F>(pid: u32, accept: F) -> bool
where
    F: Fn(&str) -> bool,
{
    let (system, target) = refreshed(pid);
    let Some(process) = system.process(target) else {
        log::debug!("Process {} already exited", pid);
        return false;
    };

    let current = process.name().to_string_lossy().into_owned();
    if !accept(&current) {
        log::warn!("Refusing to signal pid {}: it now belongs to {}", pid, current);
        return false;
    }

    match process.kill_with(Signal::Term) {
        Some(sent) => sent,
        None => process.kill(),
    }
}

/// Nudge the parent of a zombie to reap it.
#[cfg(unix)]
pub fn signal_parent_to_reap(parent_pid: u32) -> bool {
    if parent_pid <= 1 {
        return false;
    }
    // SAFETY: kill(2) with a valid signal number has no memory effects.
    unsafe { libc::kill(parent_pid as libc::pid_t, libc::SIGCHLD) == 0 }
}

#[cfg(not(unix))]
pub fn signal_parent_to_reap(_parent_pid: u32) -> bool {
    false
}

/// Whether `pid` still refers to a zombie.
pub fn is_zombie(pid: u32) -> bool {
    let (system, target) = refreshed(pid);
    system
        .process(target)
        .is_some_and(|p| p.status() == sysinfo::ProcessStatus::Zombie)
}
