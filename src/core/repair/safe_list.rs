use std::collections::HashSet;

/// Processes that are never terminated.
#[cfg(windows)]
const PLATFORM_CRITICAL: &[&str] = &[
    "system",
    "system idle process",
    "registry",
    "smss",
    "csrss",
    "wininit",
    "winlogon",
    "services",
    "lsass",
    "svchost",
    "dwm",
    "explorer",
    "fontdrvhost",
    "memory compression",
];

#[cfg(target_os = "macos")]
const PLATFORM_CRITICAL: &[&str] = &[
    "kernel_task",
    "launchd",
    "windowserver",
    "loginwindow",
    "logd",
    "configd",
    "mds",
    "coreaudiod",
];

#[cfg(all(unix, not(target_os = "macos")))]
const PLATFORM_CRITICAL: &[&str] = &[
    "init",
    "systemd",
    "systemd-journald",
    "systemd-logind",
    "systemd-udevd",
    "kthreadd",
    "dbus-daemon",
    "sshd",
    "xorg",
    "gnome-shell",
    "kwin_x11",
    "kwin_wayland",
    "pipewire",
];

/// Known non-critical desktop apps that may be closed when too many
/// processes are running.
pub const NON_CRITICAL_APPS: &[&str] = &[
    "spotify",
    "discord",
    "steam",
    "slack",
    "teams",
    "zoom",
    "skype",
    "onedrive",
    "dropbox",
    "epicgameslauncher",
];

/// Names and pids the repair dispatcher must never terminate.
#[derive(Debug, Clone)]
pub struct SafeList {
    names: HashSet<String>,
    pids: HashSet<u32>,
}

/// Lowercase and drop a trailing `.exe`.
pub fn normalize_process_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

impl SafeList {
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
            pids: HashSet::new(),
        }
    }

    /// OS-critical names, the kernel, and this process.
    pub fn for_current_platform() -> Self {
        let mut list = Self::empty();
        list.add_name("kernel");
        for name in PLATFORM_CRITICAL {
            list.add_name(name);
        }
        list.add_pid(0);
        list.add_pid(1);
        list.add_pid(std::process::id());
        if let Some(own) = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        {
            list.add_name(&own);
        }
        list.add_name(env!("CARGO_PKG_NAME"));
        list
    }

    pub fn add_name(&mut self, name: &str) {
        self.names.insert(normalize_process_name(name));
    }

    pub fn add_pid(&mut self, pid: u32) {
        self.pids.insert(pid);
    }

    pub fn is_protected(&self, pid: u32, name: &str) -> bool {
        self.pids.contains(&pid) || self.names.contains(&normalize_process_name(name))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(&normalize_process_name(name))
    }
}

impl Default for SafeList {
    fn default() -> Self {
        Self::for_current_platform()
    }
}

pub fn is_non_critical_app(name: &str) -> bool {
    let name = normalize_process_name(name);
    NON_CRITICAL_APPS.iter().any(|app| *app == name)
}
