// Platform-specific cleanup locations
use std::path::Path;

fn existing(dirs: Vec<String>) -> Vec<String> {
    let mut unique_dirs: Vec<String> = dirs.into_iter().filter(|d| Path::new(d).exists()).collect();
    unique_dirs.sort();
    unique_dirs.dedup();
    unique_dirs
}

/// System and user temporary directories that exist on this machine
pub fn get_default_temp_directories() -> Vec<String> {
    let mut dirs = Vec::new();

    #[cfg(windows)]
    {
        // C:\Windows\Temp
        match std::env::var("SystemRoot") {
            Ok(windir) => dirs.push(format!("{}\\Temp", windir)),
            Err(_) => dirs.push("C:\\Windows\\Temp".to_string()),
        }

        // C:\Users\<username>\AppData\Local\Temp
        if let Ok(localappdata) = std::env::var("LOCALAPPDATA") {
            dirs.push(format!("{}\\Temp", localappdata));
        }
        if let Ok(temp) = std::env::var("TEMP") {
            dirs.push(temp);
        }
        // Prefetch is left alone: it holds launch optimisation data, not temp files.
    }

    #[cfg(unix)]
    {
        dirs.push("/tmp".to_string());
        dirs.push("/var/tmp".to_string());

        if let Ok(tmpdir) = std::env::var("TMPDIR") {
            dirs.push(tmpdir);
        }
    }

    existing(dirs)
}

/// Per-user browser cache directories
pub fn get_browser_cache_directories() -> Vec<String> {
    let mut paths = Vec::new();
    let Some(cache) = dirs::cache_dir() else {
        return paths;
    };

    #[cfg(windows)]
    let relative = [
        "Google\\Chrome\\User Data\\Default\\Cache",
        "Microsoft\\Edge\\User Data\\Default\\Cache",
        "Mozilla\\Firefox\\Profiles",
    ];
    #[cfg(target_os = "macos")]
    let relative = ["Google/Chrome", "com.apple.Safari", "Firefox/Profiles"];
    #[cfg(all(unix, not(target_os = "macos")))]
    let relative = ["google-chrome", "chromium", "mozilla/firefox"];

    for rel in relative {
        paths.push(cache.join(rel).to_string_lossy().to_string());
    }

    existing(paths)
}

/// Directories whose stale log files may be culled
pub fn get_log_directories() -> Vec<String> {
    let mut paths = Vec::new();

    #[cfg(windows)]
    {
        if let Ok(windir) = std::env::var("SystemRoot") {
            paths.push(format!("{}\\Logs", windir));
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join("Library/Logs").to_string_lossy().to_string());
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        if let Some(state) = dirs::state_dir() {
            paths.push(state.to_string_lossy().to_string());
        }
        if let Some(cache) = dirs::cache_dir() {
            paths.push(cache.join("logs").to_string_lossy().to_string());
        }
    }

    existing(paths)
}
