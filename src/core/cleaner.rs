//! Temporary files cleaner
//!
//! Scans and deletes files from temporary, browser cache and log
//! directories. Deletion honours a minimum file age, an optional extension
//! filter and a cooperative cancel flag checked between files.
//!
//! # Examples
//!
//! ```no_run
//! use healthmon::core::cleaner::TempCleaner;
//!
//! let cleaner = TempCleaner::new();
//!
//! // Scan to get statistics
//! let stats = cleaner.scan();
//! println!("Found {} files ({} bytes)", stats.total_files, stats.total_size);
//!
//! // Clean with dry-run
//! let stats = cleaner.clean(true);
//! println!("Would free {} bytes", stats.deleted_size);
//! ```

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::platform::{get_browser_cache_directories, get_default_temp_directories, get_log_directories};

/// Logs younger than this are left in place.
pub const STALE_LOG_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Files cleaner over a fixed set of directories
pub struct TempCleaner {
    pub directories: Vec<String>,
    /// Only files last modified at least this long ago are eligible.
    pub min_age: Option<Duration>,
    /// When set, only files with one of these extensions (lowercase, no dot).
    pub extensions: Option<Vec<String>>,
    pub cancel_flag: Arc<AtomicBool>,
}

/// Statistics from cleanup operations
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanupStats {
    pub total_files: usize,
    pub total_size: u64,
    pub deleted_files: usize,
    pub deleted_size: u64,
    pub failed_files: usize,
    pub was_cancelled: bool,
}

impl CleanupStats {
    pub fn merge(&mut self, other: &CleanupStats) {
        self.total_files += other.total_files;
        self.total_size += other.total_size;
        self.deleted_files += other.deleted_files;
        self.deleted_size += other.deleted_size;
        self.failed_files += other.failed_files;
        self.was_cancelled |= other.was_cancelled;
    }
}

impl TempCleaner {
    /// Cleaner over the system temporary directories
    pub fn new() -> Self {
        Self::with_directories(get_default_temp_directories())
    }

    pub fn with_directories(directories: Vec<String>) -> Self {
        Self {
            directories,
            min_age: None,
            extensions: None,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cleaner over per-user browser caches
    pub fn browser_caches() -> Self {
        Self::with_directories(get_browser_cache_directories())
    }

    /// Cleaner over log directories, limited to `.log` files older than a week
    pub fn stale_logs() -> Self {
        Self::with_directories(get_log_directories())
            .min_age(STALE_LOG_AGE)
            .extensions(&["log", "old", "gz"])
    }

    pub fn min_age(mut self, age: Duration) -> Self {
        self.min_age = Some(age);
        self
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = Some(extensions.iter().map(|e| e.to_lowercase()).collect());
        self
    }

    /// Share a cancel flag with the caller.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = flag;
        self
    }

    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    fn is_eligible(&self, path: &Path, metadata: &fs::Metadata, now: SystemTime) -> bool {
        if let Some(exts) = &self.extensions {
            let matches = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .is_some_and(|e| exts.contains(&e));
            if !matches {
                return false;
            }
        }
        if let Some(min_age) = self.min_age {
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if age < min_age {
                return false;
            }
        }
        true
    }

    /// Count eligible files and their total size
    pub fn scan(&self) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let now = SystemTime::now();

        for dir in &self.directories {
            self.walk(Path::new(dir), now, &mut |_, metadata| {
                stats.total_files += 1;
                stats.total_size += metadata.len();
                true
            });
        }

        stats.was_cancelled = self.is_cancelled();
        stats
    }

    /// Delete eligible files. With `dry_run` nothing is removed but the stats
    /// report what would have been.
    pub fn clean(&self, dry_run: bool) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let now = SystemTime::now();

        for dir in &self.directories {
            self.walk(Path::new(dir), now, &mut |path, metadata| {
                let size = metadata.len();
                stats.total_files += 1;
                stats.total_size += size;

                if dry_run {
                    stats.deleted_files += 1;
                    stats.deleted_size += size;
                    return true;
                }
                match fs::remove_file(path) {
                    Ok(_) => {
                        stats.deleted_files += 1;
                        stats.deleted_size += size;
                    }
                    Err(e) => {
                        log::debug!("Could not remove {:?}: {}", path, e);
                        stats.failed_files += 1;
                    }
                }
                true
            });
            if self.is_cancelled() {
                break;
            }
        }

        stats.was_cancelled = self.is_cancelled();
        if stats.was_cancelled {
            log::info!(
                "Cleanup cancelled after removing {} files",
                stats.deleted_files
            );
        }
        stats
    }

    /// Visit eligible files depth-first. Stops when the visitor returns
    /// false or the cancel flag is raised.
    fn walk<F>(&self, dir: &Path, now: SystemTime, visit: &mut F) -> bool
    where
        F: FnMut(&Path, &fs::Metadata) -> bool,
    {
        let Ok(entries) = fs::read_dir(dir) else {
            return true;
        };
        for entry in entries.flatten() {
            if self.is_cancelled() {
                return false;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let path = entry.path();
            if metadata.is_file() {
                if self.is_eligible(&path, &metadata, now) && !visit(&path, &metadata) {
                    return false;
                }
            } else if metadata.is_dir() && !self.walk(&path, now, visit) {
                return false;
            }
        }
        true
    }
}

impl Default for TempCleaner {
    fn default() -> Self {
        Self::new()
    }
}
