use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use healthmon::core::cleaner::TempCleaner;
use tempfile::TempDir;

fn populate(dir: &TempDir, count: usize) {
    for i in 0..count {
        std::fs::write(dir.path().join(format!("file{}.tmp", i)), "content").unwrap();
    }
}

fn cleaner_for(dir: &TempDir) -> TempCleaner {
    TempCleaner::with_directories(vec![dir.path().to_string_lossy().to_string()])
}

#[test]
fn test_no_cancellation_completes_fully() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 10);

    let stats = cleaner_for(&temp_dir).clean(false);

    assert!(!stats.was_cancelled, "Should not be cancelled");
    assert_eq!(stats.deleted_files, 10, "Should delete all files");
    assert_eq!(stats.deleted_size, 70);
}

#[test]
fn test_cancel_before_start_deletes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    for i in 0..10 {
        let subdir = temp_dir.path().join(format!("dir{}", i));
        std::fs::create_dir(&subdir).unwrap();
        for j in 0..10 {
            std::fs::write(subdir.join(format!("file{}.tmp", j)), "content").unwrap();
        }
    }

    let cleaner = cleaner_for(&temp_dir);
    cleaner.cancel();
    let stats = cleaner.clean(false);

    assert!(stats.was_cancelled, "Should be cancelled");
    assert_eq!(stats.deleted_files, 0, "Should not delete any files when cancelled before start");
}

#[test]
fn test_shared_flag_cancels_from_another_thread() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 50);

    let flag = Arc::new(AtomicBool::new(false));
    let cleaner = cleaner_for(&temp_dir).cancel_flag(flag.clone());

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let flag = flag.clone();
            thread::spawn(move || {
                flag.store(true, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cleaner.clean(false);
    assert!(stats.was_cancelled, "Should be cancelled by one of the threads");
    assert_eq!(stats.deleted_files, 0);
}

#[test]
fn test_dry_run_keeps_files() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 20);

    let stats = cleaner_for(&temp_dir).clean(true);

    assert_eq!(stats.deleted_files, 20);
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 20);
}

#[test]
fn test_min_age_and_extension_filters() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("keep.txt"), "x").unwrap();
    std::fs::write(temp_dir.path().join("old.log"), "x").unwrap();

    let fresh_only = cleaner_for(&temp_dir).min_age(Duration::from_secs(3600));
    assert_eq!(fresh_only.scan().total_files, 0);

    let logs = cleaner_for(&temp_dir).extensions(&["LOG"]);
    let stats = logs.clean(false);
    assert_eq!(stats.deleted_files, 1);
    assert!(temp_dir.path().join("keep.txt").exists());
    assert!(!temp_dir.path().join("old.log").exists());
}
