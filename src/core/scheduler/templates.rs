//! Auto-generated maintenance schedule.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use super::task::{NewTask, Priority, TaskCategory};
use crate::core::config::{Frequency, SchedulerSettings};
use crate::error::Result;

/// Days covered by one regeneration.
pub const SCHEDULE_HORIZON_DAYS: u64 = 7;

const DEFRAG_TIME: (u32, u32) = (3, 0);
const MORNING_TIME: (u32, u32) = (8, 0);
const EVENING_TIME: (u32, u32) = (20, 0);
const BACKUP_TIME: (u32, u32) = (21, 0);

const WEEKLY_UPDATE_DAY: Weekday = Weekday::Mon;
const WEEKLY_BACKUP_DAY: Weekday = Weekday::Sat;
const FULL_SCAN_DAY: Weekday = Weekday::Wed;
const DISK_CHECK_DAY: Weekday = Weekday::Fri;

fn at(date: NaiveDate, (h, m): (u32, u32)) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN))
}

fn on_cadence(date: NaiveDate, frequency: Frequency, weekly_day: Weekday) -> bool {
    match frequency {
        Frequency::Daily => true,
        Frequency::Weekly => date.weekday() == weekly_day,
        Frequency::Monthly => date.day() == 1,
    }
}

/// Tasks for the next `SCHEDULE_HORIZON_DAYS` days starting at `now`'s date.
/// Only slots at or after `now` are produced, ordered by time then title.
pub fn generate(settings: &SchedulerSettings, now: NaiveDateTime) -> Result<Vec<NewTask>> {
    let cleanup_time = settings.cleanup_time()?;
    let mut tasks = Vec::new();

    for offset in 0..SCHEDULE_HORIZON_DAYS {
        let Some(date) = now.date().checked_add_days(Days::new(offset)) else {
            break;
        };

        if settings.auto_cleanup {
            tasks.push(
                NewTask::new("Temporary file cleanup", TaskCategory::Cleanup, date.and_time(cleanup_time))
                    .description("Remove temporary files, stale logs and browser caches")
                    .priority(Priority::Medium),
            );
        }

        if settings.auto_defrag && date.weekday() == settings.defrag_day {
            tasks.push(
                NewTask::new("Disk optimization", TaskCategory::Optimization, at(date, DEFRAG_TIME))
                    .description("Defragment or trim the system drive")
                    .priority(Priority::Low),
            );
        }

        if settings.auto_updates && on_cadence(date, settings.update_frequency, WEEKLY_UPDATE_DAY) {
            tasks.push(
                NewTask::new("Check for updates", TaskCategory::Updates, at(date, MORNING_TIME))
                    .description("Look for pending operating system and package updates")
                    .priority(Priority::High),
            );
        }

        tasks.push(
            NewTask::new("Quick security scan", TaskCategory::Security, at(date, MORNING_TIME))
                .description("Run a quick malware scan")
                .priority(Priority::Medium),
        );

        if settings.auto_backup && on_cadence(date, settings.backup_frequency, WEEKLY_BACKUP_DAY) {
            tasks.push(
                NewTask::new("Backup", TaskCategory::Backup, at(date, BACKUP_TIME))
                    .description("Create a system restore point or backup")
                    .priority(Priority::High),
            );
        }

        if date.weekday() == FULL_SCAN_DAY {
            tasks.push(
                NewTask::new("Full security scan", TaskCategory::Security, at(date, EVENING_TIME))
                    .description("Run a full malware scan")
                    .priority(Priority::Medium),
            );
        }

        if date.weekday() == DISK_CHECK_DAY {
            tasks.push(
                NewTask::new("Disk health check", TaskCategory::DiskHealth, at(date, EVENING_TIME))
                    .description("Query drive health status")
                    .priority(Priority::Medium),
            );
        }
    }

    tasks.retain(|t| t.scheduled_at >= now);
    tasks.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.title.cmp(&b.title))
    });
    Ok(tasks)
}
