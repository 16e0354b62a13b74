use anyhow::{bail, Context, Result};
use chrono::{Duration, Local, NaiveDateTime};
use clap::ArgMatches;
use colored::Colorize;

use crate::core::config::Config;
use crate::core::scheduler::{default_postpone, NewTask, Priority, TaskCategory, TaskScheduler};
use crate::error::HealthError;
use crate::ui::{self, print_tasks};

pub fn execute(matches: &ArgMatches, root: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let backend = super::open_backend(root)?;
    let scheduler = TaskScheduler::with_backend(config.scheduler.clone(), backend)?;
    let now = Local::now().naive_local();

    match matches.subcommand() {
        Some(("list", sub_matches)) => {
            let tasks = if sub_matches.get_flag("all") {
                scheduler.list()
            } else {
                scheduler.pending()
            };
            print_tasks(&tasks);
        }
        Some(("regenerate", _)) => {
            let count = scheduler.regenerate(now)?;
            ui::success(&format!("Generated {} maintenance tasks for the next 7 days.", count));
        }
        Some(("complete", sub_matches)) => {
            let id = task_id(sub_matches)?;
            let task = scheduler.complete(id, now)?;
            ui::success(&format!("Task {} '{}' marked completed.", task.id, task.title));
        }
        Some(("postpone", sub_matches)) => {
            let id = task_id(sub_matches)?;
            let delta = match sub_matches.get_one::<i64>("hours") {
                Some(hours) => Duration::hours(*hours),
                None => default_postpone(),
            };
            let task = scheduler.postpone(id, delta)?;
            ui::success(&format!(
                "Task {} moved to {}.",
                task.id,
                task.scheduled_at.format("%Y-%m-%d %H:%M")
            ));
        }
        Some(("add", sub_matches)) => {
            let new_task = parse_new_task(sub_matches)?;
            let task = scheduler.add_task(new_task)?;
            ui::success(&format!(
                "Added task {} '{}' at {}.",
                task.id,
                task.title,
                task.scheduled_at.format("%Y-%m-%d %H:%M")
            ));
        }
        Some(("delete", sub_matches)) => {
            let id = task_id(sub_matches)?;
            scheduler.delete_task(id)?;
            ui::success(&format!("Task {} deleted.", id));
        }
        Some(("errors", sub_matches)) => {
            let id = sub_matches.get_one::<i64>("id").copied();
            let errors = scheduler.task_errors(id);
            if errors.is_empty() {
                ui::info("No task errors recorded.");
            }
            for error in errors {
                println!(
                    "  task {} attempt {} at {}: {}",
                    error.task_id.to_string().yellow(),
                    error.attempt,
                    error.occurred_at.format("%Y-%m-%d %H:%M"),
                    error.message
                );
            }
        }
        _ => {
            println!("Use 'healthmon tasks --help' for more information.");
        }
    }

    settle_writes(&scheduler)
}

/// Give writes that failed a few more tries before the process exits.
fn settle_writes(scheduler: &TaskScheduler) -> Result<()> {
    let Some(queue) = scheduler.storage() else {
        return Ok(());
    };
    if !queue.is_degraded() {
        return Ok(());
    }
    if super::runtime()?.block_on(queue.retry_pending()) {
        return Ok(());
    }
    Err(HealthError::other(format!(
        "{} task change(s) could not be stored; the backend is unavailable",
        queue.pending_len()
    ))
    .into())
}

fn task_id(matches: &ArgMatches) -> Result<i64> {
    matches
        .get_one::<i64>("id")
        .copied()
        .context("task id is required")
}

fn parse_new_task(matches: &ArgMatches) -> Result<NewTask> {
    let title = matches.get_one::<String>("title").context("title is required")?;
    let at = matches.get_one::<String>("at").context("--at is required")?;
    let scheduled_at = NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid time '{}', expected \"YYYY-MM-DD HH:MM\"", at))?;

    let category = match matches.get_one::<String>("category") {
        Some(c) => match TaskCategory::parse(c) {
            Some(category) => category,
            None => bail!("Unknown category '{}'", c),
        },
        None => TaskCategory::Custom,
    };
    let priority = match matches.get_one::<String>("priority") {
        Some(p) => match Priority::parse(p) {
            Some(priority) => priority,
            None => bail!("Unknown priority '{}'", p),
        },
        None => Priority::Medium,
    };

    let mut task = NewTask::new(title, category, scheduled_at).priority(priority);
    if let Some(description) = matches.get_one::<String>("description") {
        task = task.description(description);
    }
    Ok(task)
}
