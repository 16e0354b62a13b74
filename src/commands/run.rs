use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::ArgMatches;
use colored::Colorize;

use crate::core::config::Config;
use crate::core::orchestrator::{HealthMonitor, MonitorHandle};
use crate::core::repair::RepairDispatcher;
use crate::core::scheduler::TaskScheduler;
use crate::core::storage::WriteBehindQueue;
use crate::core::system_monitor::SensorProbe;
use crate::ui::{self, print_alert, print_issue, print_prediction, print_repair};

/// Run the monitor in the foreground until Ctrl-C.
pub fn execute(matches: &ArgMatches, root: &ArgMatches) -> Result<()> {
    let mut config = Config::load_or_default()?;
    if let Some(secs) = matches.get_one::<u64>("interval") {
        config.monitor.probe_interval_secs = *secs;
    }
    if matches.get_flag("auto-repair") {
        config.monitor.auto_repair = true;
    }
    config.validate()?;

    let backend = super::open_backend(root)?;
    let queue = Arc::new(WriteBehindQueue::new(backend));
    let scheduler = Arc::new(TaskScheduler::with_storage(config.scheduler.clone(), Arc::clone(&queue))?);
    scheduler.regenerate(Local::now().naive_local())?;
    let dispatcher = Arc::new(RepairDispatcher::for_host(config.global.auto_fix_enabled));

    println!("{}", "Starting health monitor (Ctrl-C to stop)...".cyan().bold());
    println!(
        "{}",
        format!(
            "Probing every {}s, scheduler tick every {}s",
            config.monitor.probe_interval_secs, config.monitor.scheduler_tick_secs
        )
        .dimmed()
    );

    super::runtime()?.block_on(async move {
        let handle = HealthMonitor::new(&config, Box::new(SensorProbe::new()), dispatcher, scheduler)
            .storage(queue)
            .start();

        let cancel = handle.cancel_token();
        ctrlc::set_handler(move || cancel.cancel()).context("Failed to install Ctrl-C handler")?;

        let handle = forward_outputs(handle).await;
        if handle.shutdown().await {
            ui::success("Monitor stopped.");
        } else {
            ui::warn("Monitor stopped after aborting unfinished work.");
        }
        Ok::<(), anyhow::Error>(())
    })
}

/// Print everything the monitor emits until it is cancelled.
async fn forward_outputs(mut handle: MonitorHandle) -> MonitorHandle {
    let cancel = handle.cancel_token();
    loop {
        tokio::select! {
            Some(alert) = handle.alerts.recv() => print_alert(&alert),
            Some(prediction) = handle.predictions.recv() => print_prediction(&prediction),
            Some(issue) = handle.issues.recv() => print_issue(&issue),
            Some(record) = handle.repairs.recv() => print_repair(&record),
            _ = cancel.cancelled() => break,
        }
    }
    handle
}
