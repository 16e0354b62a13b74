use std::sync::Arc;

use anyhow::Result;
use clap::ArgMatches;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::diagnostics::DiagnosticEngine;
use crate::core::repair::RepairDispatcher;
use crate::core::system_monitor::{Probe, SensorProbe};
use crate::error::HealthError;
use crate::ui::{self, print_issue, print_repair};

pub fn execute(matches: &ArgMatches, root: &ArgMatches) -> Result<()> {
    let fix = matches.get_flag("fix");
    let assume_yes = matches.get_flag("yes");
    let json = matches.get_flag("json");
    let config = Config::load()?;

    if !json {
        println!("{}", "Collecting diagnostics...".cyan().bold());
    }
    let mut probe = SensorProbe::new();
    let sample = Arc::new(probe.probe().map_err(HealthError::from)?);
    let input = probe.diagnostic_input(sample);
    let issues = DiagnosticEngine::from_config(&config).diagnose(&input);

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else if issues.is_empty() {
        ui::success("No issues found.");
    } else {
        println!();
        println!("{}", format!("Found {} issue(s):", issues.len()).white().bold());
        for issue in &issues {
            print_issue(issue);
        }
        println!();
    }

    if !fix {
        return Ok(());
    }
    let fixable: Vec<_> = issues.into_iter().filter(|i| i.auto_fixable).collect();
    if fixable.is_empty() {
        ui::info("Nothing to repair automatically.");
        return Ok(());
    }

    // Passing --fix is explicit consent for this run.
    if !assume_yes && !ui::confirm(&format!("Apply {} repair(s)?", fixable.len()), false)? {
        ui::warn("Operation cancelled by user.");
        return Ok(());
    }

    let backend = super::open_backend(root)?;
    let dispatcher = RepairDispatcher::for_host(true);
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            log::warn!("Could not install Ctrl-C handler: {}", e);
        }
    }

    let records = super::runtime()?.block_on(async {
        let mut records = Vec::with_capacity(fixable.len());
        for issue in &fixable {
            if cancel.is_cancelled() {
                break;
            }
            records.push(dispatcher.apply(issue, &cancel).await);
        }
        records
    });

    println!("{}", "Repairs:".white().bold());
    for record in &records {
        print_repair(record);
        if let Err(e) = backend.append_repair(record) {
            log::warn!("Could not store repair record: {}", e);
        }
    }
    Ok(())
}
