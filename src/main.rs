use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use colored::*;

use healthmon::commands;
use healthmon::error::{HealthError, EXIT_OK, EXIT_SOFTWARE};

fn cli() -> Command {
    Command::new("healthmon")
        .version(env!("CARGO_PKG_VERSION"))
        .about("PC health monitor: sampling, alerts, diagnostics, repairs and maintenance scheduling")
        .arg(
            Arg::new("store")
                .long("store")
                .global(true)
                .value_name("BACKEND")
                .help("State backend")
                .value_parser(["sqlite", "json"])
                .default_value("sqlite")
        )
        .subcommand(
            Command::new("run")
                .about("Run the monitor in the foreground until Ctrl-C")
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECS")
                        .help("Probe interval in seconds (overrides monitor.probe_interval_secs)")
                        .value_parser(clap::value_parser!(u64).range(1..))
                )
                .arg(
                    Arg::new("auto-repair")
                        .long("auto-repair")
                        .help("Apply fixes for auto-fixable issues found by periodic diagnosis")
                        .action(clap::ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("probe")
                .about("Take one sample and print it")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the sample as JSON")
                        .action(clap::ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("health")
                .about("Show the health index and trend predictions")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the report as JSON")
                        .action(clap::ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("diagnose")
                .about("Detect issues and optionally repair them")
                .arg(
                    Arg::new("fix")
                        .long("fix")
                        .help("Apply repairs for auto-fixable issues")
                        .action(clap::ArgAction::SetTrue)
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .help("Do not ask for confirmation before repairing")
                        .action(clap::ArgAction::SetTrue)
                        .requires("fix")
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print issues as JSON")
                        .action(clap::ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("tasks")
                .about("Manage scheduled maintenance tasks (use 'healthmon tasks --help' for subcommands)")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("list")
                        .about("List pending tasks")
                        .arg(
                            Arg::new("all")
                                .short('a')
                                .long("all")
                                .help("Include completed and skipped tasks")
                                .action(clap::ArgAction::SetTrue)
                        )
                )
                .subcommand(
                    Command::new("regenerate")
                        .about("Rebuild the auto-generated schedule for the next 7 days")
                )
                .subcommand(
                    Command::new("complete")
                        .about("Mark a pending task completed")
                        .arg(task_id_arg())
                )
                .subcommand(
                    Command::new("postpone")
                        .about("Move a pending task later")
                        .arg(task_id_arg())
                        .arg(
                            Arg::new("hours")
                                .long("hours")
                                .value_name("N")
                                .help("Hours to postpone by (default: 24)")
                                .value_parser(clap::value_parser!(i64).range(1..))
                        )
                )
                .subcommand(
                    Command::new("add")
                        .about("Add a user task")
                        .arg(
                            Arg::new("title")
                                .help("Task title")
                                .required(true)
                                .index(1)
                        )
                        .arg(
                            Arg::new("at")
                                .long("at")
                                .value_name("WHEN")
                                .help("Local time as \"YYYY-MM-DD HH:MM\"")
                                .required(true)
                        )
                        .arg(
                            Arg::new("category")
                                .long("category")
                                .help("cleanup, optimization, updates, backup, security, disk_health or custom")
                        )
                        .arg(
                            Arg::new("priority")
                                .long("priority")
                                .help("low, medium or high")
                        )
                        .arg(
                            Arg::new("description")
                                .long("description")
                                .help("Free-form description")
                        )
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete a task")
                        .arg(task_id_arg())
                )
                .subcommand(
                    Command::new("errors")
                        .about("Show recorded task failures")
                        .arg(
                            Arg::new("id")
                                .help("Only show errors for this task")
                                .value_parser(clap::value_parser!(i64))
                                .index(1)
                        )
                )
        )
        .subcommand(
            Command::new("config")
                .about("Show or change configuration (use 'healthmon config --help' for subcommands)")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("show")
                        .about("Print the effective configuration")
                        .arg(
                            Arg::new("json")
                                .long("json")
                                .help("Print as JSON")
                                .action(clap::ArgAction::SetTrue)
                        )
                )
                .subcommand(
                    Command::new("set")
                        .about("Set a value, e.g. 'healthmon config set thresholds.cpu_warning 75'")
                        .arg(
                            Arg::new("key")
                                .help("Dotted key: section.field")
                                .required(true)
                                .index(1)
                        )
                        .arg(
                            Arg::new("value")
                                .help("New value")
                                .required(true)
                                .index(2)
                        )
                )
        )
}

fn task_id_arg() -> Arg {
    Arg::new("id")
        .help("Task id")
        .required(true)
        .value_parser(clap::value_parser!(i64))
        .index(1)
}

fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("run", sub_matches)) => commands::run::execute(sub_matches, matches),
        Some(("probe", sub_matches)) => commands::probe::execute(sub_matches),
        Some(("health", sub_matches)) => commands::health::execute(sub_matches, matches),
        Some(("diagnose", sub_matches)) => commands::diagnose::execute(sub_matches, matches),
        Some(("tasks", sub_matches)) => commands::tasks::execute(sub_matches, matches),
        Some(("config", sub_matches)) => commands::config::execute(sub_matches, matches),
        _ => {
            println!("Welcome to healthmon!");
            println!("Use 'healthmon --help' for more information.");
            Ok(())
        }
    }
}

fn main() {
    healthmon::init_logging();

    let matches = cli().get_matches();
    let code = match dispatch(&matches) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            e.downcast_ref::<HealthError>()
                .map(HealthError::exit_code)
                .unwrap_or(EXIT_SOFTWARE)
        }
    };
    std::process::exit(code);
}
