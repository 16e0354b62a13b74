use chrono::{DateTime, Local, Utc};
use colored::*;
use humansize::{format_size as human_format_size, BINARY};

use crate::core::diagnostics::Issue;
use crate::core::orchestrator::HealthSnapshot;
use crate::core::repair::RepairRecord;
use crate::core::scheduler::{MaintenanceTask, TaskStatus};
use crate::core::system_monitor::{Alert, MetricSample, Prediction, Severity, TrendReport};

/// Format a byte count in binary units (KiB, MiB, GiB)
pub fn format_size(size: u64) -> String {
    human_format_size(size, BINARY)
}

/// Format a UTC timestamp in local time (YYYY-MM-DD HH:MM:SS)
pub fn format_time(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a duration in seconds as "3d 4h 12m"
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Color a percentage green/yellow/red against warning and critical levels.
pub fn color_percent(value: f32, warning: f32, critical: f32) -> ColoredString {
    let text = format!("{:.1}%", value);
    if value >= critical {
        text.red().bold()
    } else if value >= warning {
        text.yellow()
    } else {
        text.green()
    }
}

pub fn severity_label(severity: Severity) -> ColoredString {
    let label = severity.to_string().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::Warning => label.yellow().bold(),
        Severity::Info => label.cyan(),
    }
}

pub fn health_label(score: u8) -> ColoredString {
    let text = format!("{}/100", score);
    match score {
        80..=100 => text.green().bold(),
        50..=79 => text.yellow().bold(),
        _ => text.red().bold(),
    }
}

fn print_section_header(title: &str) {
    println!("\n{}", title.bold().green());
    println!("{}", "-".repeat(title.len()));
}

fn or_absent(value: Option<String>) -> String {
    value.unwrap_or_else(|| "n/a".dimmed().to_string())
}

pub fn print_sample(sample: &MetricSample) {
    println!("\n{}", "SYSTEM SAMPLE".bold().bright_cyan());
    println!("{}", "=".repeat(60));
    println!("  Taken at: {}", format_time(sample.timestamp));

    print_section_header("CPU");
    println!("  Usage: {}", color_percent(sample.cpu_percent, 70.0, 90.0));
    let temp = sample.cpu_temp_c.map(|r| {
        let marker = if r.synthesized { " (estimated)".dimmed().to_string() } else { String::new() };
        format!("{:.1}°C{}", r.value, marker)
    });
    println!("  Temperature: {}", or_absent(temp));
    let fan = sample.fan_rpm.map(|r| {
        let marker = if r.synthesized { " (estimated)".dimmed().to_string() } else { String::new() };
        format!("{} RPM{}", r.value, marker)
    });
    println!("  Fan: {}", or_absent(fan));

    print_section_header("Memory");
    println!(
        "  Usage: {} ({} / {})",
        color_percent(sample.ram_percent, 85.0, 95.0),
        format_size(sample.ram_used_bytes),
        format_size(sample.ram_total_bytes)
    );

    print_section_header("Storage");
    let disk = sample.disk_percent.map(|p| color_percent(p, 85.0, 95.0).to_string());
    println!("  System partition: {}", or_absent(disk));
    if let Some(free) = sample.disk_free_bytes {
        println!("  Free: {}", format_size(free));
    }
    for partition in &sample.per_partition {
        println!(
            "    {:<20} {:>8} free of {:>10} ({:.1}% used)",
            partition.mount_point,
            format_size(partition.free_bytes),
            format_size(partition.total_bytes),
            partition.usage_percent
        );
    }

    print_section_header("System");
    println!("  Uptime: {}", or_absent(sample.uptime_seconds.map(format_uptime)));
    println!("  Processes: {}", or_absent(sample.process_count.map(|c| c.to_string())));
    if let (Some(sent), Some(recv)) = (sample.net_bytes_sent, sample.net_bytes_recv) {
        println!("  Network: {} sent, {} received", format_size(sent), format_size(recv));
    }
    if let Some(battery) = sample.battery_percent {
        let plugged = match sample.battery_plugged {
            Some(true) => " (plugged in)",
            Some(false) => " (on battery)",
            None => "",
        };
        println!("  Battery: {:.0}%{}", battery, plugged);
    }
    println!();
}

pub fn print_prediction(prediction: &Prediction) {
    let horizon = prediction
        .estimated_horizon
        .map(|h| format!(" within {}", format_uptime(h.as_secs())))
        .unwrap_or_default();
    println!(
        "  {} {} ({:.0}%{}): {}",
        "→".cyan(),
        prediction.kind.as_str().bold(),
        prediction.probability * 100.0,
        horizon,
        prediction.rationale
    );
}

pub fn print_report(report: &TrendReport) {
    println!("\n{}", "HEALTH REPORT".bold().bright_cyan());
    println!("{}", "=".repeat(60));
    println!("  Health index: {}", health_label(report.health_index));
    let b = &report.breakdown;
    println!(
        "  {}",
        format!(
            "Penalties: cpu {:.0}, ram {:.0}, disk {:.0}, temperature {:.0}",
            b.cpu_penalty, b.ram_penalty, b.disk_penalty, b.temp_penalty
        )
        .dimmed()
    );
    println!("  Samples analysed: {}", report.sample_count);
    if let Some(d) = &report.deltas {
        println!("  CPU trend: {:+.1} pts", d.cpu);
        println!("  RAM trend: {:+.1} pts", d.ram);
    }
    if let Some(t) = report.mean_temperature {
        println!("  Mean temperature: {:.1}°C", t);
    }

    print_section_header("Predictions");
    for prediction in &report.predictions {
        print_prediction(prediction);
    }
    println!();
}

pub fn print_snapshot(snapshot: &HealthSnapshot) {
    if let Some(report) = &snapshot.report {
        print_report(report);
    } else if let Some(score) = snapshot.health_index {
        println!("  Health index: {}", health_label(score));
    }
    if snapshot.probe_failures > 0 {
        println!("  {}", format!("Probe failing ({} in a row)", snapshot.probe_failures).red());
    }
    if snapshot.storage_degraded {
        println!("  {}", "Storage degraded: writes are queued in memory".yellow());
    }
    println!("  Pending tasks: {}", snapshot.pending_tasks);
}

pub fn print_alert(alert: &Alert) {
    println!(
        "[{}] {} {}",
        severity_label(alert.severity),
        format_time(alert.timestamp).dimmed(),
        alert.message
    );
}

pub fn print_issue(issue: &Issue) {
    let fix = if issue.auto_fixable { "auto-fix".green() } else { "manual".yellow() };
    println!(
        "  [{}] {} ({}) {}",
        severity_label(issue.severity),
        issue.description,
        issue.kind.as_str().dimmed(),
        fix
    );
}

pub fn print_repair(record: &RepairRecord) {
    let status = if record.success {
        "OK".green().bold()
    } else {
        record.reason().unwrap_or("failed").red().bold()
    };
    println!(
        "  [{}] {} via {}: {}",
        status,
        record.subject.label(),
        record.action.cyan(),
        record.message
    );
    if record.bytes_freed > 0 {
        println!("      {} freed", format_size(record.bytes_freed));
    }
}

pub fn print_tasks(tasks: &[MaintenanceTask]) {
    if tasks.is_empty() {
        println!("{}", "No scheduled tasks.".yellow());
        return;
    }
    println!(
        "{}",
        format!(
            "{:>5}  {:<17}  {:<10}  {:<8}  {:<13}  {}",
            "ID", "WHEN", "STATUS", "PRIORITY", "CATEGORY", "TITLE"
        )
        .bold()
    );
    for task in tasks {
        let status = match task.status {
            TaskStatus::Pending => task.status.as_str().cyan(),
            TaskStatus::Completed => task.status.as_str().green(),
            TaskStatus::Skipped => task.status.as_str().red(),
        };
        let origin = if task.auto_generated { "" } else { " (user)" };
        println!(
            "{:>5}  {:<17}  {:<10}  {:<8}  {:<13}  {}{}",
            task.id,
            task.scheduled_at.format("%Y-%m-%d %H:%M").to_string(),
            status,
            task.priority.as_str(),
            task.category.as_str(),
            task.title,
            origin.dimmed()
        );
    }
}
