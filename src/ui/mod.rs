// UI and formatting module

pub mod formatters;
pub mod prompts;

// Re-export commonly used items for cleaner imports
pub use formatters::{
    color_percent, format_size, format_time, format_uptime, health_label, print_alert, print_issue,
    print_prediction, print_repair, print_report, print_sample, print_snapshot, print_tasks,
    severity_label,
};
pub use prompts::{confirm, dimmed, info, success, warn};
