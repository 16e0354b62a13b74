// healthmon library - public API

// Re-export error types
pub mod error;
pub use error::{HealthError, Result};

// Module declarations
pub mod commands;
pub mod core;
pub mod platform;
pub mod ui;

// Re-export commonly used types
pub use core::config::Config;
pub use core::orchestrator::{HealthMonitor, MonitorHandle, MonitorOptions};

// Initialize logging: Info by default, RUST_LOG overrides
pub fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
