// Core business logic module

pub mod cleaner;
pub mod config;
pub mod diagnostics;
pub mod orchestrator;
pub mod repair;
pub mod scheduler;
pub mod storage;
pub mod system_monitor;

// Re-export commonly used items
pub use cleaner::{CleanupStats, TempCleaner};
pub use config::Config;
pub use diagnostics::{DiagnosticEngine, Issue, IssueKind};
pub use orchestrator::{HealthMonitor, MonitorHandle};
pub use repair::{RepairDispatcher, RepairRecord};
pub use scheduler::{MaintenanceTask, TaskScheduler};
pub use storage::StateBackend;
