// Platform-specific code module

pub mod commands;
pub mod elevation;
pub mod process;
pub mod sensors;
pub mod temp_dirs;

pub use commands::{
    run_sequence, run_with_deadline, CommandOutcome, CommandStatus, DEFAULT_COMMAND_DEADLINE,
    NETWORK_RESET_DEADLINE,
};
pub use elevation::{is_elevated, require_elevated};
pub use temp_dirs::{get_browser_cache_directories, get_default_temp_directories, get_log_directories};
