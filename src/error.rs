use std::io;
use thiserror::Error;

/// Exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code for an invalid configuration.
pub const EXIT_CONFIG: i32 = 64;
/// Exit code when the platform lacks a capability on the critical path.
pub const EXIT_UNAVAILABLE: i32 = 69;
/// Exit code for an unrecoverable internal error.
pub const EXIT_SOFTWARE: i32 = 70;

/// Custom error type for the health monitor
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Probe failure: {0}")]
    Probe(#[from] ProbeError),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sample at {incoming} is older than the latest stored sample ({latest})")]
    OutOfOrderSample { latest: String, incoming: String },

    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Invalid task transition: {0}")]
    InvalidTransition(String),

    #[error("Capability missing: {0}")]
    CapabilityMissing(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for the health monitor
pub type Result<T> = std::result::Result<T, HealthError>;

/// Core sample could not be obtained (CPU or memory unreadable).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ProbeError {
    pub reason: String,
}

impl ProbeError {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl HealthError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        HealthError::Config(msg.into())
    }

    pub fn probe<S: Into<String>>(reason: S) -> Self {
        HealthError::Probe(ProbeError::new(reason))
    }

    pub fn invalid_transition<S: Into<String>>(msg: S) -> Self {
        HealthError::InvalidTransition(msg.into())
    }

    pub fn capability_missing<S: Into<String>>(msg: S) -> Self {
        HealthError::CapabilityMissing(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        HealthError::Other(msg.into())
    }

    /// Process exit code for this error when surfaced by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            HealthError::Config(_) => EXIT_CONFIG,
            HealthError::CapabilityMissing(_) => EXIT_UNAVAILABLE,
            _ => EXIT_SOFTWARE,
        }
    }
}
