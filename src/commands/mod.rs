// Command handlers module
pub mod config;
pub mod diagnose;
pub mod health;
pub mod probe;
pub mod run;
pub mod tasks;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ArgMatches;

use crate::core::storage::{self, BackendKind, StateBackend};

/// Multi-threaded runtime for the async commands.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("healthmon-worker")
        .build()
        .context("Failed to start async runtime")
}

/// Backend selected by the global `--store` flag.
pub(crate) fn open_backend(matches: &ArgMatches) -> Result<Arc<dyn StateBackend>> {
    let kind = match matches.get_one::<String>("store").map(String::as_str) {
        Some("json") => BackendKind::JsonFile,
        _ => BackendKind::Sqlite,
    };
    Ok(storage::open_default(kind)?)
}
