//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod reset;
pub mod status;
pub mod sync;

use crate::config::DEFAULT_LEDGER_PATH;
use std::path::PathBuf;

/// Ledger path from the flag, else the environment default
pub(crate) fn ledger_path(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH))
}
