//! Billsync ingestion library
//!
//! Incremental sync of the billing portal into the authoritative store:
//!
//! - **Fetch**: page through portal listings newest-first ([`sync`], [`portal`])
//! - **Resolve**: decide per collection whether to pull everything, nothing,
//!   or only what is newer than the ledger cursor ([`sync::resolver`])
//! - **Normalize**: flatten raw items into canonical records ([`normalize`])
//! - **Validate**: classify children against the parent whitelist ([`validate`])
//! - **Upload**: retried batch upserts with per-batch progress ([`upload`])
//!
//! [`pipeline::Pipeline`] ties the steps together; the `billsync` binary
//! drives it from the command line.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod collection;
pub mod commands;
pub mod config;
pub mod error;
pub mod ledger;
pub mod normalize;
pub mod pipeline;
pub mod portal;
pub mod progress;
pub mod retry;
pub mod sync;
pub mod upload;
pub mod validate;

pub use error::{IngestError, PortalError, Result};
pub use pipeline::{Pipeline, PipelineSettings, RunSummary};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Billsync - incremental billing portal sync
#[derive(Parser, Debug)]
#[command(name = "billsync")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull new records from the portal and upload them
    Sync {
        /// TOML file listing the collections to sync
        #[arg(short, long, default_value = "jobs.toml")]
        targets: PathBuf,

        /// Treat unresolved parent references as orphans instead of pending
        #[arg(long)]
        strict: bool,

        /// Sync only the named target
        #[arg(long)]
        only: Option<String>,

        /// Stop each collection after this many records
        #[arg(long)]
        max_records: Option<usize>,
    },

    /// Show the cursor of every collection in the ledger
    Status {
        /// Ledger file (defaults to LEDGER_PATH)
        #[arg(short, long, env = "LEDGER_PATH")]
        ledger: Option<PathBuf>,
    },

    /// Forget a collection's cursor so the next sync pulls it from scratch
    Reset {
        /// Target name
        #[arg(short, long)]
        target: String,

        /// Ledger file (defaults to LEDGER_PATH)
        #[arg(short, long, env = "LEDGER_PATH")]
        ledger: Option<PathBuf>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::parse_from([
            "billsync",
            "sync",
            "--targets",
            "jobs.toml",
            "--strict",
            "--only",
            "khushab-bills",
            "--max-records",
            "500",
        ]);
        match cli.command {
            Commands::Sync {
                targets,
                strict,
                only,
                max_records,
            } => {
                assert_eq!(targets, PathBuf::from("jobs.toml"));
                assert!(strict);
                assert_eq!(only.as_deref(), Some("khushab-bills"));
                assert_eq!(max_records, Some(500));
            },
            other => panic!("unexpected command {other:?}"),
        }
    }
}
