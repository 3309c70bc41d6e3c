//! Billsync CLI - Main entry point

use billsync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use billsync_ingest::commands::{self, sync::SyncArgs};
use billsync_ingest::{Cli, Commands};
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // .env may carry LOG_* settings as well as portal credentials
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("billsync")
        .build();

    // Environment variables take precedence over flags
    let log_config = log_config.with_env_overrides().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring invalid LOG_* settings: {e}");
        LogConfig::default()
    });

    // Dropped when main returns, which flushes buffered file output
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        },
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current page or batch");
            on_interrupt.cancel();
        }
    });

    let code = match execute_command(cli, cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            1
        },
    };
    ExitCode::from(code)
}

/// Execute the CLI command, returning the process exit code
async fn execute_command(cli: Cli, cancel: CancellationToken) -> anyhow::Result<u8> {
    match cli.command {
        Commands::Sync {
            targets,
            strict,
            only,
            max_records,
        } => {
            let args = SyncArgs {
                targets,
                strict,
                only,
                max_records,
            };
            let summary = commands::sync::run(args, cancel).await?;
            Ok(summary.exit_code())
        },

        Commands::Status { ledger } => commands::status::run(ledger).map(|_| 0),

        Commands::Reset { target, ledger } => commands::reset::run(&target, ledger).map(|_| 0),
    }
}
