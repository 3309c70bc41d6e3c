//! Build automation tasks for billsync
//!
//! Currently generates the CLI reference from the clap definitions.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for billsync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<billsync_ingest::Cli>();

    let content = format!(
        r#"# billsync CLI Reference

Generated from the CLI source code on {}.

## Overview

`billsync` pulls new survey and bill records from the billing portal,
validates bills against the surveys already stored, and upserts both into
PostgreSQL in batches. Each collection keeps a cursor in a local JSON ledger
so the next run only pulls what is new.

## Quick Start

```bash
# Sync every target in jobs.toml
billsync sync --targets jobs.toml

# Escalate unresolved parent references to orphans
billsync sync --targets jobs.toml --strict

# Inspect cursors, then force one collection to start over
billsync status
billsync reset --target khushab-bills
```

## Commands

{}

## Environment Variables

- `PORTAL_BASE_HOST`, `PORTAL_CNIC`, `PORTAL_PASSWORD`, `PORTAL_USER_TYPE` - portal access
- `PORTAL_PAGE_SIZE`, `PORTAL_PEEK_SIZE`, `PORTAL_PAGE_DELAY_MS`, `PORTAL_TIMEOUT_SECS` - listing requests
- `FETCH_MAX_ATTEMPTS`, `FETCH_RETRY_DELAY_MS` - page retries
- `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` - authoritative store
- `UPLOAD_BATCH_SIZE`, `UPLOAD_MAX_ATTEMPTS`, `UPLOAD_RETRY_BASE_DELAY_MS`, `WHITELIST_PAGE_SIZE` - uploads
- `LEDGER_PATH`, `ORPHAN_LOG_PATH`, `PENDING_LOG_PATH` - local files
- `VALIDATION_POLICY` (`lenient` or `strict`), `SYNC_PARALLELISM`
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILTER` - logging

## Targets File

```toml
[[targets]]
name = "sargodha-surveys"
kind = "surveys"
filters = {{ district_id = "32", tehsil_id = "143" }}

[[targets]]
name = "khushab-paid-bills"
kind = "bills"
designation_id = 160449
month = "Jan-2025"
filters = {{ status = "PAID", division_id = "9" }}
```

---

*This documentation is automatically generated from the CLI source code. To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());
    Ok(())
}
