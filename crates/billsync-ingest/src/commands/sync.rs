//! `billsync sync` command implementation

use crate::config::{SyncConfig, TargetsFile};
use crate::ledger::JsonLedger;
use crate::normalize::Normalizer;
use crate::pipeline::{CollectionSummary, Pipeline, PipelineSettings, RunSummary};
use crate::portal::PortalClient;
use crate::progress::ProgressObserver;
use crate::upload::PgRecordStore;
use crate::validate::ValidationPolicy;
use anyhow::{bail, Context};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Arguments of `billsync sync`
#[derive(Debug, Clone)]
pub struct SyncArgs {
    pub targets: PathBuf,
    pub strict: bool,
    pub only: Option<String>,
    pub max_records: Option<usize>,
}

/// Run one sync over every configured target
///
/// Login happens before anything else; a failed login ends the run with no
/// fetch or write attempted.
pub async fn run(args: SyncArgs, cancel: CancellationToken) -> anyhow::Result<RunSummary> {
    let mut config = SyncConfig::load().context("Failed to load configuration")?;
    if args.strict {
        config.policy = ValidationPolicy::Strict;
    }

    let mut targets = TargetsFile::load(&args.targets)?;
    if let Some(name) = &args.only {
        targets = targets.only(name)?;
    }
    if targets.targets.is_empty() {
        bail!("{} lists no targets", args.targets.display());
    }
    if !config.portal.has_credentials() {
        bail!("PORTAL_CNIC and PORTAL_PASSWORD must be set");
    }
    if config.database_url.is_empty() {
        bail!("DATABASE_URL must be set");
    }

    let session = PortalClient::new(config.portal.clone())
        .context("Failed to build portal client")?
        .login()
        .await
        .context("Portal login failed")?;

    let store = PgRecordStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;

    let ledger = JsonLedger::open(&config.ledger_path)
        .with_context(|| format!("Failed to open ledger {}", config.ledger_path.display()))?;
    let normalizer = Normalizer::new(&config.portal.base_host)?;

    let mut settings = PipelineSettings::from_config(&config);
    settings.max_records = args.max_records;

    info!(
        targets = targets.targets.len(),
        policy = %config.policy,
        ledger = %config.ledger_path.display(),
        "Configuration loaded"
    );

    let observer = ProgressObserver::new();
    let pipeline = Pipeline::new(&session, &store, &ledger, normalizer, settings)
        .with_observer(&observer)
        .with_cancellation(cancel);
    let summary = pipeline.run(&targets.targets).await;

    print_summary(&summary);
    Ok(summary)
}

fn cursor_cell(summary: &CollectionSummary) -> Cell {
    let before = summary.cursor_before.latest_known_id;
    let after = summary.cursor_after.latest_known_id;
    if summary.cursor_advanced() {
        Cell::new(format!("{before} -> {after}"))
    } else {
        Cell::new(before.to_string())
    }
}

pub fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Collection",
        "Mode",
        "Fetched",
        "Written",
        "Pending",
        "Orphaned",
        "Failed",
        "Cursor",
    ]);

    for c in &summary.collections {
        table.add_row(vec![
            Cell::new(&c.name),
            Cell::new(c.mode.map(|m| m.as_str()).unwrap_or("-")),
            Cell::new(c.fetched),
            Cell::new(c.succeeded),
            Cell::new(c.pending),
            Cell::new(c.orphaned),
            Cell::new(c.failed_records),
            cursor_cell(c),
        ]);
    }

    println!("{}", "Sync Summary:".cyan().bold());
    println!("{table}");

    for c in summary.collections.iter().filter(|c| c.error.is_some()) {
        println!("{} {}: {}", "error".red().bold(), c.name, c.error.as_deref().unwrap_or_default());
    }
    let totals = format!(
        "{} written, {} pending, {} orphaned, {} failed",
        summary.succeeded(),
        summary.pending(),
        summary.orphaned(),
        summary.failed_records()
    );
    if summary.has_failures() {
        println!("{}", totals.yellow());
    } else {
        println!("{}", totals.green());
    }
}
