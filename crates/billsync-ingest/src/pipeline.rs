//! Sync pipeline
//!
//! One run walks the configured targets in two phases:
//!
//! 1. Survey collections are pulled, normalized and upserted
//! 2. The parent whitelist is rebuilt from the store, then bill collections
//!    are pulled, classified against it and upserted
//!
//! A collection's cursor is committed only after its records were written,
//! and only as far as the lowest record that was not.

use crate::collection::{profile, CollectionProfile};
use crate::config::{SyncConfig, Target};
use crate::error::{IngestError, Result};
use crate::ledger::Ledger;
use crate::normalize::{NormalizedRecord, Normalizer};
use crate::portal::ListingSource;
use crate::retry::RetryPolicy;
use crate::sync::{PullResult, StopReason, SyncMode, SyncResolver};
use crate::upload::{ClassificationLog, NoopObserver, RecordStore, UploadEngine, UploadObserver, UploadReport};
use crate::validate::{build_whitelist, classify, ValidationPolicy, Whitelist};
use billsync_common::types::{CollectionKind, SyncCursor};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Knobs the pipeline needs, detached from where they were read
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub page_size: u32,
    pub peek_size: u32,
    pub page_delay: Duration,
    pub fetch_retry: RetryPolicy,
    pub batch_size: usize,
    pub upload_retry: RetryPolicy,
    pub whitelist_page_size: i64,
    pub policy: ValidationPolicy,
    pub parallelism: usize,
    pub max_records: Option<usize>,
    pub orphan_log_path: PathBuf,
    pub pending_log_path: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            page_size: config.portal.page_size,
            peek_size: config.portal.peek_size,
            page_delay: config.portal.page_delay(),
            fetch_retry: config.portal.fetch_retry_policy(),
            batch_size: config.upload.batch_size,
            upload_retry: config.upload.retry_policy(),
            whitelist_page_size: config.upload.whitelist_page_size,
            policy: config.policy,
            parallelism: config.parallelism,
            max_records: None,
            orphan_log_path: config.orphan_log_path.clone(),
            pending_log_path: config.pending_log_path.clone(),
        }
    }
}

/// Outcome of one collection in one run
#[derive(Debug, Clone)]
pub struct CollectionSummary {
    pub name: String,
    pub kind: CollectionKind,
    pub mode: Option<SyncMode>,
    pub stop: Option<StopReason>,
    pub pages_requested: u32,
    pub fetched: usize,
    /// Dropped by the target's month filter
    pub filtered_out: usize,
    pub succeeded: usize,
    pub pending: usize,
    pub orphaned: usize,
    pub failed_batches: usize,
    pub failed_records: usize,
    pub ordering_violations: usize,
    pub cursor_before: SyncCursor,
    pub cursor_after: SyncCursor,
    pub error: Option<String>,
}

impl CollectionSummary {
    fn new(target: &Target, cursor: SyncCursor) -> Self {
        Self {
            name: target.name.clone(),
            kind: target.kind,
            mode: None,
            stop: None,
            pages_requested: 0,
            fetched: 0,
            filtered_out: 0,
            succeeded: 0,
            pending: 0,
            orphaned: 0,
            failed_batches: 0,
            failed_records: 0,
            ordering_violations: 0,
            cursor_before: cursor,
            cursor_after: cursor,
            error: None,
        }
    }

    fn failed(target: &Target, cursor: SyncCursor, error: impl ToString) -> Self {
        let mut summary = Self::new(target, cursor);
        summary.error = Some(error.to_string());
        summary
    }

    pub fn cursor_advanced(&self) -> bool {
        self.cursor_after != self.cursor_before
    }

    pub fn log(&self) {
        let mode = self.mode.map(|m| m.as_str()).unwrap_or("skipped");
        match &self.error {
            Some(e) => error!(collection = %self.name, mode, error = %e, "Collection failed"),
            None => info!(
                collection = %self.name,
                mode,
                pages = self.pages_requested,
                fetched = self.fetched,
                succeeded = self.succeeded,
                pending = self.pending,
                orphaned = self.orphaned,
                failed_batches = self.failed_batches,
                cursor_before = self.cursor_before.latest_known_id,
                cursor_after = self.cursor_after.latest_known_id,
                ordering_violations = self.ordering_violations,
                "Collection summary"
            ),
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub collections: Vec<CollectionSummary>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.collections.iter().map(|c| c.succeeded).sum()
    }

    pub fn pending(&self) -> usize {
        self.collections.iter().map(|c| c.pending).sum()
    }

    pub fn orphaned(&self) -> usize {
        self.collections.iter().map(|c| c.orphaned).sum()
    }

    pub fn failed_records(&self) -> usize {
        self.collections.iter().map(|c| c.failed_records).sum()
    }

    pub fn errors(&self) -> usize {
        self.collections.iter().filter(|c| c.error.is_some()).count()
    }

    /// Anything short of a clean run: errors or failed batches
    pub fn has_failures(&self) -> bool {
        self.errors() > 0 || self.collections.iter().any(|c| c.failed_batches > 0)
    }

    /// Process exit code: 0 clean, 2 when anything failed or was skipped
    pub fn exit_code(&self) -> u8 {
        if self.has_failures() {
            2
        } else {
            0
        }
    }

    pub fn get(&self, name: &str) -> Option<&CollectionSummary> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn log(&self) {
        for collection in &self.collections {
            collection.log();
        }
        info!(
            run_id = %self.run_id,
            collections = self.collections.len(),
            fetched = self.collections.iter().map(|c| c.fetched).sum::<usize>(),
            succeeded = self.succeeded(),
            pending = self.pending(),
            orphaned = self.orphaned(),
            failed_records = self.failed_records(),
            errors = self.errors(),
            "Run summary"
        );
    }
}

/// Cursor to commit after a collection was uploaded, or `None` to keep it
///
/// Records below the lowest unwritten or pending id must be seen again next
/// run, so the cursor stops just short of them.
pub fn next_cursor(
    before: SyncCursor,
    pull: &PullResult,
    report: &UploadReport,
    lowest_pending_id: Option<i64>,
) -> Option<SyncCursor> {
    if !pull.is_complete() || report.is_total_failure() {
        return None;
    }

    let hold = [report.lowest_unwritten_id, lowest_pending_id]
        .into_iter()
        .flatten()
        .min();
    let reached = match hold {
        Some(id) => id - 1,
        None => pull.max_seen_id.unwrap_or(before.latest_known_id),
    };

    Some(SyncCursor::new(
        before.latest_known_id.max(reached),
        before.local_record_count + report.succeeded as u64,
    ))
}

fn keep_month(record: &NormalizedRecord, month: &str) -> bool {
    record
        .text("bill_month")
        .is_some_and(|m| m.trim().eq_ignore_ascii_case(month.trim()))
}

pub struct Pipeline<'a> {
    source: &'a dyn ListingSource,
    store: &'a dyn RecordStore,
    ledger: &'a dyn Ledger,
    normalizer: Normalizer,
    settings: PipelineSettings,
    observer: &'a dyn UploadObserver,
    cancel: CancellationToken,
    run_id: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn ListingSource,
        store: &'a dyn RecordStore,
        ledger: &'a dyn Ledger,
        normalizer: Normalizer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            ledger,
            normalizer,
            settings,
            observer: &NoopObserver,
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn UploadObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Synchronize every target: surveys first, then bills
    pub async fn run(&self, targets: &[Target]) -> RunSummary {
        info!(run_id = %self.run_id, targets = targets.len(), policy = %self.settings.policy, "Starting sync run");

        let (surveys, bills): (Vec<&Target>, Vec<&Target>) =
            targets.iter().partition(|t| t.kind == CollectionKind::Surveys);

        // 1. Parents first so this run's new surveys count as resolvable
        let mut collections = self.run_phase(&surveys, None).await;

        // 2. Whitelist is rebuilt in full, then children are classified against it
        if !bills.is_empty() {
            match self.whitelist().await {
                Ok(whitelist) => collections.extend(self.run_phase(&bills, Some(&whitelist)).await),
                Err(e) => {
                    error!(error = %e, "Whitelist unavailable, skipping bill collections");
                    collections.extend(bills.iter().map(|t| {
                        let cursor = self.ledger.cursor(&t.name).unwrap_or_default();
                        CollectionSummary::failed(t, cursor, format!("whitelist unavailable: {e}"))
                    }));
                },
            }
        }

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            collections,
        };
        summary.log();
        summary
    }

    async fn whitelist(&self) -> Result<Whitelist> {
        let parent = profile(CollectionKind::Bills)
            .parent
            .as_ref()
            .ok_or_else(|| IngestError::Config("bills have no parent reference".into()))?;
        build_whitelist(
            self.store,
            parent,
            self.settings.whitelist_page_size,
            &self.settings.upload_retry,
        )
        .await
    }

    /// Targets sharing a session's active designation cannot overlap
    async fn run_phase(&self, targets: &[&Target], whitelist: Option<&Whitelist>) -> Vec<CollectionSummary> {
        let switches_designation = targets.iter().any(|t| t.designation_id.is_some());
        let parallelism = if switches_designation {
            1
        } else {
            self.settings.parallelism.max(1)
        };

        stream::iter(targets.iter().copied())
            .map(|target| self.sync_target(target, whitelist))
            .buffered(parallelism)
            .collect()
            .await
    }

    async fn sync_target(&self, target: &Target, whitelist: Option<&Whitelist>) -> CollectionSummary {
        let cursor = match self.ledger.cursor(&target.name) {
            Ok(cursor) => cursor,
            Err(e) => {
                error!(collection = %target.name, error = %e, "Cursor unreadable, collection skipped");
                return CollectionSummary::failed(target, SyncCursor::default(), e);
            },
        };

        match self.try_sync_target(target, cursor, whitelist).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(collection = %target.name, error = %e, "Collection skipped");
                CollectionSummary::failed(target, cursor, e)
            },
        }
    }

    async fn try_sync_target(
        &self,
        target: &Target,
        cursor: SyncCursor,
        whitelist: Option<&Whitelist>,
    ) -> Result<CollectionSummary> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let mut summary = CollectionSummary::new(target, cursor);
        let profile: &'static CollectionProfile = profile(target.kind);

        if let Some(designation_id) = target.designation_id {
            self.source.switch_designation(designation_id).await?;
        }

        // 1. Pull what is new since the cursor
        let filters = target.filter_strings();
        let resolver = SyncResolver::new(self.source, self.settings.fetch_retry.clone(), self.settings.page_size)
            .with_peek_size(self.settings.peek_size)
            .with_page_delay(self.settings.page_delay)
            .with_max_records(self.settings.max_records)
            .with_cancellation(self.cancel.clone());
        let pull = resolver.sync(&target.name, profile, &filters, &cursor).await?;

        summary.mode = Some(pull.mode);
        summary.stop = Some(pull.stop);
        summary.pages_requested = pull.pages_requested;
        summary.fetched = pull.records.len();
        summary.ordering_violations = pull.ordering_violations;

        if pull.mode == SyncMode::UpToDate {
            info!(collection = %target.name, latest_known_id = cursor.latest_known_id, "Already up to date");
            return Ok(summary);
        }
        if let StopReason::FetchFailed { page } = pull.stop {
            warn!(collection = %target.name, page, "Pull cut short, cursor will not advance");
        }

        // 2. Normalize and apply the target's month filter
        let mut records = self.normalizer.normalize_all(target.kind, &pull.records, &target.labels);
        if let Some(month) = &target.month {
            let before = records.len();
            records.retain(|r| keep_month(r, month));
            summary.filtered_out = before - records.len();
        }

        // 3. Classify; held-back records are logged before anything is written
        let empty = Whitelist::default();
        let partition = classify(records, profile, whitelist.unwrap_or(&empty), self.settings.policy);
        summary.pending = partition.pending.len();
        summary.orphaned = partition.orphan.len();

        let source = format!("{}:{}", target.name, self.run_id);
        ClassificationLog::new(&self.settings.orphan_log_path)
            .append(profile.table, &partition.orphan, &source)
            .await?;
        ClassificationLog::new(&self.settings.pending_log_path)
            .append(profile.table, &partition.pending, &source)
            .await?;
        if summary.pending + summary.orphaned > 0 {
            warn!(
                collection = %target.name,
                pending = summary.pending,
                orphaned = summary.orphaned,
                "Records held back from upload"
            );
        }
        let lowest_pending_id = partition.pending.iter().filter_map(|r| r.record.source_id).min();

        // 4. Upload
        let engine = UploadEngine::new(self.store, self.settings.batch_size, self.settings.upload_retry.clone())
            .with_cancellation(self.cancel.clone());
        let report = engine
            .upload(&target.name, profile.table, partition.valid, self.observer)
            .await;
        summary.succeeded = report.succeeded;
        summary.failed_batches = report.failed_batches.len();
        summary.failed_records = report.records_failed();

        // 5. Advance the cursor only past what is durably written
        match next_cursor(cursor, &pull, &report, lowest_pending_id) {
            Some(next) => {
                self.ledger.commit(&target.name, next)?;
                summary.cursor_after = next;
            },
            None => warn!(
                collection = %target.name,
                stop = ?pull.stop,
                failed_batches = summary.failed_batches,
                "Cursor kept at previous position"
            ),
        }

        Ok(summary)
    }
}
