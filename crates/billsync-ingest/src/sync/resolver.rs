//! Sync state resolution
//!
//! Compares the ledger cursor with a cheap remote peek and picks one of
//! three modes per collection per run:
//!
//! - `Fresh`: no prior sync, pull every page until an empty one
//! - `UpToDate`: the newest remote id is not above the cursor, fetch nothing
//! - `Resume`: pull pages in order and stop at the first id at or below the cursor
//!
//! Early stop relies on the portal listing records newest-first. Any id that
//! increases along the pull breaks that assumption and is reported, since a
//! resumed pull may then have missed records.

use super::fetcher::PageFetcher;
use crate::collection::CollectionProfile;
use crate::error::{IngestError, Result};
use crate::portal::ListingSource;
use crate::retry::RetryPolicy;
use billsync_common::types::SyncCursor;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Fresh,
    UpToDate,
    Resume,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Fresh => "fresh",
            SyncMode::UpToDate => "up-to-date",
            SyncMode::Resume => "resume",
        }
    }
}

/// What the one-page peek saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Peek {
    pub records: usize,
    /// Highest id among the peeked records
    pub latest_id: Option<i64>,
}

/// Pure mode decision
///
/// A peek without any identifiable record cannot prove the collection is
/// current, so it resumes rather than skipping.
pub fn decide_mode(cursor: &SyncCursor, peek: Option<Peek>) -> SyncMode {
    if cursor.is_fresh() {
        return SyncMode::Fresh;
    }
    match peek {
        Some(Peek { records: 0, .. }) => SyncMode::UpToDate,
        Some(Peek {
            latest_id: Some(latest),
            ..
        }) if latest <= cursor.latest_known_id => SyncMode::UpToDate,
        _ => SyncMode::Resume,
    }
}

/// Why a pull stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing was pulled (up to date)
    Skipped,
    /// An empty page was reached
    Exhausted,
    /// A record at or below the cursor was reached
    ReachedCursor,
    /// A page failed after every retry
    FetchFailed { page: u32 },
    Cancelled,
    /// The per-collection record cap was hit
    Capped,
}

/// Raw records pulled for one collection
#[derive(Debug, Clone)]
pub struct PullResult {
    pub mode: SyncMode,
    pub records: Vec<Value>,
    /// Listing requests made, the peek included
    pub pages_requested: u32,
    pub stop: StopReason,
    pub ordering_violations: usize,
    /// Records pulled without an id of their own; they never stop the pull
    pub unidentified: usize,
    /// Highest id among the pulled records
    pub max_seen_id: Option<i64>,
    pub remote_total: Option<u64>,
}

impl PullResult {
    fn skipped(pages_requested: u32, remote_total: Option<u64>) -> Self {
        Self {
            mode: SyncMode::UpToDate,
            records: Vec::new(),
            pages_requested,
            stop: StopReason::Skipped,
            ordering_violations: 0,
            unidentified: 0,
            max_seen_id: None,
            remote_total,
        }
    }

    /// Every record newer than the cursor was seen
    pub fn is_complete(&self) -> bool {
        matches!(
            self.stop,
            StopReason::Skipped | StopReason::Exhausted | StopReason::ReachedCursor
        )
    }
}

/// Drives the page fetcher for one collection
pub struct SyncResolver<'a> {
    source: &'a dyn ListingSource,
    retry: RetryPolicy,
    page_size: u32,
    peek_size: u32,
    page_delay: Duration,
    max_records: Option<usize>,
    cancel: CancellationToken,
}

impl<'a> SyncResolver<'a> {
    pub fn new(source: &'a dyn ListingSource, retry: RetryPolicy, page_size: u32) -> Self {
        Self {
            source,
            retry,
            page_size,
            peek_size: 10,
            page_delay: Duration::ZERO,
            max_records: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_peek_size(mut self, peek_size: u32) -> Self {
        self.peek_size = peek_size;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_max_records(mut self, max_records: Option<usize>) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn fetcher(&self) -> PageFetcher<'a> {
        PageFetcher::new(self.source, self.retry.clone())
    }

    /// One small first page, used to decide whether anything is new
    async fn peek(
        &self,
        profile: &'static CollectionProfile,
        filters: &BTreeMap<String, String>,
    ) -> Result<(Peek, Option<u64>)> {
        let page = self.fetcher().fetch(profile, filters, 1, self.peek_size).await;
        if page.failed {
            return Err(IngestError::FetchFailed {
                collection: profile.slug.to_string(),
                page: 1,
            });
        }
        let latest_id = page.records.iter().filter_map(|r| profile.record_id(r)).max();
        Ok((
            Peek {
                records: page.records.len(),
                latest_id,
            },
            page.total,
        ))
    }

    /// Decide the mode for `cursor` and pull accordingly
    pub async fn sync(
        &self,
        collection: &str,
        profile: &'static CollectionProfile,
        filters: &BTreeMap<String, String>,
        cursor: &SyncCursor,
    ) -> Result<PullResult> {
        let (peek, total, peeked) = if cursor.is_fresh() {
            (None, None, 0)
        } else {
            let (peek, total) = self.peek(profile, filters).await?;
            (Some(peek), total, 1)
        };

        let mode = decide_mode(cursor, peek);
        info!(
            collection,
            mode = mode.as_str(),
            latest_known_id = cursor.latest_known_id,
            remote_latest_id = ?peek.and_then(|p| p.latest_id),
            "Resolved sync mode"
        );

        if mode == SyncMode::UpToDate {
            return Ok(PullResult::skipped(peeked, total));
        }

        let mut pull = self.pull(collection, profile, filters, cursor, mode).await;
        pull.pages_requested += peeked;
        pull.remote_total = pull.remote_total.or(total);
        Ok(pull)
    }

    async fn pull(
        &self,
        collection: &str,
        profile: &'static CollectionProfile,
        filters: &BTreeMap<String, String>,
        cursor: &SyncCursor,
        mode: SyncMode,
    ) -> PullResult {
        let fetcher = self.fetcher();
        let boundary = (mode == SyncMode::Resume).then_some(cursor.latest_known_id);

        let mut records = Vec::new();
        let mut pages_requested = 0;
        let mut ordering_violations = 0;
        let mut unidentified = 0;
        let mut max_seen_id: Option<i64> = None;
        let mut last_id: Option<i64> = None;
        let mut remote_total = None;
        let mut page_no: u32 = 1;

        let stop = 'pages: loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if page_no > 1 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            pages_requested += 1;
            let page = fetcher.fetch(profile, filters, page_no, self.page_size).await;
            remote_total = remote_total.or(page.total);
            if page.failed {
                break StopReason::FetchFailed { page: page_no };
            }
            if page.is_empty {
                break StopReason::Exhausted;
            }
            info!(collection, page = page_no, records = page.records.len(), "Fetched page");

            let mut page_records = page.records.into_iter();
            while let Some(record) = page_records.next() {
                let id = profile.record_id(&record);
                if id.is_none() {
                    unidentified += 1;
                }

                if let Some(id) = id {
                    if let Some(previous) = last_id.filter(|prev| id > *prev) {
                        ordering_violations += 1;
                        warn!(
                            collection,
                            page = page_no,
                            id,
                            previous,
                            "Listing is not newest-first; a resumed pull may miss records"
                        );
                    }
                    last_id = Some(id);

                    if let Some(known) = boundary.filter(|known| id <= *known) {
                        let newer_behind = page_records
                            .by_ref()
                            .filter_map(|r| profile.record_id(&r))
                            .filter(|later| *later > known)
                            .count();
                        if newer_behind > 0 {
                            ordering_violations += newer_behind;
                            warn!(
                                collection,
                                page = page_no,
                                newer_behind,
                                "Newer records listed after the cursor boundary were not pulled"
                            );
                        }
                        break 'pages StopReason::ReachedCursor;
                    }

                    max_seen_id = Some(max_seen_id.map_or(id, |m| m.max(id)));
                }

                records.push(record);

                if self.max_records.is_some_and(|cap| records.len() >= cap) {
                    break 'pages StopReason::Capped;
                }
            }

            page_no += 1;
        };

        if unidentified > 0 {
            warn!(collection, unidentified, "Records without an id were pulled but not used as a stop boundary");
        }

        info!(
            collection,
            records = records.len(),
            pages_requested,
            stop = ?stop,
            "Pull finished"
        );

        PullResult {
            mode,
            records,
            pages_requested,
            stop,
            ordering_violations,
            unidentified,
            max_seen_id,
            remote_total,
        }
    }
}
