//! Batched, retried upserts
//!
//! Records are deduplicated on their natural key, cut into batches of at
//! most [`MAX_BATCH_SIZE`] rows and written one batch at a time. A batch that
//! still fails after its retries is skipped and reported; later batches are
//! still attempted. Cancellation is honored between batches only.

use super::store::RecordStore;
use crate::collection::TableSpec;
use crate::config::MAX_BATCH_SIZE;
use crate::error::IngestError;
use crate::normalize::NormalizedRecord;
use crate::retry::{RetryAction, RetryPolicy};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Written,
    Failed,
}

/// Progress event emitted after every batch
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// 1-based
    pub index: usize,
    pub batches: usize,
    pub size: usize,
    pub outcome: BatchOutcome,
}

/// Receives per-batch progress while an upload runs
pub trait UploadObserver: Send + Sync {
    fn on_start(&self, _collection: &str, _batches: usize, _records: usize) {}

    fn on_batch(&self, _collection: &str, _progress: &BatchProgress) {}

    fn on_finish(&self, _collection: &str, _report: &UploadReport) {}
}

pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct FailedBatch {
    pub index: usize,
    pub size: usize,
    pub error: String,
    pub lowest_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub total_records: usize,
    pub batches: usize,
    /// Records written
    pub succeeded: usize,
    pub failed_batches: Vec<FailedBatch>,
    /// Same natural key seen more than once in the input
    pub duplicates_dropped: usize,
    /// Stopped before every batch was attempted
    pub cancelled: bool,
    /// Lowest source id among records that were not written
    pub lowest_unwritten_id: Option<i64>,
}

impl UploadReport {
    pub fn records_failed(&self) -> usize {
        self.failed_batches.iter().map(|b| b.size).sum()
    }

    /// Batches were attempted and none of them landed
    pub fn is_total_failure(&self) -> bool {
        !self.failed_batches.is_empty() && self.succeeded == 0
    }

    fn hold_below(&mut self, id: Option<i64>) {
        if let Some(id) = id {
            self.lowest_unwritten_id = Some(self.lowest_unwritten_id.map_or(id, |low| low.min(id)));
        }
    }
}

fn lowest_source_id(batch: &[NormalizedRecord]) -> Option<i64> {
    batch.iter().filter_map(|r| r.source_id).min()
}

/// Keep the first occurrence of every natural key
///
/// Listings are newest-first, so the first occurrence is the freshest copy.
pub fn dedupe_by_key(table: &TableSpec, records: Vec<NormalizedRecord>) -> (Vec<NormalizedRecord>, usize) {
    let mut seen = HashSet::with_capacity(records.len());
    let before = records.len();
    let unique: Vec<_> = records
        .into_iter()
        .filter(|r| seen.insert(r.natural_key(table)))
        .collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

pub struct UploadEngine<'a> {
    store: &'a dyn RecordStore,
    batch_size: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> UploadEngine<'a> {
    pub fn new(store: &'a dyn RecordStore, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            store,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            retry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn upload(
        &self,
        collection: &str,
        table: &'static TableSpec,
        records: Vec<NormalizedRecord>,
        observer: &dyn UploadObserver,
    ) -> UploadReport {
        let (records, duplicates_dropped) = dedupe_by_key(table, records);
        if duplicates_dropped > 0 {
            warn!(collection, duplicates_dropped, "Dropped duplicate natural keys before upload");
        }

        let batches: Vec<&[NormalizedRecord]> = records.chunks(self.batch_size).collect();
        let mut report = UploadReport {
            total_records: records.len(),
            batches: batches.len(),
            duplicates_dropped,
            ..Default::default()
        };
        observer.on_start(collection, batches.len(), records.len());

        for (i, batch) in batches.iter().enumerate() {
            let index = i + 1;
            if self.cancel.is_cancelled() {
                warn!(collection, next_batch = index, "Upload cancelled before batch");
                report.cancelled = true;
                for rest in &batches[i..] {
                    report.hold_below(lowest_source_id(rest));
                }
                break;
            }

            let store = self.store;
            let rows: &[NormalizedRecord] = batch;
            let result = self
                .retry
                .run(
                    "upsert batch",
                    |_: &IngestError| RetryAction::Retry,
                    move |_| store.upsert_batch(table, rows),
                )
                .await;

            let outcome = match result {
                Ok(_) => {
                    report.succeeded += batch.len();
                    info!(
                        collection,
                        table = table.name,
                        batch = index,
                        batches = report.batches,
                        rows = batch.len(),
                        "Batch written"
                    );
                    BatchOutcome::Written
                },
                Err(e) => {
                    error!(
                        collection,
                        table = table.name,
                        batch = index,
                        rows = batch.len(),
                        error = %e,
                        "Batch failed after retries, skipping"
                    );
                    let lowest_id = lowest_source_id(batch);
                    report.hold_below(lowest_id);
                    report.failed_batches.push(FailedBatch {
                        index,
                        size: batch.len(),
                        error: e.to_string(),
                        lowest_id,
                    });
                    BatchOutcome::Failed
                },
            };

            observer.on_batch(
                collection,
                &BatchProgress {
                    index,
                    batches: report.batches,
                    size: batch.len(),
                    outcome,
                },
            );
        }

        observer.on_finish(collection, &report);
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collection::SURVEY_UNITS;
    use crate::upload::store::MemoryStore;
    use std::sync::Mutex;
    use std::time::Duration;

    fn surveys(ids: impl IntoIterator<Item = i64>) -> Vec<NormalizedRecord> {
        ids.into_iter()
            .map(|id| {
                let mut r = NormalizedRecord::new(Some(id));
                r.set_text("survey_id", id.to_string());
                r
            })
            .collect()
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(usize, BatchOutcome)>>,
    }

    impl UploadObserver for Recorder {
        fn on_batch(&self, _: &str, progress: &BatchProgress) {
            self.events.lock().unwrap().push((progress.index, progress.outcome));
        }
    }

    #[tokio::test]
    async fn test_batches_are_bounded() {
        let store = MemoryStore::new();
        let engine = UploadEngine::new(&store, 5000, RetryPolicy::none());
        assert_eq!(engine.batch_size(), MAX_BATCH_SIZE);

        let report = engine
            .upload("s", &SURVEY_UNITS, surveys(1..=2500), &NoopObserver)
            .await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.succeeded, 2500);
        assert_eq!(store.upsert_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_skipped_and_later_batches_run() {
        let store = MemoryStore::new();
        store.reject_key("15");
        let engine = UploadEngine::new(&store, 10, RetryPolicy::linear(3, Duration::from_secs(2)));
        let recorder = Recorder::default();

        let report = engine
            .upload("s", &SURVEY_UNITS, surveys((1..=30).rev()), &recorder)
            .await;

        assert_eq!(report.succeeded, 20);
        assert_eq!(report.failed_batches.len(), 1);
        assert_eq!(report.failed_batches[0].index, 2);
        assert_eq!(report.lowest_unwritten_id, Some(11));
        assert!(!report.is_total_failure());
        // three attempts for the rejected batch, one for each of the others
        assert_eq!(store.upsert_calls(), 5);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                (1, BatchOutcome::Written),
                (2, BatchOutcome::Failed),
                (3, BatchOutcome::Written)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_on_retry() {
        let store = MemoryStore::new();
        store.fail_call(1);
        let engine = UploadEngine::new(&store, 10, RetryPolicy::linear(3, Duration::from_secs(2)));

        let report = engine.upload("s", &SURVEY_UNITS, surveys(1..=4), &NoopObserver).await;

        assert!(report.failed_batches.is_empty());
        assert_eq!(report.succeeded, 4);
        assert_eq!(store.row_count(&SURVEY_UNITS), 4);
    }

    #[tokio::test]
    async fn test_duplicates_keep_first_occurrence() {
        let store = MemoryStore::new();
        let engine = UploadEngine::new(&store, 10, RetryPolicy::none());
        let mut records = surveys([3, 2]);
        let mut stale = NormalizedRecord::new(Some(3));
        stale.set_text("survey_id", "3");
        stale.set_text("district", "stale");
        records.push(stale);

        let report = engine.upload("s", &SURVEY_UNITS, records, &NoopObserver).await;

        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(store.row_count(&SURVEY_UNITS), 2);
        assert_eq!(store.row(&SURVEY_UNITS, "3").unwrap().text("district"), None);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_batches() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = UploadEngine::new(&store, 10, RetryPolicy::none()).with_cancellation(cancel);

        let report = engine.upload("s", &SURVEY_UNITS, surveys((1..=25).rev()), &NoopObserver).await;

        assert!(report.cancelled);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.lowest_unwritten_id, Some(1));
        assert_eq!(store.upsert_calls(), 0);
    }
}
