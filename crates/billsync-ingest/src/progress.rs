//! Terminal progress for uploads
//!
//! One bar per collection, advanced after every batch.

use crate::upload::{BatchOutcome, BatchProgress, UploadObserver, UploadReport};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;

const BAR_TEMPLATE: &str =
    "{msg:24} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} batches ({eta})";

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Create a batch progress bar for one collection
pub fn create_batch_progress(batches: u64, collection: &str) -> ProgressBar {
    let pb = ProgressBar::new(batches);
    pb.set_style(bar_style());
    pb.set_message(collection.to_string());
    pb
}

/// [`UploadObserver`] drawing indicatif bars
#[derive(Default)]
pub struct ProgressObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer that renders nothing, for non-interactive runs
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn with_bar(&self, collection: &str, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(pb) = bars.get(collection) {
                f(pb);
            }
        }
    }
}

impl UploadObserver for ProgressObserver {
    fn on_start(&self, collection: &str, batches: usize, _records: usize) {
        let pb = self.multi.add(create_batch_progress(batches as u64, collection));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(collection.to_string(), pb);
        }
    }

    fn on_batch(&self, collection: &str, progress: &BatchProgress) {
        self.with_bar(collection, |pb| {
            if progress.outcome == BatchOutcome::Failed {
                pb.println(format!("{collection}: batch {} of {} failed", progress.index, progress.batches));
            }
            pb.inc(1);
        });
    }

    fn on_finish(&self, collection: &str, report: &UploadReport) {
        let pb = self.bars.lock().ok().and_then(|mut bars| bars.remove(collection));
        if let Some(pb) = pb {
            pb.finish_with_message(format!(
                "{collection}: {} written, {} failed",
                report.succeeded,
                report.records_failed()
            ));
        }
    }
}
