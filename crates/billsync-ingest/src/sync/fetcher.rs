//! Single-page fetch with retries

use crate::collection::CollectionProfile;
use crate::error::PortalError;
use crate::portal::{ListingRequest, ListingSource};
use crate::retry::{RetryAction, RetryPolicy};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::error;

/// Result of one page request after retries
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub records: Vec<Value>,
    /// No records: either the collection is exhausted or the page failed
    pub is_empty: bool,
    /// All attempts failed; the page stands in as empty
    pub failed: bool,
    pub total: Option<u64>,
}

pub struct PageFetcher<'a> {
    source: &'a dyn ListingSource,
    retry: RetryPolicy,
}

impl<'a> PageFetcher<'a> {
    pub fn new(source: &'a dyn ListingSource, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Fetch one page
    ///
    /// Transient failures are retried with the configured pause. When every
    /// attempt fails the page is reported as empty and `failed`, so the caller
    /// stops pulling this collection.
    pub async fn fetch(
        &self,
        profile: &'static CollectionProfile,
        filters: &BTreeMap<String, String>,
        page: u32,
        size: u32,
    ) -> FetchedPage {
        let request = ListingRequest {
            profile,
            filters,
            page,
            size,
        };
        let source = self.source;
        let request = &request;

        let result = self
            .retry
            .run(
                "fetch listing page",
                |e: &PortalError| {
                    if e.is_transient() {
                        RetryAction::Retry
                    } else {
                        RetryAction::Abort
                    }
                },
                move |_| source.fetch_listing(request),
            )
            .await;

        match result {
            Ok(p) => FetchedPage {
                is_empty: p.records.is_empty(),
                records: p.records,
                failed: false,
                total: p.total,
            },
            Err(e) => {
                error!(
                    slug = profile.slug,
                    page,
                    error = %e,
                    "Page fetch failed after retries, stopping collection"
                );
                FetchedPage {
                    records: Vec::new(),
                    is_empty: true,
                    failed: true,
                    total: None,
                }
            },
        }
    }
}
