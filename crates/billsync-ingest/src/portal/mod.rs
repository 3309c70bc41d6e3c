//! Billing portal access: session, listing requests and response parsing

pub mod client;
pub mod extract;

use crate::collection::CollectionProfile;
use crate::error::PortalError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

pub use client::{PortalClient, PortalSession};

/// One listing page request
#[derive(Debug, Clone)]
pub struct ListingRequest<'a> {
    pub profile: &'static CollectionProfile,
    pub filters: &'a BTreeMap<String, String>,
    /// 1-based
    pub page: u32,
    pub size: u32,
}

/// One listing page response
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Value>,
    pub total: Option<u64>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Remote paginated source of collection records
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing(&self, request: &ListingRequest<'_>) -> Result<Page, PortalError>;

    /// Switch the server-side active designation for subsequent listings
    async fn switch_designation(&self, designation_id: i64) -> Result<(), PortalError>;
}
