//! Shared domain types

use crate::error::BillsyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-collection synchronization state persisted across runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncCursor {
    /// Highest remote identifier already written to the store
    pub latest_known_id: i64,

    /// Records written for this collection over all runs
    pub local_record_count: u64,
}

impl SyncCursor {
    pub fn new(latest_known_id: i64, local_record_count: u64) -> Self {
        Self {
            latest_known_id,
            local_record_count,
        }
    }

    /// No prior sync has been recorded
    pub fn is_fresh(&self) -> bool {
        self.latest_known_id <= 0
    }
}

/// The remote collections billsync knows how to pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Survey submissions (asset records, the referenced parent entity)
    Surveys,
    /// Bill listings (financial records referencing a survey)
    Bills,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Surveys => "surveys",
            CollectionKind::Bills => "bills",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = BillsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "surveys" | "survey" => Ok(CollectionKind::Surveys),
            "bills" | "bill" => Ok(CollectionKind::Bills),
            other => Err(BillsyncError::UnknownKind(other.to_string())),
        }
    }
}

/// Outcome of referential validation for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Valid,
    /// Parent reference can never resolve
    Orphan,
    /// Parent reference is absent now but may appear in a later run
    PendingSync,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Valid => "valid",
            Classification::Orphan => "orphan",
            Classification::PendingSync => "pending-sync",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
