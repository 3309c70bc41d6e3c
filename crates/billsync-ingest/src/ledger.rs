//! Local ledger of per-collection sync cursors
//!
//! The ledger is the only state carried between runs. It is read before a
//! collection is synchronized and written only after that collection's
//! records have been durably upserted.

use billsync_common::types::SyncCursor;
use billsync_common::{BillsyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const LEDGER_VERSION: u32 = 1;

/// Narrow interface the pipeline uses to read and advance cursors
pub trait Ledger: Send + Sync {
    /// Cursor for a collection; unknown collections start fresh
    fn cursor(&self, collection: &str) -> Result<SyncCursor>;

    /// Persist a new cursor for a collection
    fn commit(&self, collection: &str, cursor: SyncCursor) -> Result<()>;

    /// Forget a collection so the next run pulls it from scratch
    fn reset(&self, collection: &str) -> Result<bool>;

    fn entries(&self) -> Result<BTreeMap<String, LedgerEntry>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub cursor: SyncCursor,
    pub updated_at: DateTime<Utc>,
}

/// On-disk ledger document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub ledger_version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub collections: BTreeMap<String, LedgerEntry>,
}

impl Default for LedgerDocument {
    fn default() -> Self {
        Self {
            ledger_version: LEDGER_VERSION,
            updated_at: Utc::now(),
            collections: BTreeMap::new(),
        }
    }
}

fn lock_err<T>(_: T) -> BillsyncError {
    BillsyncError::Ledger("ledger lock poisoned".into())
}

/// JSON file ledger, rewritten atomically on every commit
pub struct JsonLedger {
    path: PathBuf,
    document: Mutex<LedgerDocument>,
}

impl JsonLedger {
    /// Open the ledger at `path`; a missing file is an empty ledger
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let document: LedgerDocument = serde_json::from_str(&content)?;
            if document.ledger_version > LEDGER_VERSION {
                return Err(BillsyncError::Ledger(format!(
                    "{} was written by a newer ledger version ({})",
                    path.display(),
                    document.ledger_version
                )));
            }
            document
        } else {
            LedgerDocument::default()
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, document: &LedgerDocument) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(document)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Ledger saved");
        Ok(())
    }
}

impl Ledger for JsonLedger {
    fn cursor(&self, collection: &str) -> Result<SyncCursor> {
        let document = self.document.lock().map_err(lock_err)?;
        Ok(document
            .collections
            .get(collection)
            .map(|e| e.cursor)
            .unwrap_or_default())
    }

    fn commit(&self, collection: &str, cursor: SyncCursor) -> Result<()> {
        let mut document = self.document.lock().map_err(lock_err)?;
        let now = Utc::now();
        document.collections.insert(
            collection.to_string(),
            LedgerEntry {
                cursor,
                updated_at: now,
            },
        );
        document.updated_at = now;
        self.save(&document)
    }

    fn reset(&self, collection: &str) -> Result<bool> {
        let mut document = self.document.lock().map_err(lock_err)?;
        let removed = document.collections.remove(collection).is_some();
        if removed {
            document.updated_at = Utc::now();
            self.save(&document)?;
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<BTreeMap<String, LedgerEntry>> {
        Ok(self.document.lock().map_err(lock_err)?.collections.clone())
    }
}

/// In-process ledger; nothing survives the process
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<BTreeMap<String, LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(self, collection: &str, cursor: SyncCursor) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                collection.to_string(),
                LedgerEntry {
                    cursor,
                    updated_at: Utc::now(),
                },
            );
        }
        self
    }
}

impl Ledger for MemoryLedger {
    fn cursor(&self, collection: &str) -> Result<SyncCursor> {
        let entries = self.entries.lock().map_err(lock_err)?;
        Ok(entries.get(collection).map(|e| e.cursor).unwrap_or_default())
    }

    fn commit(&self, collection: &str, cursor: SyncCursor) -> Result<()> {
        self.entries.lock().map_err(lock_err)?.insert(
            collection.to_string(),
            LedgerEntry {
                cursor,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn reset(&self, collection: &str) -> Result<bool> {
        Ok(self.entries.lock().map_err(lock_err)?.remove(collection).is_some())
    }

    fn entries(&self) -> Result<BTreeMap<String, LedgerEntry>> {
        Ok(self.entries.lock().map_err(lock_err)?.clone())
    }
}
