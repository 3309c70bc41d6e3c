//! Authoritative store abstraction

use crate::collection::TableSpec;
use crate::error::{IngestError, Result};
use crate::normalize::{FieldValue, NormalizedRecord};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Upsert-capable table store
///
/// `upsert_batch` must be idempotent on the table's natural key: writing the
/// same rows again replaces them in place.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write one batch in a single statement, returning rows affected
    async fn upsert_batch(&self, table: &'static TableSpec, records: &[NormalizedRecord]) -> Result<u64>;

    /// One page of distinct values of `column`, in a stable order
    async fn key_page(
        &self,
        table: &'static TableSpec,
        column: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<&'static str, BTreeMap<String, NormalizedRecord>>,
    calls: usize,
    fail_calls: HashSet<usize>,
    reject_keys: HashSet<String>,
}

/// In-process store keyed by natural key
///
/// Used by tests and dry runs. Failures can be injected per call number or
/// per natural key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn poisoned<T>(_: T) -> IngestError {
    IngestError::Store("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a table with bare keys (single-column natural key)
    pub fn seed_keys<I, S>(&self, table: &'static TableSpec, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.state.lock() {
            let rows = state.tables.entry(table.name).or_default();
            for key in keys {
                let key = key.into();
                let mut record = NormalizedRecord::new(None);
                if let Some(column) = table.key_columns.first() {
                    record.set_text(*column, key.clone());
                }
                rows.insert(key, record);
            }
        }
    }

    /// Fail the given upsert call (1-based, counted across tables)
    pub fn fail_call(&self, call: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_calls.insert(call);
        }
    }

    /// Fail every batch that contains this natural key
    pub fn reject_key(&self, key: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_keys.insert(key.into());
        }
    }

    pub fn row_count(&self, table: &TableSpec) -> usize {
        self.state
            .lock()
            .map(|s| s.tables.get(table.name).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn row(&self, table: &TableSpec, key: &str) -> Option<NormalizedRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table.name).and_then(|rows| rows.get(key).cloned()))
    }

    pub fn upsert_calls(&self) -> usize {
        self.state.lock().map(|s| s.calls).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_batch(&self, table: &'static TableSpec, records: &[NormalizedRecord]) -> Result<u64> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.calls += 1;
        let call = state.calls;

        if state.fail_calls.contains(&call) {
            return Err(IngestError::Store(format!("injected failure on call {call}")));
        }
        if let Some(key) = records
            .iter()
            .map(|r| r.natural_key(table))
            .find(|k| state.reject_keys.contains(k))
        {
            return Err(IngestError::Store(format!("row {key} rejected")));
        }

        let rows = state.tables.entry(table.name).or_default();
        for record in records {
            rows.insert(record.natural_key(table), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn key_page(
        &self,
        table: &'static TableSpec,
        column: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut values: Vec<String> = state
            .tables
            .get(table.name)
            .map(|rows| {
                rows.values()
                    .filter_map(|r| r.get(column).map(FieldValue::render))
                    .collect()
            })
            .unwrap_or_default();
        values.sort();
        values.dedup();

        Ok(values
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collection::{BILLS, SURVEY_UNITS};

    fn bill(psid: &str, month: &str, amount: i64) -> NormalizedRecord {
        let mut r = NormalizedRecord::new(None);
        r.set_text("psid", psid);
        r.set_text("bill_month", month);
        r.set_int("amount_due", amount);
        r
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_natural_key() {
        let store = MemoryStore::new();
        store
            .upsert_batch(&BILLS, &[bill("1", "Jan-2025", 100), bill("1", "Feb-2025", 100)])
            .await
            .unwrap();
        store.upsert_batch(&BILLS, &[bill("1", "Jan-2025", 250)]).await.unwrap();

        assert_eq!(store.row_count(&BILLS), 2);
        assert_eq!(
            store.row(&BILLS, "1|Jan-2025").unwrap().int("amount_due"),
            Some(250)
        );
    }

    #[tokio::test]
    async fn test_key_pages_are_sorted_and_bounded() {
        let store = MemoryStore::new();
        store.seed_keys(&SURVEY_UNITS, ["c", "a", "b"]);

        let first = store.key_page(&SURVEY_UNITS, "survey_id", 0, 2).await.unwrap();
        let rest = store.key_page(&SURVEY_UNITS, "survey_id", 2, 2).await.unwrap();
        let past = store.key_page(&SURVEY_UNITS, "survey_id", 4, 2).await.unwrap();

        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(rest, vec!["c"]);
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.fail_call(1);
        store.reject_key("9|Jan-2025");

        assert!(store.upsert_batch(&BILLS, &[bill("1", "Jan-2025", 1)]).await.is_err());
        assert!(store.upsert_batch(&BILLS, &[bill("1", "Jan-2025", 1)]).await.is_ok());
        assert!(store
            .upsert_batch(&BILLS, &[bill("2", "Jan-2025", 1), bill("9", "Jan-2025", 1)])
            .await
            .is_err());
        assert_eq!(store.row_count(&BILLS), 1);
        assert_eq!(store.upsert_calls(), 3);
    }
}
