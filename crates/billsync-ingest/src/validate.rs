//! Referential validation of child records against their parent table
//!
//! Every record is classified exactly once:
//!
//! | parent key                         | lenient        | strict   |
//! |------------------------------------|----------------|----------|
//! | present in whitelist               | `valid`        | `valid`  |
//! | well-formed, not in whitelist      | `pending-sync` | `orphan` |
//! | blank / `INVALID`                  | `orphan`       | `orphan` |
//!
//! Records whose own natural key is unusable are orphans too, since they can
//! never be upserted.

use crate::collection::{CollectionProfile, ParentRef};
use crate::error::{IngestError, Result};
use crate::normalize::ids::is_valid_identifier;
use crate::normalize::NormalizedRecord;
use crate::retry::{RetryAction, RetryPolicy};
use crate::upload::RecordStore;
use billsync_common::types::Classification;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Unresolved parents are held back as pending, never discarded
    #[default]
    Lenient,
    /// Unresolved parents are orphans
    Strict,
}

impl ValidationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationPolicy::Lenient => "lenient",
            ValidationPolicy::Strict => "strict",
        }
    }
}

impl fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(ValidationPolicy::Lenient),
            "strict" => Ok(ValidationPolicy::Strict),
            other => Err(IngestError::Config(format!(
                "unknown validation policy '{other}' (expected lenient or strict)"
            ))),
        }
    }
}

/// Full set of parent keys currently in the store
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    keys: HashSet<String>,
}

impl Whitelist {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Whitelist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Pull every key of the parent column, one page at a time until an empty page
pub async fn build_whitelist(
    store: &dyn RecordStore,
    parent: &ParentRef,
    page_size: i64,
    retry: &RetryPolicy,
) -> Result<Whitelist> {
    let page_size = page_size.max(1);
    let mut keys = HashSet::new();
    let mut offset = 0i64;

    loop {
        let table = parent.table;
        let column = parent.column;
        let page = retry
            .run(
                "whitelist page",
                |e: &IngestError| {
                    if e.is_transient() {
                        RetryAction::Retry
                    } else {
                        RetryAction::Abort
                    }
                },
                move |_| store.key_page(table, column, offset, page_size),
            )
            .await?;

        if page.is_empty() {
            break;
        }
        debug!(table = table.name, offset, keys = page.len(), "Whitelist page");
        offset += page.len() as i64;
        keys.extend(page);
    }

    info!(
        table = parent.table.name,
        column = parent.column,
        keys = keys.len(),
        "Whitelist built"
    );
    Ok(Whitelist { keys })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub record: NormalizedRecord,
    pub classification: Classification,
    /// Parent key that did not resolve
    pub missing_reference: Option<String>,
}

/// Disjoint buckets covering every input record
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub valid: Vec<NormalizedRecord>,
    pub pending: Vec<ClassifiedRecord>,
    pub orphan: Vec<ClassifiedRecord>,
}

impl Partition {
    pub fn total(&self) -> usize {
        self.valid.len() + self.pending.len() + self.orphan.len()
    }
}

pub fn classify_one(
    record: &NormalizedRecord,
    profile: &CollectionProfile,
    whitelist: &Whitelist,
    policy: ValidationPolicy,
) -> (Classification, Option<String>) {
    if record.has_invalid_key(profile.table) {
        return (Classification::Orphan, Some(record.natural_key(profile.table)));
    }

    let Some(parent) = &profile.parent else {
        return (Classification::Valid, None);
    };

    let key = record
        .get(parent.field)
        .map(|v| v.render())
        .unwrap_or_default();

    if key.trim().is_empty() || !is_valid_identifier(&key) {
        return (Classification::Orphan, Some(key));
    }
    if whitelist.contains(&key) {
        return (Classification::Valid, None);
    }
    match policy {
        ValidationPolicy::Lenient => (Classification::PendingSync, Some(key)),
        ValidationPolicy::Strict => (Classification::Orphan, Some(key)),
    }
}

pub fn classify(
    records: Vec<NormalizedRecord>,
    profile: &CollectionProfile,
    whitelist: &Whitelist,
    policy: ValidationPolicy,
) -> Partition {
    let mut partition = Partition::default();

    for record in records {
        let (classification, missing_reference) = classify_one(&record, profile, whitelist, policy);
        match classification {
            Classification::Valid => partition.valid.push(record),
            Classification::PendingSync => partition.pending.push(ClassifiedRecord {
                record,
                classification,
                missing_reference,
            }),
            Classification::Orphan => partition.orphan.push(ClassifiedRecord {
                record,
                classification,
                missing_reference,
            }),
        }
    }

    partition
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collection::{profile, SURVEY_UNITS};
    use crate::upload::MemoryStore;
    use billsync_common::types::CollectionKind;

    fn bill(psid: &str, parent: &str) -> NormalizedRecord {
        let mut r = NormalizedRecord::new(None);
        r.set_text("psid", psid);
        r.set_text("bill_month", "Jan-2025");
        r.set_text("survey_id", parent);
        r
    }

    fn bills() -> &'static CollectionProfile {
        profile(CollectionKind::Bills)
    }

    #[test]
    fn test_lenient_keeps_unresolved_parent_pending() {
        let whitelist: Whitelist = ["A", "B"].into_iter().collect();
        let partition = classify(
            vec![bill("1", "A"), bill("2", "C")],
            bills(),
            &whitelist,
            ValidationPolicy::Lenient,
        );

        assert_eq!(partition.valid.len(), 1);
        assert_eq!(partition.valid[0].text("survey_id"), Some("A"));
        assert_eq!(partition.pending.len(), 1);
        assert_eq!(partition.pending[0].missing_reference.as_deref(), Some("C"));
        assert!(partition.orphan.is_empty());
    }

    #[test]
    fn test_strict_escalates_to_orphan() {
        let whitelist: Whitelist = ["A"].into_iter().collect();
        let partition = classify(
            vec![bill("1", "A"), bill("2", "C")],
            bills(),
            &whitelist,
            ValidationPolicy::Strict,
        );

        assert_eq!(partition.valid.len(), 1);
        assert!(partition.pending.is_empty());
        assert_eq!(partition.orphan[0].classification, Classification::Orphan);
    }

    #[test]
    fn test_invalid_parent_is_orphan_under_both_policies() {
        let whitelist = Whitelist::default();
        for policy in [ValidationPolicy::Lenient, ValidationPolicy::Strict] {
            let partition = classify(vec![bill("1", "INVALID")], bills(), &whitelist, policy);
            assert_eq!(partition.orphan.len(), 1, "{policy}");
        }
    }

    #[test]
    fn test_partition_is_total() {
        let whitelist: Whitelist = ["A"].into_iter().collect();
        let records = vec![
            bill("1", "A"),
            bill("2", "B"),
            bill("3", "INVALID"),
            bill("INVALID", "A"),
            bill("5", ""),
        ];
        let partition = classify(records, bills(), &whitelist, ValidationPolicy::Lenient);

        assert_eq!(partition.total(), 5);
        assert_eq!(partition.valid.len(), 1);
        assert_eq!(partition.pending.len(), 1);
        assert_eq!(partition.orphan.len(), 3);
    }

    #[test]
    fn test_surveys_have_no_parent() {
        let mut survey = NormalizedRecord::new(Some(1));
        survey.set_text("survey_id", "1");
        let partition = classify(
            vec![survey],
            profile(CollectionKind::Surveys),
            &Whitelist::default(),
            ValidationPolicy::Strict,
        );
        assert_eq!(partition.valid.len(), 1);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("STRICT".parse::<ValidationPolicy>().unwrap(), ValidationPolicy::Strict);
        assert_eq!(" lenient ".parse::<ValidationPolicy>().unwrap(), ValidationPolicy::Lenient);
        assert!("loose".parse::<ValidationPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_whitelist_pages_until_empty() {
        let store = MemoryStore::new();
        store.seed_keys(&SURVEY_UNITS, (1..=25).map(|n| n.to_string()));
        let parent = bills().parent.as_ref().unwrap();

        let whitelist = build_whitelist(&store, parent, 10, &RetryPolicy::none())
            .await
            .unwrap();

        assert_eq!(whitelist.len(), 25);
        assert!(whitelist.contains("17"));
    }
}
