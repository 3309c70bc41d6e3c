//! Record normalization
//!
//! Turns one raw portal item into a flat [`NormalizedRecord`]. Pure functions
//! only: no I/O, no failure path. Odd input degrades to blanks or the
//! [`ids::INVALID_ID`] sentinel instead of raising.

pub mod answers;
pub mod attachments;
pub mod bill;
pub mod fields;
pub mod ids;
pub mod survey;

use crate::collection::TableSpec;
use billsync_common::types::CollectionKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Scalar stored under a canonical field name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Int(_) => None,
        }
    }

    /// Display form used for keys and log lines
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Int(n) => n.to_string(),
        }
    }
}

/// Flat canonical record ready for validation and upload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Remote identifier used for cursor bookkeeping
    pub source_id: Option<i64>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn new(source_id: Option<i64>) -> Self {
        Self {
            source_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn set_text(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), FieldValue::Text(value.into()));
    }

    pub fn set_int(&mut self, field: impl Into<String>, value: i64) {
        self.fields.insert(field.into(), FieldValue::Int(value));
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::as_text)
    }

    pub fn int(&self, field: &str) -> Option<i64> {
        match self.fields.get(field) {
            Some(FieldValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Natural key values joined with `|`
    pub fn natural_key(&self, table: &TableSpec) -> String {
        table
            .key_columns
            .iter()
            .map(|col| self.get(col).map(FieldValue::render).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Whether any natural key part is blank or the invalid sentinel
    pub fn has_invalid_key(&self, table: &TableSpec) -> bool {
        table.key_columns.iter().any(|col| {
            self.text(col)
                .map(|v| v.is_empty() || !ids::is_valid_identifier(v))
                .unwrap_or(true)
        })
    }
}

/// Normalizer bound to the portal host used for link resolution
#[derive(Debug, Clone)]
pub struct Normalizer {
    base: Url,
}

impl Normalizer {
    pub fn new(base_host: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base_host)?,
        })
    }

    /// `labels` fill in area names the payload does not carry
    pub fn normalize(
        &self,
        kind: CollectionKind,
        raw: &Value,
        labels: &BTreeMap<String, String>,
    ) -> NormalizedRecord {
        match kind {
            CollectionKind::Surveys => survey::normalize_survey(raw, &self.base, labels),
            CollectionKind::Bills => bill::normalize_bill(raw, &self.base, labels),
        }
    }

    pub fn normalize_all(
        &self,
        kind: CollectionKind,
        raws: &[Value],
        labels: &BTreeMap<String, String>,
    ) -> Vec<NormalizedRecord> {
        raws.iter().map(|raw| self.normalize(kind, raw, labels)).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collection::{BILLS, SURVEY_UNITS};

    #[test]
    fn test_natural_key_and_validity() {
        let mut bill = NormalizedRecord::new(Some(9));
        bill.set_text("psid", "1002003004005");
        bill.set_text("bill_month", "Jan-2025");
        assert_eq!(bill.natural_key(&BILLS), "1002003004005|Jan-2025");
        assert!(!bill.has_invalid_key(&BILLS));

        bill.set_text("psid", ids::INVALID_ID);
        assert!(bill.has_invalid_key(&BILLS));

        let survey = NormalizedRecord::new(None);
        assert!(survey.has_invalid_key(&SURVEY_UNITS));
    }

    #[test]
    fn test_field_value_serializes_untagged() {
        let mut record = NormalizedRecord::new(Some(1));
        record.set_int("amount_due", 1200);
        record.set_text("status", "PAID");
        let json = serde_json::to_value(&record.fields).unwrap();
        assert_eq!(json["amount_due"], 1200);
        assert_eq!(json["status"], "PAID");
    }
}
