//! Append-only log of records held back from the store

use crate::collection::TableSpec;
use crate::error::Result;
use crate::normalize::ids::INVALID_ID;
use crate::normalize::FieldValue;
use crate::validate::ClassifiedRecord;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// One line per rejected record:
/// `<timestamp> | PSID: <key> | Missing Reference: <parent> | Source: <batch>`
#[derive(Debug, Clone)]
pub struct ClassificationLog {
    path: PathBuf,
}

pub fn format_line(at: DateTime<Utc>, key: &str, missing_reference: &str, source: &str) -> String {
    format!(
        "{} | PSID: {} | Missing Reference: {} | Source: {}",
        at.format(TIMESTAMP_FORMAT),
        key,
        missing_reference,
        source
    )
}

impl ClassificationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line per record, keyed by the table's leading key column
    pub async fn append(&self, table: &TableSpec, records: &[ClassifiedRecord], source: &str) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let now = Utc::now();
        let mut lines = String::new();
        for record in records {
            let key = table
                .key_columns
                .first()
                .and_then(|column| record.record.get(column))
                .map(FieldValue::render)
                .unwrap_or_else(|| INVALID_ID.to_string());
            let line = format_line(
                now,
                &key,
                record.missing_reference.as_deref().unwrap_or(""),
                source,
            );
            lines.push_str(&line);
            lines.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), lines = records.len(), "Appended classification log");
        Ok(records.len())
    }
}
