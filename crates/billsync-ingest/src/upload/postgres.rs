//! PostgreSQL-backed record store

use super::store::RecordStore;
use crate::collection::{ColumnType, TableSpec};
use crate::error::{IngestError, Result};
use crate::normalize::{FieldValue, NormalizedRecord};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Record store over a connection pool created once per run
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to authoritative store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn text_value(record: &NormalizedRecord, column: &str) -> Option<String> {
    record.get(column).map(FieldValue::render)
}

fn int_value(record: &NormalizedRecord, column: &str) -> Option<i64> {
    match record.get(column) {
        Some(FieldValue::Int(n)) => Some(*n),
        Some(FieldValue::Text(s)) => s.trim().parse().ok(),
        None => None,
    }
}

/// Fields without a dedicated column, kept as a JSON object
fn extra_fields(table: &TableSpec, record: &NormalizedRecord) -> Value {
    let extra: Map<String, Value> = record
        .fields
        .iter()
        .filter(|(name, _)| !table.has_column(name))
        .map(|(name, value)| {
            let value = match value {
                FieldValue::Int(n) => Value::from(*n),
                FieldValue::Text(s) => Value::from(s.as_str()),
            };
            (name.clone(), value)
        })
        .collect();
    Value::Object(extra)
}

fn build_upsert<'a>(table: &TableSpec, records: &'a [NormalizedRecord]) -> QueryBuilder<'a, Postgres> {
    let mut columns: Vec<&str> = table.columns.iter().map(|c| c.name).collect();
    if let Some(extra) = table.extra_column {
        columns.push(extra);
    }

    let mut builder = QueryBuilder::new(format!("INSERT INTO {} ({}) ", table.name, columns.join(", ")));

    builder.push_values(records.iter(), |mut b, record| {
        for column in table.columns {
            match column.ty {
                ColumnType::Text => b.push_bind(text_value(record, column.name)),
                ColumnType::BigInt => b.push_bind(int_value(record, column.name)),
            };
        }
        if table.extra_column.is_some() {
            b.push_bind(Json(extra_fields(table, record)));
        }
    });

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !table.key_columns.contains(c))
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .chain(std::iter::once("synced_at = NOW()".to_string()))
        .collect();

    builder.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        table.key_columns.join(", "),
        updates.join(", ")
    ));
    builder
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn upsert_batch(&self, table: &'static TableSpec, records: &[NormalizedRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let result = build_upsert(table, records).build().execute(&self.pool).await?;
        debug!(table = table.name, rows = result.rows_affected(), "Upserted batch");
        Ok(result.rows_affected())
    }

    async fn key_page(
        &self,
        table: &'static TableSpec,
        column: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<String>> {
        if !table.has_column(column) {
            return Err(IngestError::Store(format!(
                "{} has no column {column}",
                table.name
            )));
        }
        let sql = format!(
            "SELECT {column}::text AS key FROM {} WHERE {column} IS NOT NULL ORDER BY {column} LIMIT $1 OFFSET $2",
            table.name
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(IngestError::from))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collection::{BILLS, SURVEY_UNITS};

    #[test]
    fn test_upsert_statement_shape() {
        let mut record = NormalizedRecord::new(Some(1));
        record.set_text("psid", "100");
        record.set_text("bill_month", "Jan-2025");
        let records = vec![record];

        let builder = build_upsert(&BILLS, &records);
        let sql = builder.sql();
        assert!(sql.starts_with("INSERT INTO bills (psid, bill_month, bill_id"));
        assert!(sql.contains("ON CONFLICT (psid, bill_month) DO UPDATE SET bill_id = EXCLUDED.bill_id"));
        assert!(!sql.contains("psid = EXCLUDED.psid"));
        assert!(sql.ends_with("synced_at = NOW()"));
    }

    #[test]
    fn test_unmapped_fields_go_to_extra_column() {
        let mut record = NormalizedRecord::new(Some(7));
        record.set_text("survey_id", "7");
        record.set_text("roof_material", "concrete");
        record.set_int("rooms", 3);

        let extra = extra_fields(&SURVEY_UNITS, &record);
        assert_eq!(extra, serde_json::json!({ "roof_material": "concrete", "rooms": 3 }));

        let records = vec![record];
        let builder = build_upsert(&SURVEY_UNITS, &records);
        let sql = builder.sql();
        assert!(sql.contains("additional_info, answers)"));
        assert!(sql.contains("answers = EXCLUDED.answers"));
    }

    #[test]
    fn test_multi_row_upsert_updates_every_non_key_column() {
        let records: Vec<NormalizedRecord> = ["100", "101"]
            .iter()
            .map(|psid| {
                let mut record = NormalizedRecord::new(None);
                record.set_text("psid", *psid);
                record.set_text("bill_month", "Jan-2025");
                record.set_int("amount_due", 1200);
                record
            })
            .collect();

        let builder = build_upsert(&BILLS, &records);
        let sql = builder.sql();

        // one placeholder per column per row
        let per_row = BILLS.columns.len();
        assert!(sql.contains(&format!("(${}, ", per_row + 1)));
        assert!(sql.contains(&format!("${})", per_row * 2)));
        assert!(!sql.contains(&format!("${}", per_row * 2 + 1)));

        let expected = "ON CONFLICT (psid, bill_month) DO UPDATE SET \
            bill_id = EXCLUDED.bill_id, survey_id = EXCLUDED.survey_id, wmc = EXCLUDED.wmc, \
            division = EXCLUDED.division, district = EXCLUDED.district, tehsil = EXCLUDED.tehsil, \
            office = EXCLUDED.office, uc_name = EXCLUDED.uc_name, \
            billing_category = EXCLUDED.billing_category, amount_due = EXCLUDED.amount_due, \
            fine = EXCLUDED.fine, paid_amount = EXCLUDED.paid_amount, channel = EXCLUDED.channel, \
            paid_date = EXCLUDED.paid_date, status = EXCLUDED.status, active = EXCLUDED.active, \
            bill_url = EXCLUDED.bill_url, synced_at = NOW()";
        assert!(sql.ends_with(expected), "unexpected upsert tail: {sql}");
    }

    #[test]
    fn test_survey_upsert_conflicts_on_survey_id() {
        let mut record = NormalizedRecord::new(Some(7));
        record.set_text("survey_id", "7");
        let records = vec![record];

        let builder = build_upsert(&SURVEY_UNITS, &records);
        let sql = builder.sql();
        assert!(sql.contains(" ON CONFLICT (survey_id) DO UPDATE SET surveyor_name = EXCLUDED.surveyor_name"));
        assert!(!sql.contains("survey_id = EXCLUDED.survey_id"));
        assert!(sql.ends_with("answers = EXCLUDED.answers, synced_at = NOW()"));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_upsert_is_idempotent_against_postgres() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PgRecordStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();

        let mut survey = NormalizedRecord::new(Some(990001));
        survey.set_text("survey_id", "990001");
        survey.set_text("district", "Sargodha");
        let batch = vec![survey];

        store.upsert_batch(&SURVEY_UNITS, &batch).await.unwrap();
        store.upsert_batch(&SURVEY_UNITS, &batch).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM survey_units WHERE survey_id = '990001'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
