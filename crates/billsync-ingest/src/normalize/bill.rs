//! Bill listing normalization

use super::attachments::resolve_against_host;
use super::fields::{clean_currency, first_text, lookup, value_text};
use super::ids::{clean_identifier, record_id, BILL_ID_FIELDS};
use super::NormalizedRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// The portal flattens the category relation under this literal key
const CATEGORY_KEY: &str =
    "biller_categories.bill_category_id.category,' ', sub_category, ' ',billing_category";

const RELATION_FIELDS: &[(&str, &str)] = &[
    ("wmc", "attached_departments.attached_department_id.name"),
    ("division", "divisions.division_id.name"),
    ("district", "districts.district_id.name"),
    ("tehsil", "tehsils.tehsil_id.name"),
    ("office", "new_offices.office_id.name"),
    ("uc_name", "sw_areas.uc_id.name"),
];

/// Payment channel code -> label
pub fn channel_label(code: Option<&str>) -> &'static str {
    match code.map(str::trim) {
        Some("1") => "1Bill",
        Some("2") => "BOP OTC",
        Some("0") => "OTC/Cash",
        _ => "Unknown",
    }
}

fn parent_reference(raw: &Value) -> String {
    let value = ["survey_id", "survey_id_fk"]
        .iter()
        .filter_map(|k| raw.get(*k))
        .find(|v| !v.is_null());
    clean_identifier(value)
}

pub fn normalize_bill(
    raw: &Value,
    base: &Url,
    labels: &BTreeMap<String, String>,
) -> NormalizedRecord {
    let mut record = NormalizedRecord::new(record_id(raw, BILL_ID_FIELDS));

    record.set_text("bill_id", clean_identifier(raw.get("id")));
    record.set_text("psid", clean_identifier(raw.get("psid")));
    record.set_text(
        "bill_month",
        first_text(raw, &["month_str", "bill_month"]).unwrap_or_default(),
    );
    record.set_text("survey_id", parent_reference(raw));

    for (field, path) in RELATION_FIELDS {
        let value = lookup(raw, path)
            .filter(|v| !v.is_empty())
            .or_else(|| labels.get(*field).cloned())
            .unwrap_or_default();
        record.set_text(*field, value);
    }

    record.set_text(
        "billing_category",
        first_text(raw, &[CATEGORY_KEY, "biller_category_id"]).unwrap_or_default(),
    );

    record.set_int("amount_due", clean_currency(raw.get("amount")));
    record.set_int("fine", clean_currency(raw.get("fine")));
    record.set_int("paid_amount", clean_currency(raw.get("paid_amount")));

    let channel = raw.get("channel").and_then(value_text);
    record.set_text("channel", channel_label(channel.as_deref()));

    for field in ["paid_date", "status", "active"] {
        record.set_text(field, first_text(raw, &[field]).unwrap_or_default());
    }

    let bill_url = first_text(raw, &["bill_url"]).unwrap_or_default();
    record.set_text("bill_url", resolve_against_host(&bill_url, base));

    record
}
