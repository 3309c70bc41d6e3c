//! Survey submission normalization

use super::answers::drill_answers;
use super::attachments::attachment_urls;
use super::fields::{first_text, lookup, split_gps, split_timestamp, surveyor_name};
use super::ids::{clean_identifier, record_id, SURVEY_ID_FIELDS};
use super::NormalizedRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

pub const CONSUMER_DOMESTIC: &str = "Domestic";
pub const CONSUMER_COMMERCIAL: &str = "Commercial";

/// Area name fields: (stored field, nested payload path)
const AREA_FIELDS: &[(&str, &str)] = &[
    ("district", "districts.district_id.name"),
    ("tehsil", "tehsils.tehsil_id.name"),
    ("uc_name", "sw_areas.uc_id.name"),
];

/// Units without a house type on the survey are commercial premises
pub fn consumer_type(house_type: Option<&str>) -> &'static str {
    let house_type = house_type.map(str::trim).unwrap_or("");
    let blank = house_type.is_empty()
        || house_type.eq_ignore_ascii_case("nan")
        || house_type.eq_ignore_ascii_case("none");
    if blank {
        CONSUMER_COMMERCIAL
    } else {
        CONSUMER_DOMESTIC
    }
}

pub fn normalize_survey(
    raw: &Value,
    base: &Url,
    labels: &BTreeMap<String, String>,
) -> NormalizedRecord {
    let mut record = NormalizedRecord::new(record_id(raw, SURVEY_ID_FIELDS));

    // Answers go in first so that a stray answer key can never shadow a core field
    for (field, value) in drill_answers(raw) {
        record.set_text(field, value);
    }

    let id_value = SURVEY_ID_FIELDS
        .iter()
        .filter_map(|k| raw.get(*k))
        .find(|v| !v.is_null());
    record.set_text("survey_id", clean_identifier(id_value));
    record.set_text("surveyor_name", surveyor_name(raw));

    let (date, time) = split_timestamp(&first_text(raw, &["added_date_time"]).unwrap_or_default());
    record.set_text("survey_date", date);
    record.set_text("survey_time", time);

    let location = first_text(raw, &["location"]).unwrap_or_default();
    let (lat, long) = split_gps(&location);
    record.set_text("gps_lat", lat);
    record.set_text("gps_long", long);
    record.set_text("gps_full_string", location);

    for (field, path) in AREA_FIELDS {
        let value = lookup(raw, path)
            .filter(|v| !v.is_empty())
            .or_else(|| labels.get(*field).cloned())
            .unwrap_or_default();
        record.set_text(*field, value);
    }

    record.set_text("uc_type", first_text(raw, &["uc_type"]).unwrap_or_default());
    record.set_text("image_portal_url", attachment_urls(raw, base).join(" | "));

    let derived = consumer_type(record.text("house_type"));
    record.set_text("consumer_type", derived);

    record
}
