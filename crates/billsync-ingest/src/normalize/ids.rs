//! Identifier cleaning
//!
//! Portal identifiers (survey ids, PSIDs) are long digit strings that pick up
//! float artifacts on their way through spreadsheets and loosely typed JSON:
//! `"123.0"`, `1.2345e17`, `NaN`. Every identifier is stored as a canonical
//! string; anything blank or NaN-like becomes [`INVALID_ID`].

use serde_json::Value;

/// Sentinel for identifiers that are blank or NaN-like
pub const INVALID_ID: &str = "INVALID";

fn is_blank_like(s: &str) -> bool {
    s.is_empty() || matches!(s.to_ascii_lowercase().as_str(), "nan" | "none" | "null")
}

fn float_to_identifier(f: f64) -> String {
    if !f.is_finite() {
        return INVALID_ID.to_string();
    }
    if f.fract() == 0.0 {
        format!("{:.0}", f)
    } else {
        f.to_string()
    }
}

/// Clean a textual identifier
pub fn clean_identifier_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_blank_like(trimmed) {
        return INVALID_ID.to_string();
    }

    if trimmed.contains(['e', 'E']) {
        if let Ok(f) = trimmed.parse::<f64>() {
            return float_to_identifier(f);
        }
    }

    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

/// Clean an identifier taken straight from a JSON payload
pub fn clean_identifier(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => INVALID_ID.to_string(),
        Some(Value::String(s)) => clean_identifier_str(s),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                n.as_f64()
                    .map(float_to_identifier)
                    .unwrap_or_else(|| INVALID_ID.to_string())
            }
        },
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => INVALID_ID.to_string(),
    }
}

pub fn is_valid_identifier(id: &str) -> bool {
    id != INVALID_ID
}

/// Fields carrying a survey's own id
pub const SURVEY_ID_FIELDS: &[&str] = &["id", "survey_id"];

/// A bill's own id; its `survey_id` is the parent reference
pub const BILL_ID_FIELDS: &[&str] = &["id"];

/// Numeric record id used for cursor comparisons, read from the first
/// non-null field in `fields`
pub fn record_id(raw: &Value, fields: &[&str]) -> Option<i64> {
    fields
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| !v.is_null())
        .and_then(|v| clean_identifier(Some(v)).parse().ok())
}
