//! Scalar field helpers shared by the survey and bill normalizers

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static SURVEYOR_SEPARATOR: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[/(\-]"));

/// Render a scalar as trimmed text; containers and null yield `None`
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.is_finite() => format!("{:.0}", f),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Text of the first key present with a non-empty scalar value
pub fn first_text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .filter_map(value_text)
        .find(|s| !s.is_empty())
}

/// Flat key first, then the dotted path walked through nested objects
///
/// The portal sometimes flattens relations (`"districts.district_id.name"`
/// as a literal key) and sometimes nests them.
pub fn lookup(raw: &Value, path: &str) -> Option<String> {
    if let Some(flat) = raw.get(path) {
        return value_text(flat);
    }

    let mut current = raw;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    value_text(current)
}

/// Split `"2024-03-01 14:22:05"` into date and time at the first whitespace
///
/// The date part is taken as-is whatever its format. Input without
/// whitespace is all date.
pub fn split_timestamp(raw: &str) -> (String, String) {
    let trimmed = raw.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((date, time)) => (date.to_string(), time.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Split `"31.52, 74.35"` into latitude and longitude; unparsable input yields blanks
pub fn split_gps(raw: &str) -> (String, String) {
    let parsed = raw.split_once(',').and_then(|(lat, long)| {
        let (lat, long) = (lat.trim(), long.trim());
        match (lat.parse::<f64>(), long.parse::<f64>()) {
            (Ok(_), Ok(_)) => Some((lat.to_string(), long.to_string())),
            _ => None,
        }
    });
    parsed.unwrap_or_default()
}

/// Whole currency units; `"-"`, blanks and junk count as zero
pub fn clean_currency(value: Option<&Value>) -> i64 {
    let amount = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let cleaned = s.trim().replace(',', "");
            if cleaned.is_empty() || cleaned == "-" {
                None
            } else {
                cleaned.parse::<f64>().ok()
            }
        },
        _ => None,
    };
    amount
        .filter(|f| f.is_finite())
        .map(|f| f.trunc() as i64)
        .unwrap_or(0)
}

/// Surveyor display name
///
/// `added_by` is used when it is a real name; when it holds a numeric user id
/// the name is cut from `added_by_str` ("Ali Raza / 0300-1234567 (Field)").
pub fn surveyor_name(raw: &Value) -> String {
    if let Some(Value::String(name)) = raw.get("added_by") {
        let name = name.trim();
        if !name.is_empty() && !name.chars().all(|c| c.is_ascii_digit()) {
            return name.to_string();
        }
    }

    let composite = first_text(raw, &["added_by_str"]).unwrap_or_default();
    match SURVEYOR_SEPARATOR.as_ref() {
        Ok(re) => re.split(&composite).next().unwrap_or("").trim().to_string(),
        Err(_) => composite,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hybrid_lookup() {
        let flat = json!({"districts.district_id.name": "Sargodha"});
        let nested = json!({"districts": {"district_id": {"name": "Khushab"}}});
        let broken = json!({"districts": "n/a"});

        assert_eq!(lookup(&flat, "districts.district_id.name").as_deref(), Some("Sargodha"));
        assert_eq!(lookup(&nested, "districts.district_id.name").as_deref(), Some("Khushab"));
        assert_eq!(lookup(&broken, "districts.district_id.name"), None);
    }

    #[test]
    fn test_split_timestamp() {
        assert_eq!(
            split_timestamp("2024-03-01 14:22:05"),
            ("2024-03-01".to_string(), "14:22:05".to_string())
        );
        assert_eq!(split_timestamp("2024-03-01"), ("2024-03-01".to_string(), String::new()));
        assert_eq!(
            split_timestamp("12-Jan-2025 10:15 AM"),
            ("12-Jan-2025".to_string(), "10:15 AM".to_string())
        );
        assert_eq!(
            split_timestamp("  01/12/2025\t09:00  "),
            ("01/12/2025".to_string(), "09:00".to_string())
        );
        assert_eq!(split_timestamp(""), (String::new(), String::new()));
    }

    #[test]
    fn test_split_gps() {
        assert_eq!(
            split_gps("32.0836, 72.6711"),
            ("32.0836".to_string(), "72.6711".to_string())
        );
        assert_eq!(split_gps("unknown"), (String::new(), String::new()));
        assert_eq!(split_gps("north, east"), (String::new(), String::new()));
    }

    #[test]
    fn test_clean_currency() {
        assert_eq!(clean_currency(Some(&json!("1,250"))), 1250);
        assert_eq!(clean_currency(Some(&json!("-"))), 0);
        assert_eq!(clean_currency(Some(&json!(""))), 0);
        assert_eq!(clean_currency(Some(&json!(300.75))), 300);
        assert_eq!(clean_currency(Some(&json!("nan"))), 0);
        assert_eq!(clean_currency(None), 0);
    }

    #[test]
    fn test_surveyor_name() {
        assert_eq!(surveyor_name(&json!({"added_by": "Ali Raza "})), "Ali Raza");
        assert_eq!(
            surveyor_name(&json!({"added_by": "1042", "added_by_str": "Bilal Ahmed / 0300-1234567"})),
            "Bilal Ahmed"
        );
        assert_eq!(
            surveyor_name(&json!({"added_by": 1042, "added_by_str": "Sana (Supervisor)"})),
            "Sana"
        );
        assert_eq!(surveyor_name(&json!({})), "");
    }

    #[test]
    fn test_value_text_drops_float_artifacts() {
        assert_eq!(value_text(&json!(12.0)).as_deref(), Some("12"));
        assert_eq!(value_text(&json!(12.5)).as_deref(), Some("12.5"));
        assert_eq!(value_text(&json!({"a": 1})), None);
    }
}
