//! Survey answer drilling
//!
//! Answers arrive in one of three shapes depending on the app version that
//! submitted the survey:
//!
//! 1. a native JSON object
//! 2. the same object serialized into a string
//! 3. a legacy `"Key: value | Key2: value2"` string
//!
//! All three collapse to the same list of canonical `(field, value)` pairs.

use serde_json::{Map, Value};

/// Catch-all field for fragments that do not carry a `key: value` pair
pub const ADDITIONAL_INFO: &str = "additional_info";

/// Keys where answers have been observed, in lookup order
const ANSWER_KEYS: &[&str] = &["answers_json", "answers_table", "answers"];

/// Canonical answer field -> stored field
const ALIASES: &[(&str, &str)] = &[
    ("type", "unit_specific_type"),
    ("level", "survey_category"),
    ("name", "survey_consumer_name"),
    ("mobile_num", "survey_mobile"),
    ("mobile_number", "survey_mobile"),
    ("address", "survey_address"),
    ("area", "size_marla"),
];

/// `"House Type"`, `"house_type"` and `"HOUSE-TYPE"` all become `house_type`
pub fn canonical_key(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut key = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            key.push(c);
        } else if !key.ends_with('_') && !key.is_empty() {
            key.push('_');
        }
    }
    let key = key.trim_end_matches('_').to_string();

    ALIASES
        .iter()
        .find(|(from, _)| *from == key)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(key)
}

fn answer_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
        other => super::fields::value_text(other).unwrap_or_default(),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

#[derive(Default)]
struct Drilled {
    pairs: Vec<(String, String)>,
    extra: Vec<String>,
}

impl Drilled {
    fn push(&mut self, key: &str, value: String) {
        let key = canonical_key(key);
        if key.is_empty() || key == ADDITIONAL_INFO {
            self.extra.push(value);
        } else {
            self.pairs.push((key, value));
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        let mut drilled = Self::default();
        for (key, value) in map {
            drilled.push(key, answer_value_text(value));
        }
        drilled
    }

    fn from_delimited(text: &str) -> Self {
        let mut drilled = Self::default();
        for fragment in text.split('|').map(str::trim).filter(|f| !f.is_empty()) {
            match fragment.split_once(':') {
                Some((key, value)) => drilled.push(key, value.trim().to_string()),
                None => drilled.extra.push(fragment.to_string()),
            }
        }
        drilled
    }

    fn finish(mut self) -> Vec<(String, String)> {
        let extra: Vec<String> = self
            .extra
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !extra.is_empty() {
            self.pairs.push((ADDITIONAL_INFO.to_string(), extra.join(" ")));
        }
        self.pairs
    }
}

/// Extract canonical answer fields from a raw survey record
pub fn drill_answers(raw: &Value) -> Vec<(String, String)> {
    let Some(answers) = ANSWER_KEYS
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| is_present(v))
    else {
        return Vec::new();
    };

    let drilled = match answers {
        Value::Object(map) => Drilled::from_object(map),
        Value::String(text) => {
            let text = text.trim();
            let parsed = if text.starts_with('{') {
                serde_json::from_str::<Map<String, Value>>(text).ok()
            } else {
                None
            };
            match parsed {
                Some(map) => Drilled::from_object(&map),
                None => Drilled::from_delimited(text),
            }
        },
        other => Drilled {
            pairs: Vec::new(),
            extra: vec![other.to_string()],
        },
    };

    drilled.finish()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sorted(mut pairs: Vec<(String, String)>) -> Vec<(String, String)> {
        pairs.sort();
        pairs
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("House Type"), "house_type");
        assert_eq!(canonical_key("HOUSE TYPE"), "house_type");
        assert_eq!(canonical_key(" house_type "), "house_type");
        assert_eq!(canonical_key("Mobile Num"), "survey_mobile");
        assert_eq!(canonical_key("Water  Connection?"), "water_connection");
    }

    #[test]
    fn test_three_shapes_agree() {
        let native = json!({"answers_json": {"House Type": "Pakka", "Name": "Ali", "Area": "5"}});
        let encoded = json!({"answers_table": "{\"house_type\": \"Pakka\", \"NAME\": \"Ali\", \"area\": \"5\"}"});
        let legacy = json!({"answers": "House Type: Pakka | Name: Ali | Area: 5"});

        let expected = sorted(drill_answers(&native));
        assert_eq!(expected.len(), 3);
        assert_eq!(sorted(drill_answers(&encoded)), expected);
        assert_eq!(sorted(drill_answers(&legacy)), expected);
    }

    #[test]
    fn test_unkeyed_fragments_go_to_additional_info() {
        let raw = json!({"answers": "Name: Ali | corner plot | near mosque"});
        let pairs = drill_answers(&raw);
        assert!(pairs.contains(&("survey_consumer_name".into(), "Ali".into())));
        assert!(pairs.contains(&(ADDITIONAL_INFO.into(), "corner plot near mosque".into())));
    }

    #[test]
    fn test_value_containing_colon_keeps_remainder() {
        let pairs = drill_answers(&json!({"answers": "Visit Time: 10:30"}));
        assert_eq!(pairs, vec![("visit_time".to_string(), "10:30".to_string())]);
    }

    #[test]
    fn test_empty_keys_are_skipped() {
        let raw = json!({"answers_json": {}, "answers": "Level: A"});
        assert_eq!(
            drill_answers(&raw),
            vec![("survey_category".to_string(), "A".to_string())]
        );
    }

    #[test]
    fn test_broken_json_string_falls_back_to_delimiters() {
        let raw = json!({"answers": "{not json: really"});
        let pairs = drill_answers(&raw);
        assert_eq!(pairs, vec![("not_json".to_string(), "really".to_string())]);
    }

    #[test]
    fn test_nested_values_serialized() {
        let raw = json!({"answers_json": {"rooms": [1, 2]}});
        assert_eq!(drill_answers(&raw), vec![("rooms".to_string(), "[1,2]".to_string())]);
    }

    #[test]
    fn test_missing_answers() {
        assert!(drill_answers(&json!({"id": 1})).is_empty());
    }
}
