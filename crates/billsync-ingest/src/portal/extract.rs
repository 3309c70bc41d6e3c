//! Record-list extraction from listing responses
//!
//! The listing endpoint has shipped several envelope shapes over time. Each
//! extractor below recognizes one of them; the first one that matches wins.
//! A body no extractor recognizes yields no records, which the fetcher reads
//! as the end of the collection.

use serde_json::Value;

type Extractor = fn(&Value) -> Option<&Vec<Value>>;

/// `body.data`, or the body itself when there is no `data` envelope
fn payload(body: &Value) -> &Value {
    body.get("data").unwrap_or(body)
}

fn array_at<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    value.get(key).and_then(Value::as_array)
}

fn listings(body: &Value) -> Option<&Vec<Value>> {
    array_at(payload(body), "listings")
}

fn items(body: &Value) -> Option<&Vec<Value>> {
    array_at(payload(body), "items")
}

fn records(body: &Value) -> Option<&Vec<Value>> {
    array_at(payload(body), "records")
}

fn nested_data(body: &Value) -> Option<&Vec<Value>> {
    array_at(payload(body), "data")
}

fn bare_list(body: &Value) -> Option<&Vec<Value>> {
    payload(body).as_array()
}

/// Last resort: any array of objects that look like records
fn record_like_array(body: &Value) -> Option<&Vec<Value>> {
    payload(body).as_object()?.values().find_map(|v| {
        let arr = v.as_array()?;
        let first = arr.first()?;
        (first.get("id").is_some() || first.get("survey_id").is_some()).then_some(arr)
    })
}

const EXTRACTORS: &[(&str, Extractor)] = &[
    ("listings", listings),
    ("items", items),
    ("records", records),
    ("data", nested_data),
    ("bare", bare_list),
    ("record-like", record_like_array),
];

/// Records carried by a listing response; empty when the shape is unknown
pub fn extract_records(body: &Value) -> Vec<Value> {
    EXTRACTORS
        .iter()
        .find_map(|(name, extract)| {
            extract(body).map(|list| {
                tracing::trace!(shape = name, count = list.len(), "Matched listing shape");
                list.clone()
            })
        })
        .unwrap_or_default()
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Total size of the collection when the portal reports one
pub fn extract_total(body: &Value) -> Option<u64> {
    let data = payload(body);
    const COUNT_KEYS: &[&str] = &["total", "count", "totalCount", "total_count", "totalRecords"];

    data.get("totalInDB")
        .and_then(as_count)
        .or_else(|| {
            let pagination = data.get("pagination")?;
            COUNT_KEYS.iter().find_map(|k| pagination.get(*k).and_then(as_count))
        })
        .or_else(|| COUNT_KEYS.iter().find_map(|k| data.get(*k).and_then(as_count)))
}
