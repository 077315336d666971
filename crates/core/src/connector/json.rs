use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::{DprocError, Result};
use crate::record::Record;

pub fn load_json(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)?;
    parse_json_at(path, &text)
}

pub fn parse_json_str(text: &str) -> Result<Vec<Record>> {
    parse_json_at(Path::new("<inline>"), text)
}

fn parse_json_at(path: &Path, text: &str) -> Result<Vec<Record>> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => records_from_value(path, value),
        Err(err) => parse_ndjson(path, text).ok_or_else(|| DprocError::parse(path, err.to_string())),
    }
}

/// Accepts an array of objects, `{records: [...]}`, `{data: [...]}` or a single object.
fn records_from_value(path: &Path, value: Value) -> Result<Vec<Record>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(DprocError::parse(
                    path,
                    format!("element {idx} is not an object: {other}"),
                )),
            })
            .collect(),
        Value::Object(mut map) => {
            for key in ["records", "data"] {
                if matches!(map.get(key), Some(Value::Array(_))) {
                    if let Some(inner) = map.remove(key) {
                        return records_from_value(path, inner);
                    }
                }
            }
            Ok(vec![map])
        }
        other => Err(DprocError::parse(
            path,
            format!("expected an array or object, found {other}"),
        )),
    }
}

fn parse_ndjson(path: &Path, text: &str) -> Option<Vec<Record>> {
    let mut records = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line).ok()? {
            Value::Object(map) => records.push(map),
            _ => return None,
        }
    }
    if records.is_empty() {
        return None;
    }
    tracing::debug!(path = %path.display(), "parsed newline-delimited JSON");
    Some(records)
}
