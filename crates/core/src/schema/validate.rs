use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::infer::{boolean_like, EMAIL_RE, URL_RE};
use super::{FieldKind, FieldSchema, SchemaDescription};
use crate::normalize::parse_date;
use crate::record::{as_number, display_value, is_blank, number_value, Record};

const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Coerces each record against `schema`. A record with any failing field is kept
/// exactly as it came in and counted as invalid.
pub fn validate_records(
    records: &[Record],
    schema: &SchemaDescription,
) -> (Vec<Record>, ValidationSummary) {
    let mut summary = ValidationSummary {
        total_records: records.len(),
        ..ValidationSummary::default()
    };
    let mut out = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        match coerce_record(record, schema) {
            Ok(coerced) => {
                summary.valid_records += 1;
                out.push(coerced);
            }
            Err(message) => {
                summary.invalid_records += 1;
                if summary.errors.len() < MAX_REPORTED_ERRORS {
                    summary.errors.push(format!("record {idx}: {message}"));
                }
                out.push(record.clone());
            }
        }
    }
    if summary.invalid_records > 0 {
        warn!(
            invalid = summary.invalid_records,
            total = summary.total_records,
            "records kept with validation warnings"
        );
    }
    (out, summary)
}

fn coerce_record(record: &Record, schema: &SchemaDescription) -> Result<Record, String> {
    let mut coerced = record.clone();
    for (name, field) in &schema.fields {
        let value = record.get(name);
        if is_blank(value) {
            if field.optional {
                continue;
            }
            return Err(format!("missing required field '{name}'"));
        }
        if let Some(value) = value {
            let next = coerce_value(value, field)
                .ok_or_else(|| format!("field '{name}' is not a valid {}", field.kind.as_str()))?;
            coerced.insert(name.clone(), next);
        }
    }
    Ok(coerced)
}

fn coerce_value(value: &Value, field: &FieldSchema) -> Option<Value> {
    match field.kind {
        FieldKind::Numeric => as_number(value).map(number_value),
        FieldKind::Boolean => boolean_like(value).map(Value::Bool),
        FieldKind::Date => match value {
            Value::String(text) => parse_date(text).map(|_| value.clone()),
            _ => None,
        },
        FieldKind::Email => match value {
            Value::String(text) if EMAIL_RE.is_match(text.trim()) => Some(value.clone()),
            _ => None,
        },
        FieldKind::Url => match value {
            Value::String(text) if URL_RE.is_match(text.trim()) => Some(value.clone()),
            _ => None,
        },
        FieldKind::Enum => {
            let text = display_value(value);
            field.values.contains(&text).then(|| value.clone())
        }
        FieldKind::Array => value.is_array().then(|| value.clone()),
        FieldKind::Object => value.is_object().then(|| value.clone()),
        FieldKind::String => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaInferrer;
    use serde_json::json;

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn coerces_numeric_strings() {
        let rows = records(json!([{"qty": "3", "ok": "yes"}, {"qty": 4, "ok": false}]));
        let schema = SchemaInferrer::default().infer(&rows).unwrap();
        let (out, summary) = validate_records(&rows, &schema);
        assert_eq!(summary.valid_records, 2);
        assert_eq!(out[0]["qty"], json!(3));
        assert_eq!(out[0]["ok"], json!(true));
    }

    #[test]
    fn failing_records_are_kept_verbatim() {
        let sample = records(json!([{"qty": "3"}, {"qty": "4"}]));
        let schema = SchemaInferrer::default().infer(&sample).unwrap();
        let rows = records(json!([{"qty": "5"}, {"qty": "many"}, {"other": 1}]));
        let (out, summary) = validate_records(&rows, &schema);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["qty"], json!(5));
        assert_eq!(out[1]["qty"], json!("many"));
        assert_eq!(out[2], rows[2]);
        assert_eq!(summary.invalid_records, 2);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[1].contains("missing required field 'qty'"));
    }
}
