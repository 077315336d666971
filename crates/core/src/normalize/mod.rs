//! Pattern-based field cleanup applied record by record.
//!
//! Routing is decided from the lowercased field name first and the value shape
//! second, with a fixed precedence: date, numeric, percent, array, text.

mod date;
mod numeric;
mod text;

use serde_json::Value;

use crate::record::{display_value, Record};

pub use date::{looks_like_date, normalize_date, parse_date, to_iso};
pub use numeric::{normalize_numeric, normalize_percent};
pub use text::{clean_abstract, clean_text};

const DATE_KEYS: &[&str] = &[
    "date",
    "time",
    "created",
    "updated",
    "published",
    "filing",
    "grant",
];
const NUMERIC_KEYS: &[&str] = &[
    "count", "amount", "price", "cost", "revenue", "total", "beds", "staff", "sum", "avg",
    "number",
];
const PERCENT_KEYS: &[&str] = &["percent", "rate", "ratio"];
const ARRAY_KEYS: &[&str] = &[
    "mesh",
    "cpc",
    "ipc",
    "tags",
    "keywords",
    "authors",
    "inventors",
];
const TEXT_KEYS: &[&str] = &["title", "description", "abstract", "text", "name"];
const PARAGRAPH_KEYS: &[&str] = &["abstract", "description"];
const LIST_DELIMITERS: &[char] = &[',', ';', '|'];
const LONG_TEXT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRoute {
    Date,
    Numeric,
    Percent,
    Array,
    Text { paragraph: bool },
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoNormalizer;

impl AutoNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, key: &str, value: &Value) -> FieldRoute {
        let key = key.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|kw| key.contains(kw));
        if has(DATE_KEYS) {
            return FieldRoute::Date;
        }
        if has(NUMERIC_KEYS) {
            return FieldRoute::Numeric;
        }
        if has(PERCENT_KEYS) || key.ends_with("_pct") {
            return FieldRoute::Percent;
        }
        let delimited = matches!(value, Value::String(s) if s.contains(LIST_DELIMITERS));
        if value.is_array() || has(ARRAY_KEYS) || delimited {
            return FieldRoute::Array;
        }
        if let Value::String(text) = value {
            if has(TEXT_KEYS) || text.chars().count() > LONG_TEXT_CHARS {
                return FieldRoute::Text {
                    paragraph: has(PARAGRAPH_KEYS),
                };
            }
        }
        FieldRoute::Unchanged
    }

    pub fn normalize_field(&self, key: &str, value: &Value) -> Value {
        match self.route(key, value) {
            FieldRoute::Date => normalize_date(value),
            FieldRoute::Numeric => normalize_numeric(value),
            FieldRoute::Percent => normalize_percent(value),
            FieldRoute::Array => normalize_array(value),
            FieldRoute::Text { paragraph } => match value {
                Value::String(text) if paragraph => Value::String(clean_abstract(text)),
                Value::String(text) => Value::String(clean_text(text)),
                other => other.clone(),
            },
            FieldRoute::Unchanged => value.clone(),
        }
    }

    pub fn normalize_record(&self, record: &Record) -> Record {
        record
            .iter()
            .map(|(key, value)| (key.clone(), self.normalize_field(key, value)))
            .collect()
    }

    pub fn normalize_records(&self, records: &[Record]) -> Vec<Record> {
        records
            .iter()
            .map(|record| self.normalize_record(record))
            .collect()
    }
}

fn normalize_array(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| display_value(item).trim().to_string())
                .filter(|item| !item.is_empty())
                .map(Value::String)
                .collect(),
        ),
        Value::String(text) => {
            let delimiter = LIST_DELIMITERS
                .iter()
                .copied()
                .find(|d| text.contains(*d))
                .unwrap_or(',');
            Value::Array(
                text.split(delimiter)
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn routes_follow_precedence() {
        let normalizer = AutoNormalizer::new();
        // "updated_count" hits both date and numeric keywords; date wins.
        assert_eq!(
            normalizer.route("updated_count", &json!("3")),
            FieldRoute::Date
        );
        assert_eq!(
            normalizer.route("total_rate", &json!("3")),
            FieldRoute::Numeric
        );
        assert_eq!(
            normalizer.route("growth_pct", &json!("3%")),
            FieldRoute::Percent
        );
        assert_eq!(
            normalizer.route("region", &json!("north, south")),
            FieldRoute::Array
        );
        assert_eq!(
            normalizer.route("title", &json!("Plain")),
            FieldRoute::Text { paragraph: false }
        );
        assert_eq!(
            normalizer.route("abstract", &json!("Plain")),
            FieldRoute::Text { paragraph: true }
        );
        assert_eq!(normalizer.route("region", &json!("north")), FieldRoute::Unchanged);
    }

    #[test]
    fn normalizes_a_mixed_record() {
        let normalizer = AutoNormalizer::new();
        let out = normalizer.normalize_record(&record(json!({
            "date": "2025-01-01",
            "product": "Widget A",
            "revenue": "$1,500",
            "conversion_rate": "12.5%",
            "tags": "alpha; beta ;",
            "title": "  Big <i>launch</i> [3] ",
        })));
        assert_eq!(out["date"], json!("2025-01-01T00:00:00.000Z"));
        assert_eq!(out["product"], json!("Widget A"));
        assert_eq!(out["revenue"], json!(1500));
        assert_eq!(out["conversion_rate"], json!(0.125));
        assert_eq!(out["tags"], json!(["alpha", "beta"]));
        assert_eq!(out["title"], json!("Big launch"));
        let keys: Vec<_> = out.keys().cloned().collect();
        assert_eq!(keys[0], "date");
    }

    #[test]
    fn comma_has_delimiter_priority() {
        let normalizer = AutoNormalizer::new();
        let out = normalizer.normalize_field("keywords", &json!("a;b, c;d"));
        assert_eq!(out, json!(["a;b", "c;d"]));
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let normalizer = AutoNormalizer::new();
        let first = normalizer.normalize_records(&[record(json!({
            "published": "03/15/2024",
            "price": "£10",
            "authors": ["Ada ", " Grace", ""],
            "body_text": "A   very long piece of text that keeps going well past fifty characters.",
        }))]);
        let second = normalizer.normalize_records(&first);
        assert_eq!(first, second);
        assert_eq!(first[0]["authors"], json!(["Ada", "Grace"]));
    }
}
