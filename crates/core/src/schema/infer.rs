use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{FieldKind, FieldSchema, SchemaDescription};
use crate::error::{DprocError, Result};
use crate::normalize::looks_like_date;
use crate::record::{as_number, display_value, is_blank, Record};

pub const DEFAULT_SAMPLE_SIZE: usize = 100;

const EMAIL_SHARE: f64 = 0.9;
const URL_SHARE: f64 = 0.9;
const DATE_SHARE: f64 = 0.8;
const ENUM_MAX_DISTINCT: usize = 10;

pub(crate) static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));
pub(crate) static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)https?://[^\s/$.?#][^\s]*$").expect("valid regex"));

pub(crate) fn boolean_like(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaInferrer {
    sample_size: usize,
}

impl Default for SchemaInferrer {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

impl SchemaInferrer {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.max(1),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Classifies every field seen in the first `sample_size` records.
    pub fn infer(&self, records: &[Record]) -> Result<SchemaDescription> {
        if records.is_empty() {
            return Err(DprocError::EmptyDataset);
        }
        let sample = &records[..records.len().min(self.sample_size)];
        let mut field_names: IndexMap<&str, ()> = IndexMap::new();
        for record in sample {
            for key in record.keys() {
                field_names.entry(key.as_str()).or_insert(());
            }
        }
        let mut description = SchemaDescription::default();
        for name in field_names.keys() {
            let field = classify_field(name, sample);
            debug!(field = %name, kind = field.kind.as_str(), "inferred field type");
            description.fields.insert(name.to_string(), field);
        }
        Ok(description)
    }
}

fn classify_field(name: &str, sample: &[Record]) -> FieldSchema {
    let mut optional = false;
    let mut values = Vec::new();
    for record in sample {
        let value = record.get(name);
        if is_blank(value) {
            optional = true;
        } else if let Some(value) = value {
            values.push(value);
        }
    }
    if values.is_empty() {
        return FieldSchema::new(FieldKind::String, true);
    }
    let kind = if values.iter().all(|v| v.is_array()) {
        FieldKind::Array
    } else if values.iter().all(|v| v.is_object()) {
        FieldKind::Object
    } else if values.iter().all(|v| as_number(v).is_some()) {
        FieldKind::Numeric
    } else if values.iter().all(|v| boolean_like(v).is_some()) {
        FieldKind::Boolean
    } else {
        let texts: Vec<String> = values.iter().map(|v| display_value(v)).collect();
        let share = |pred: &dyn Fn(&str) -> bool| {
            texts.iter().filter(|t| pred(t.trim())).count() as f64 / texts.len() as f64
        };
        if share(&|t| EMAIL_RE.is_match(t)) >= EMAIL_SHARE {
            FieldKind::Email
        } else if share(&|t| URL_RE.is_match(t)) >= URL_SHARE {
            FieldKind::Url
        } else if share(&|t| looks_like_date(t)) >= DATE_SHARE {
            FieldKind::Date
        } else {
            let mut seen = HashSet::new();
            let distinct: Vec<String> = texts
                .iter()
                .filter(|t| seen.insert(t.as_str()))
                .cloned()
                .collect();
            if distinct.len() <= ENUM_MAX_DISTINCT && (distinct.len() as f64) < sample.len() as f64 * 0.5 {
                let mut field = FieldSchema::new(FieldKind::Enum, optional);
                field.values = distinct;
                return field;
            }
            FieldKind::String
        }
    };
    FieldSchema::new(kind, optional)
}
