use indexmap::IndexMap;
use serde_json::{Map, Value};

use dproc_core::EnrichedBundle;

use crate::error::Result;

pub const WHOLE_CONTEXT: &[&str] = &["context", "ctx"];

/// Names reserved for built-in sections; report variables may not reuse them.
pub const SECTION_NAMES: &[&str] = &[
    "reportName",
    "author",
    "bundle",
    "customFields",
    "computedFields",
    "stats",
    "metadata",
    "column_stats",
    "distributions",
    "ranges",
    "record_count",
    "schema_id",
    "normalized",
    "context",
    "ctx",
];

/// What the first segment of a dotted input path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot<'a> {
    Context,
    Section(&'a str),
    Variable(&'a str),
    Unknown(&'a str),
}

/// Context accumulated during one generation run: fixed sections built from the
/// bundle, then resolved variables in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    sections: IndexMap<String, Value>,
    variables: IndexMap<String, Value>,
}

impl RenderContext {
    pub fn new(report_name: &str, author: &str, bundle: &EnrichedBundle) -> Result<Self> {
        let mut sections = IndexMap::new();
        sections.insert("reportName".to_string(), Value::from(report_name));
        sections.insert("author".to_string(), Value::from(author));
        sections.insert("bundle".to_string(), serde_json::to_value(bundle)?);
        sections.insert(
            "customFields".to_string(),
            serde_json::to_value(&bundle.custom_fields)?,
        );
        sections.insert(
            "computedFields".to_string(),
            serde_json::to_value(&bundle.computed_fields)?,
        );
        sections.insert("stats".to_string(), serde_json::to_value(&bundle.stats)?);
        sections.insert(
            "metadata".to_string(),
            serde_json::to_value(&bundle.metadata)?,
        );
        let enhanced = bundle.stats.enhanced.as_ref();
        sections.insert(
            "column_stats".to_string(),
            enhanced
                .map(|stats| serde_json::to_value(&stats.columns))
                .transpose()?
                .unwrap_or_else(|| Value::Object(Map::new())),
        );
        sections.insert(
            "distributions".to_string(),
            enhanced
                .map(|stats| serde_json::to_value(&stats.distributions))
                .transpose()?
                .unwrap_or_else(|| Value::Object(Map::new())),
        );
        sections.insert(
            "ranges".to_string(),
            enhanced
                .map(|stats| serde_json::to_value(&stats.ranges))
                .transpose()?
                .unwrap_or_else(|| Value::Object(Map::new())),
        );
        sections.insert(
            "record_count".to_string(),
            Value::from(bundle.metadata.record_count),
        );
        sections.insert(
            "schema_id".to_string(),
            bundle
                .metadata
                .schema_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        sections.insert(
            "normalized".to_string(),
            Value::Bool(bundle.metadata.normalized.unwrap_or(false)),
        );
        Ok(Self {
            sections,
            variables: IndexMap::new(),
        })
    }

    /// Adds a free-form section, e.g. the `analysis` of a library prompt run.
    pub fn set_section(&mut self, name: impl Into<String>, value: Value) {
        self.sections.insert(name.into(), value);
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    pub fn insert_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }

    pub fn classify<'a>(&self, head: &'a str) -> PathRoot<'a> {
        if WHOLE_CONTEXT.contains(&head) {
            PathRoot::Context
        } else if self.sections.contains_key(head) {
            PathRoot::Section(head)
        } else if self.variables.contains_key(head) {
            PathRoot::Variable(head)
        } else {
            PathRoot::Unknown(head)
        }
    }

    /// Resolves `section.a.b`, `variable.0.x` or `context.section.a`.
    /// Numeric segments index into arrays. Missing paths are `None`.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.').map(str::trim).filter(|s| !s.is_empty());
        let head = segments.next()?;
        match self.classify(head) {
            PathRoot::Context => {
                let rest: Vec<&str> = segments.collect();
                match rest.split_first() {
                    None => Some(self.to_value()),
                    Some((next, tail)) => {
                        let root = self.sections.get(*next).or_else(|| self.variables.get(*next))?;
                        walk(root, tail.iter().copied()).cloned()
                    }
                }
            }
            PathRoot::Section(name) => walk(self.sections.get(name)?, segments).cloned(),
            PathRoot::Variable(name) => walk(self.variables.get(name)?, segments).cloned(),
            PathRoot::Unknown(_) => None,
        }
    }

    /// Flat view: sections first, then variables.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.sections.len() + self.variables.len());
        for (key, value) in self.sections.iter().chain(self.variables.iter()) {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

fn walk<'v, 's>(root: &'v Value, segments: impl Iterator<Item = &'s str>) -> Option<&'v Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dproc_core::{BundleLoader, ComputedField, CustomField, Record};
    use serde_json::json;

    fn sample_bundle() -> EnrichedBundle {
        let records: Vec<Record> = vec![
            json!({"date": "2025-01-01", "product": "Widget A", "revenue": "1500"}),
            json!({"date": "2025-01-02", "product": "Gadget B", "revenue": "2300"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let loader = BundleLoader::new();
        let bundle = loader.process_records("inline", records).unwrap();
        loader
            .enrich(
                bundle,
                &[CustomField {
                    name: "quarter".into(),
                    value: json!("Q1"),
                }],
                &[ComputedField {
                    name: "total".into(),
                    function: "SUM(revenue)".into(),
                }],
            )
            .unwrap()
    }

    #[test]
    fn sections_resolve_by_dotted_path() {
        let ctx = RenderContext::new("Sales", "Ops", &sample_bundle()).unwrap();
        assert_eq!(ctx.resolve("computedFields.total"), Some(json!(3800)));
        assert_eq!(ctx.resolve("customFields.quarter"), Some(json!("Q1")));
        assert_eq!(ctx.resolve("record_count"), Some(json!(2)));
        assert_eq!(ctx.resolve("bundle.records.1.product"), Some(json!("Gadget B")));
        assert_eq!(ctx.resolve("ctx.reportName"), Some(json!("Sales")));
        assert_eq!(ctx.resolve("context.computedFields.total"), Some(json!(3800)));
        assert!(ctx.resolve("column_stats.revenue").is_some());
        assert_eq!(ctx.resolve("bundle.records.9"), None);
        assert_eq!(ctx.resolve("nothing.here"), None);
    }

    #[test]
    fn variables_follow_sections() {
        let mut ctx = RenderContext::new("Sales", "Ops", &sample_bundle()).unwrap();
        ctx.insert_variable("summary", json!("Revenue grew."));
        ctx.insert_variable("risks", json!(["churn", "supply"]));
        assert_eq!(ctx.classify("summary"), PathRoot::Variable("summary"));
        assert_eq!(ctx.classify("stats"), PathRoot::Section("stats"));
        assert_eq!(ctx.classify("ctx"), PathRoot::Context);
        assert_eq!(ctx.resolve("risks.1"), Some(json!("supply")));
        assert_eq!(ctx.resolve("context.summary"), Some(json!("Revenue grew.")));

        let flat = ctx.to_value();
        let keys: Vec<&String> = flat.as_object().unwrap().keys().collect();
        assert_eq!(keys.first().map(|k| k.as_str()), Some("reportName"));
        assert_eq!(keys.last().map(|k| k.as_str()), Some("risks"));
    }
}
