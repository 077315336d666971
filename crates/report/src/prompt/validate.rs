use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::RenderContext;
use crate::template::truthy;

pub const STANDARD_SECTIONS: &[&str] = &["bundle", "stats", "metadata"];
pub const MAX_TEXT_LENGTH: usize = 10_000;

static OUTPUT_ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{-?\s*([A-Za-z_]\w*)").expect("valid regex"));
static LOOP_BINDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%-?\s*for\s+([A-Za-z_]\w*)(?:\s*,\s*([A-Za-z_]\w*))?\s+in\b")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(_) => Some(ValueKind::String),
            Value::Number(_) => Some(ValueKind::Number),
            Value::Bool(_) => Some(ValueKind::Boolean),
            Value::Array(_) => Some(ValueKind::Array),
            Value::Object(_) => Some(ValueKind::Object),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }
}

pub fn check_kind(kind: ValueKind, value: &Value) -> bool {
    ValueKind::of(value) == Some(kind)
}

/// Constraints on one named value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableRule {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Non-fatal checks on the inputs a variable resolved. Each entry in `inputs`
/// is a declared dotted path and what it resolved to.
pub fn validate_inputs(
    inputs: &IndexMap<String, Option<Value>>,
    context: &RenderContext,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for (path, value) in inputs {
        let root = path.split('.').next().unwrap_or_default();
        let standard = STANDARD_SECTIONS.contains(&root);
        match value {
            None | Some(Value::Null) if standard => {
                warnings.push(format!("Missing expected field: {path}"))
            }
            None => warnings.push(format!("Unresolved input: {path}")),
            Some(Value::Null) => warnings.push(format!("Null value for: {path}")),
            Some(Value::String(text)) if text.trim().is_empty() => {
                warnings.push(format!("Empty string value for: {path}"))
            }
            Some(_) => {}
        }
    }
    for section in STANDARD_SECTIONS {
        if !context.section(section).is_some_and(truthy) {
            warnings.push(format!("Missing standard section: {section}"));
        }
    }
    warnings
}

/// Hard checks on named values; returns one message per violation.
pub fn validate_variables(
    values: &Map<String, Value>,
    rules: &IndexMap<String, VariableRule>,
) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, rule) in rules {
        let value = match values.get(name) {
            None | Some(Value::Null) => {
                if rule.required {
                    errors.push(format!("Missing required variable: {name}"));
                }
                continue;
            }
            Some(value) => value,
        };
        if let Some(kind) = rule.kind {
            if !check_kind(kind, value) {
                let actual = ValueKind::of(value).map(|k| k.as_str()).unwrap_or("null");
                errors.push(format!(
                    "Variable {name} should be {}, got {actual}",
                    kind.as_str()
                ));
                continue;
            }
        }
        let (length, unit) = match value {
            Value::String(text) => (Some(text.chars().count()), "characters"),
            Value::Array(items) => (Some(items.len()), "items"),
            _ => (None, ""),
        };
        if let Some(length) = length {
            if let Some(min) = rule.min_length {
                if length < min {
                    errors.push(format!("Variable {name} must have at least {min} {unit}"));
                }
            }
            let max = match (value, rule.max_length) {
                (_, Some(max)) => Some(max),
                (Value::String(_), None) => Some(MAX_TEXT_LENGTH),
                _ => None,
            };
            if let Some(max) = max {
                if length > max {
                    errors.push(format!("Variable {name} must have at most {max} {unit}"));
                }
            }
        }
        if let Some(number) = value.as_f64() {
            if let Some(min) = rule.min.filter(|min| number < *min) {
                errors.push(format!("Variable {name} is below the minimum {min:?}"));
            }
            if let Some(max) = rule.max.filter(|max| number > *max) {
                errors.push(format!("Variable {name} is above the maximum {max:?}"));
            }
        }
    }
    errors
}

/// Root names a template prints that `provided` does not supply, in order of
/// first use. Names bound by `for` loops and `loop` itself are ignored.
pub fn missing_template_variables(template: &str, provided: &Map<String, Value>) -> Vec<String> {
    let mut bound: HashSet<&str> = HashSet::from(["loop", "true", "false", "none", "null"]);
    for caps in LOOP_BINDING.captures_iter(template) {
        for group in [caps.get(1), caps.get(2)].into_iter().flatten() {
            bound.insert(group.as_str());
        }
    }
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for caps in OUTPUT_ROOT.captures_iter(template) {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if bound.contains(name) || provided.contains_key(name) || !seen.insert(name) {
            continue;
        }
        missing.push(name.to_string());
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn inputs_warn_without_failing() {
        let context = RenderContext::default();
        let mut inputs = IndexMap::new();
        inputs.insert("stats.revenue".to_string(), None);
        inputs.insert("summary".to_string(), Some(json!("  ")));
        inputs.insert("computedFields.best".to_string(), None);
        inputs.insert("computedFields.total".to_string(), Some(json!(3800)));
        let warnings = validate_inputs(&inputs, &context);
        assert_eq!(
            warnings,
            vec![
                "Missing expected field: stats.revenue",
                "Empty string value for: summary",
                "Unresolved input: computedFields.best",
                "Missing standard section: bundle",
                "Missing standard section: stats",
                "Missing standard section: metadata",
            ]
        );
    }

    #[test]
    fn variable_rules_check_type_length_and_range() {
        let rules: IndexMap<String, VariableRule> = serde_json::from_value(json!({
            "title": {"type": "string", "required": true, "minLength": 3},
            "count": {"type": "number", "min": 1, "max": 10},
            "tags": {"type": "array", "maxLength": 2},
            "flag": {"type": "boolean"}
        }))
        .unwrap();
        let errors = validate_variables(
            &map(json!({"title": "ab", "count": 11, "tags": ["a", "b", "c"], "flag": "yes"})),
            &rules,
        );
        assert_eq!(
            errors,
            vec![
                "Variable title must have at least 3 characters",
                "Variable count is above the maximum 10.0",
                "Variable tags must have at most 2 items",
                "Variable flag should be boolean, got string",
            ]
        );
        let missing = validate_variables(&Map::new(), &rules);
        assert_eq!(missing, vec!["Missing required variable: title"]);
    }

    #[test]
    fn long_text_is_capped_by_default() {
        let mut rules = IndexMap::new();
        rules.insert("body".to_string(), VariableRule::default());
        let long = "x".repeat(MAX_TEXT_LENGTH + 1);
        assert_eq!(validate_variables(&map(json!({"body": long})), &rules).len(), 1);
    }

    #[test]
    fn template_variables_are_checked_against_inputs() {
        let template = "{{ name }} {{ stats.mean | round }} {% for r in rows %}{{ r }}{{ loop.index }}{% endfor %}{{ name }}";
        let missing = missing_template_variables(template, &map(json!({"name": "x"})));
        assert_eq!(missing, vec!["stats"]);
    }
}
