//! Heuristic schema inference, record coercion against a schema, and the
//! on-disk schema cache.

mod infer;
mod registry;
mod validate;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub(crate) use infer::boolean_like;
pub use infer::{SchemaInferrer, DEFAULT_SAMPLE_SIZE};
pub use registry::{SchemaEntry, SchemaRegistry, DEFAULT_SCHEMA_CACHE};
pub use validate::{validate_records, ValidationSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Numeric,
    Boolean,
    Date,
    Email,
    Url,
    Enum,
    Array,
    Object,
    String,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Numeric => "numeric",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Email => "email",
            FieldKind::Url => "url",
            FieldKind::Enum => "enum",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl FieldSchema {
    pub fn new(kind: FieldKind, optional: bool) -> Self {
        Self {
            kind,
            optional,
            values: Vec::new(),
        }
    }
}

/// Field name to inferred type, in first-seen field order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescription {
    pub fields: IndexMap<String, FieldSchema>,
}

impl SchemaDescription {
    pub fn get(&self, field: &str) -> Option<&FieldSchema> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Human-readable listing, one field per line.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, field) in &self.fields {
            write!(f, "- {name}: {}", field.kind.as_str())?;
            if field.kind == FieldKind::Numeric {
                write!(f, " (auto-coerced)")?;
            }
            if !field.values.is_empty() {
                write!(f, " [{}]", field.values.join(", "))?;
            }
            if field.optional {
                write!(f, " optional")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
