use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::connector::load_records;
use crate::error::{DprocError, Result};
use crate::formula::FormulaEngine;
use crate::normalize::AutoNormalizer;
use crate::record::Record;
use crate::schema::{validate_records, SchemaInferrer, SchemaRegistry, ValidationSummary};
use crate::stats::{basic_stats, BundleStats, StatsCalculator};

const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub ingested_at: String,
    pub source_file: String,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Samples {
    pub main: Vec<Record>,
}

/// One loaded dataset with the stats computed from exactly these records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub source: String,
    pub records: Vec<Record>,
    pub stats: BundleStats,
    pub metadata: BundleMetadata,
    pub samples: Samples,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedBundle {
    #[serde(flatten)]
    pub bundle: Bundle,
    #[serde(rename = "customFields")]
    pub custom_fields: IndexMap<String, Value>,
    #[serde(rename = "computedFields")]
    pub computed_fields: IndexMap<String, Value>,
}

impl std::ops::Deref for EnrichedBundle {
    type Target = Bundle;

    fn deref(&self) -> &Bundle {
        &self.bundle
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedField {
    pub name: String,
    pub function: String,
}

#[derive(Debug, Clone, Default)]
pub struct BundleLoader {
    normalizer: AutoNormalizer,
    inferrer: SchemaInferrer,
    calculator: StatsCalculator,
    formulas: FormulaEngine,
    registry: Option<Arc<SchemaRegistry>>,
}

impl BundleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::default()
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.inferrer = SchemaInferrer::new(sample_size);
        self
    }

    pub fn registry(&self) -> Option<&Arc<SchemaRegistry>> {
        self.registry.as_ref()
    }

    pub fn load(&self, path: &Path) -> Result<Bundle> {
        let records = load_records(path)?;
        self.from_records(&path.display().to_string(), records)
    }

    /// Builds a bundle from records already in memory. Empty input is rejected.
    pub fn from_records(&self, source: &str, records: Vec<Record>) -> Result<Bundle> {
        if records.is_empty() {
            return Err(DprocError::EmptyDataset);
        }
        let stats = basic_stats(&records);
        Ok(assemble(source, records, stats))
    }

    pub fn load_with_processing(&self, path: &Path) -> Result<Bundle> {
        let records = load_records(path)?;
        self.process_records(&path.display().to_string(), records)
    }

    /// Normalize, infer and register a schema, coerce records against it, then
    /// compute stats over the final record array.
    pub fn process_records(&self, source: &str, records: Vec<Record>) -> Result<Bundle> {
        if records.is_empty() {
            return Err(DprocError::EmptyDataset);
        }
        let normalized = self.normalizer.normalize_records(&records);
        let schema = self.inferrer.infer(&normalized)?;
        let schema_id = match &self.registry {
            Some(registry) => Some(registry.register(&schema, source, normalized.len())?),
            None => None,
        };
        let (validated, summary) = validate_records(&normalized, &schema);
        let stats = basic_stats(&validated).with_enhanced(self.calculator.calculate(&validated));
        info!(
            source,
            records = validated.len(),
            invalid = summary.invalid_records,
            schema_id = schema_id.as_deref().unwrap_or("-"),
            "dataset processed"
        );
        let mut bundle = assemble(source, validated, stats);
        bundle.metadata.schema_id = schema_id;
        bundle.metadata.validation = Some(summary);
        bundle.metadata.normalized = Some(true);
        Ok(bundle)
    }

    /// Attaches custom fields verbatim and evaluates computed fields in order.
    /// The first failing formula aborts enrichment, naming its field.
    pub fn enrich(
        &self,
        bundle: Bundle,
        custom: &[CustomField],
        computed: &[ComputedField],
    ) -> Result<EnrichedBundle> {
        let custom_fields = custom
            .iter()
            .map(|field| (field.name.clone(), field.value.clone()))
            .collect();
        let mut computed_fields = IndexMap::new();
        for field in computed {
            let value = self
                .formulas
                .evaluate(&field.function, &bundle.records)
                .map_err(|err| DprocError::Formula {
                    field: field.name.clone(),
                    message: err.to_string(),
                })?;
            debug!(field = %field.name, formula = %field.function, "computed field evaluated");
            computed_fields.insert(field.name.clone(), value.to_value());
        }
        Ok(EnrichedBundle {
            bundle,
            custom_fields,
            computed_fields,
        })
    }
}

fn assemble(source: &str, records: Vec<Record>, stats: BundleStats) -> Bundle {
    let samples = Samples {
        main: records.iter().take(SAMPLE_ROWS).cloned().collect(),
    };
    Bundle {
        source: source.to_string(),
        metadata: BundleMetadata {
            ingested_at: Utc::now().to_rfc3339(),
            source_file: source.to_string(),
            record_count: records.len(),
            schema_id: None,
            validation: None,
            normalized: None,
        },
        records,
        stats,
        samples,
    }
}
