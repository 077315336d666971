use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use dproc_core::{extract_list, BundleLoader, ComputedField};
use dproc_llm::{GenerateRequest, TextGenerator};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{ReportError, Result};
use crate::prompt::PromptBuilder;

/// What a processor gets besides its inputs.
#[derive(Clone)]
pub struct ProcessorContext {
    pub execution_id: String,
    /// Scratch directory owned by this execution.
    pub workspace: PathBuf,
    pub llm: Arc<dyn TextGenerator>,
}

/// Turns validated pipeline inputs into the data its template renders.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, inputs: &Map<String, Value>, context: &ProcessorContext)
        -> anyhow::Result<Value>;
}

/// Processors addressable by name from a pipeline definition.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `dataset-summary` and `echo`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("dataset-summary", Arc::new(DatasetSummaryProcessor::default()));
        registry.register("echo", Arc::new(EchoProcessor));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        self.processors.insert(name.into(), processor);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Processor>> {
        self.processors
            .get(name)
            .cloned()
            .ok_or_else(|| ReportError::UnknownProcessor(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Returns the inputs unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn process(
        &self,
        inputs: &Map<String, Value>,
        _context: &ProcessorContext,
    ) -> anyhow::Result<Value> {
        Ok(Value::Object(inputs.clone()))
    }
}

/// Loads `inputs.dataset`, evaluates any `inputs.computed` formulas and asks
/// the model for insights on the result.
#[derive(Debug, Clone, Default)]
pub struct DatasetSummaryProcessor {
    loader: BundleLoader,
}

impl DatasetSummaryProcessor {
    pub fn new(loader: BundleLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl Processor for DatasetSummaryProcessor {
    async fn process(
        &self,
        inputs: &Map<String, Value>,
        context: &ProcessorContext,
    ) -> anyhow::Result<Value> {
        let dataset = inputs
            .get("dataset")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("input `dataset` must be a file path"))?;
        let computed: Vec<ComputedField> = match inputs.get("computed") {
            Some(value) if !value.is_null() => serde_json::from_value(value.clone())
                .context("input `computed` must be a list of {name, function}")?,
            _ => Vec::new(),
        };

        let bundle = self
            .loader
            .load_with_processing(Path::new(dataset))
            .with_context(|| format!("loading {dataset}"))?;
        let bundle = self.loader.enrich(bundle, &[], &computed)?;
        info!(
            execution_id = %context.execution_id,
            records = bundle.metadata.record_count,
            "dataset summarized"
        );

        let prompt = PromptBuilder::new()
            .role("You are a data analyst.")
            .context(format!(
                "Dataset {dataset} has {} records with columns: {}.\n\nStatistics:\n{}\n\nComputed fields:\n{}",
                bundle.metadata.record_count,
                bundle.stats.column_names.join(", "),
                serde_json::to_string_pretty(&bundle.stats)?,
                serde_json::to_string_pretty(&bundle.computed_fields)?,
            ))
            .task("Provide three distinct, actionable insights based on this data.")
            .output_format("A bulleted list.")
            .build();
        let summary = context
            .llm
            .generate_text(GenerateRequest::new(prompt))
            .await
            .context("model call failed")?;
        let insights = extract_list(&summary);

        Ok(json!({
            "datasetName": dataset,
            "recordCount": bundle.metadata.record_count,
            "columns": bundle.stats.column_names,
            "stats": bundle.stats,
            "computedFields": bundle.computed_fields,
            "summary": summary.trim(),
            "insights": insights,
            "generatedAt": Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_by_name() {
        let registry = ProcessorRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["dataset-summary", "echo"]);
        assert!(matches!(
            registry.get("python-script"),
            Err(ReportError::UnknownProcessor(name)) if name == "python-script"
        ));
    }
}
