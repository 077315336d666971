use std::path::PathBuf;
use std::sync::Arc;

use dproc_llm::TextGenerator;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ReportError, Result};
use crate::export::{ExportFormat, ExportManager, ExportOptions};
use crate::prompt::validate_variables;
use crate::template::{TemplateEngine, TemplateRenderer};

use super::{
    ExecutionResult, ExecutionStatus, ExecutionStore, PipelineRegistry, ProcessorContext,
    ProcessorRegistry,
};

const ARTIFACT_NAME: &str = "report";

/// Runs registered pipelines. Every execution gets its own id and scratch
/// directory; status is shared through the [`ExecutionStore`].
pub struct PipelineExecutor {
    registry: Arc<PipelineRegistry>,
    processors: Arc<ProcessorRegistry>,
    llm: Arc<dyn TextGenerator>,
    renderer: Arc<dyn TemplateRenderer>,
    exporter: ExportManager,
    store: ExecutionStore,
}

impl PipelineExecutor {
    pub fn new(
        registry: Arc<PipelineRegistry>,
        processors: Arc<ProcessorRegistry>,
        llm: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            registry,
            processors,
            llm,
            renderer: Arc::new(TemplateEngine::new()),
            exporter: ExportManager::new(),
            store: ExecutionStore::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_exporter(mut self, exporter: ExportManager) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_store(mut self, store: ExecutionStore) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Never returns an error: failures end up in the result and the store.
    /// A failed execution's workspace is removed; a completed one is kept and
    /// holds the artifact.
    pub async fn execute(&self, pipeline_id: &str, inputs: Map<String, Value>) -> ExecutionResult {
        let execution_id = Uuid::new_v4().to_string();
        self.store.start(&execution_id, pipeline_id);
        info!(%execution_id, pipeline_id, "execution started");

        let mut workspace = None;
        let outcome = self
            .run(&execution_id, pipeline_id, inputs, &mut workspace)
            .await;
        let finished = match outcome {
            Ok(artifact) => {
                if let Some(dir) = workspace {
                    let kept = dir.keep();
                    info!(%execution_id, workspace = %kept.display(), "workspace retained");
                }
                info!(%execution_id, artifact = %artifact.display(), "execution completed");
                self.store.complete(&execution_id, artifact)
            }
            Err(err) => {
                error!(%execution_id, pipeline_id, error = %err, "execution failed");
                drop(workspace);
                self.store.fail(&execution_id, err.to_string())
            }
        };
        finished
            .or_else(|| self.store.get(&execution_id))
            .unwrap_or_else(|| ExecutionResult {
                execution_id,
                pipeline_id: pipeline_id.to_string(),
                status: ExecutionStatus::Failed,
                artifact_path: None,
                error: Some("execution was not recorded".to_string()),
            })
    }

    async fn run(
        &self,
        execution_id: &str,
        pipeline_id: &str,
        inputs: Map<String, Value>,
        workspace: &mut Option<TempDir>,
    ) -> Result<PathBuf> {
        let pipeline = self
            .registry
            .get(pipeline_id)
            .ok_or_else(|| ReportError::UnknownPipeline(pipeline_id.to_string()))?;

        let inputs = pipeline.apply_defaults(inputs);
        let errors = validate_variables(&inputs, &pipeline.rules());
        if !errors.is_empty() {
            return Err(ReportError::InvalidInputs(errors));
        }
        let format = match inputs.get("format").and_then(Value::as_str) {
            Some(name) => ExportFormat::parse(name)
                .ok_or_else(|| ReportError::UnsupportedExportFormat(name.to_string()))?,
            None => pipeline
                .output_formats
                .first()
                .copied()
                .ok_or(ReportError::NoExportFormats)?,
        };
        let processor = self.processors.get(&pipeline.processor)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("dproc-{execution_id}-"))
            .tempdir()?;
        let path = dir.path().to_path_buf();
        *workspace = Some(dir);

        let context = ProcessorContext {
            execution_id: execution_id.to_string(),
            workspace: path.clone(),
            llm: self.llm.clone(),
        };
        let data = processor
            .process(&inputs, &context)
            .await
            .map_err(ReportError::Processor)?;

        let template_path = pipeline.template_path();
        if !template_path.is_file() {
            return Err(ReportError::TemplateNotFound(template_path));
        }
        let template = tokio::fs::read_to_string(&template_path).await?;
        let rendered = self.renderer.render(&template, &data)?;

        let mut metadata = Map::new();
        metadata.insert("title".into(), Value::from(pipeline.name.as_str()));
        let options = ExportOptions::new(path)
            .with_file_name(ARTIFACT_NAME)
            .with_metadata(metadata);
        self.exporter.export(&rendered, format, &options).await
    }
}
