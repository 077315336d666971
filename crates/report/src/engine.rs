use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use dproc_core::{BundleLoader, ContextManager, EnrichedBundle, DEFAULT_CONTEXT_WINDOW};
use dproc_llm::{GenerateRequest, TextGenerator};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::ProjectConfig;
use crate::context::RenderContext;
use crate::error::{ReportError, Result};
use crate::export::{ExportManager, ExportOptions, ExportReport};
use crate::prompt::{
    load_prompt_file, missing_template_variables, validate_inputs, PromptLibrary,
    STANDARD_SECTIONS,
};
use crate::response::parse_response;
use crate::spec::{PromptSource, ReportSpec, ReportVariable, VariableType, LIBRARY_PREFIX};
use crate::template::{TemplateEngine, TemplateRenderer};

pub const DEFAULT_OUTPUT_RESERVE: usize = 2000;
const DEFAULT_AUTHOR: &str = "Anonymous";
const SAMPLE_PREVIEW_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub use_prompt_library: bool,
    pub validate_variables: bool,
    pub manage_context: bool,
    pub parse_structured: bool,
    /// Run normalization, schema inference and enhanced stats when loading data.
    pub processing: bool,
    pub context_window: usize,
    pub output_reserve: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            use_prompt_library: true,
            validate_variables: true,
            manage_context: true,
            parse_structured: true,
            processing: true,
            context_window: DEFAULT_CONTEXT_WINDOW,
            output_reserve: DEFAULT_OUTPUT_RESERVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    LoadingSpec,
    ResolvingVariables,
    RenderingTemplate,
    Exporting,
    Done,
}

impl GenerationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPhase::LoadingSpec => "loading_spec",
            GenerationPhase::ResolvingVariables => "resolving_variables",
            GenerationPhase::RenderingTemplate => "rendering_template",
            GenerationPhase::Exporting => "exporting",
            GenerationPhase::Done => "done",
        }
    }
}

fn enter(phase: GenerationPhase, report: &str) {
    info!(phase = phase.as_str(), report, "generation phase");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum VariableStatus {
    Resolved,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableOutcome {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableType,
    #[serde(flatten)]
    pub status: VariableStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

impl VariableOutcome {
    pub fn is_resolved(&self) -> bool {
        self.status == VariableStatus::Resolved
    }
}

/// The rendered report plus what happened to each variable and export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub report_name: String,
    pub content: String,
    pub variables: Vec<VariableOutcome>,
    pub exports: ExportReport,
}

impl GenerationReport {
    pub fn failed(&self) -> impl Iterator<Item = &VariableOutcome> {
        self.variables.iter().filter(|outcome| !outcome.is_resolved())
    }

    /// True when the report was produced but carries error placeholders or
    /// is missing some export formats.
    pub fn is_degraded(&self) -> bool {
        self.failed().next().is_some() || !self.exports.is_complete()
    }
}

/// Name, author and extra template values for the library-driven entry points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportMeta {
    pub report_name: Option<String>,
    pub author: Option<String>,
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryStep {
    pub category: String,
    pub name: String,
    pub inputs: Map<String, Value>,
}

impl LibraryStep {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            inputs: Map::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiStepReport {
    pub content: String,
    /// Step outputs keyed `step_<n>_<name>`, in execution order.
    pub steps: IndexMap<String, String>,
}

/// Drives one dataset through prompt resolution, template rendering and export.
pub struct ReportEngine {
    llm: Arc<dyn TextGenerator>,
    renderer: Arc<dyn TemplateRenderer>,
    library: Option<Arc<PromptLibrary>>,
    exporter: ExportManager,
    loader: BundleLoader,
    model: Option<String>,
    options: EngineOptions,
}

impl ReportEngine {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self {
            llm,
            renderer: Arc::new(TemplateEngine::new()),
            library: None,
            exporter: ExportManager::new(),
            loader: BundleLoader::new(),
            model: None,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_library(mut self, library: Arc<PromptLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_exporter(mut self, exporter: ExportManager) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_loader(mut self, loader: BundleLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Model name sent with every request, overriding the client's own.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn library(&self) -> Option<&Arc<PromptLibrary>> {
        self.library.as_ref()
    }

    /// Loads the first data source (or `data_override`) and applies the
    /// project's custom and computed fields.
    pub fn load_bundle(
        &self,
        config: &ProjectConfig,
        data_override: Option<&Path>,
    ) -> Result<EnrichedBundle> {
        let sources = config.data_source_paths();
        let path = match data_override {
            Some(path) => path.to_path_buf(),
            None => {
                if sources.len() > 1 {
                    warn!(
                        sources = sources.len(),
                        "only the first data source is used"
                    );
                }
                sources
                    .into_iter()
                    .next()
                    .ok_or_else(|| ReportError::InvalidConfig {
                        path: config.base_dir.clone(),
                        message: "dataSources must name at least one file".into(),
                    })?
            }
        };
        let bundle = if self.options.processing {
            self.loader.load_with_processing(&path)?
        } else {
            self.loader.load(&path)?
        };
        Ok(self
            .loader
            .enrich(bundle, &config.fields.custom, &config.fields.computed)?)
    }

    /// Loads spec and data named by the project config, then generates.
    pub async fn run_project(&self, config: &ProjectConfig) -> Result<GenerationReport> {
        enter(GenerationPhase::LoadingSpec, &config.report_name);
        let spec = ReportSpec::load(&config.spec_path(), Some(&config.base_dir))?;
        let bundle = self.load_bundle(config, None)?;
        self.generate(config, &spec, &bundle).await
    }

    pub async fn generate(
        &self,
        config: &ProjectConfig,
        spec: &ReportSpec,
        bundle: &EnrichedBundle,
    ) -> Result<GenerationReport> {
        let started = Instant::now();
        let report_name = config.report_name.as_str();
        let mut context = RenderContext::new(report_name, config.author_or_default(), bundle)?;

        enter(GenerationPhase::ResolvingVariables, report_name);
        let variables = self.resolve_variables(spec, &mut context).await;

        enter(GenerationPhase::RenderingTemplate, report_name);
        let content = self.render_template(spec, &context).await?;

        enter(GenerationPhase::Exporting, report_name);
        let mut metadata = Map::new();
        metadata.insert("title".into(), Value::from(report_name));
        metadata.insert("author".into(), Value::from(config.author_or_default()));
        let options = ExportOptions::new(config.destination()).with_metadata(metadata);
        let exports = self
            .exporter
            .export_all(&content, &config.output.formats, &options)
            .await?;

        enter(GenerationPhase::Done, report_name);
        let report = GenerationReport {
            report_name: report_name.to_string(),
            content,
            variables,
            exports,
        };
        info!(
            report = report_name,
            failed_variables = report.failed().count(),
            exported = report.exports.outputs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "report generated"
        );
        Ok(report)
    }

    /// Resolves variables in declaration order. A failing variable gets an
    /// `[Error: ...]` placeholder and resolution moves on.
    pub async fn resolve_variables(
        &self,
        spec: &ReportSpec,
        context: &mut RenderContext,
    ) -> Vec<VariableOutcome> {
        let mut outcomes = Vec::with_capacity(spec.variables.len());
        for variable in &spec.variables {
            let started = Instant::now();
            let mut warnings = Vec::new();
            let status = match self
                .resolve_variable(spec, variable, context, &mut warnings)
                .await
            {
                Ok(value) => {
                    context.insert_variable(&variable.name, value);
                    VariableStatus::Resolved
                }
                Err(err) => {
                    error!(variable = %variable.name, error = %err, "variable failed");
                    context.insert_variable(&variable.name, Value::String(format!("[Error: {err}]")));
                    VariableStatus::Failed {
                        error: err.to_string(),
                    }
                }
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(
                variable = %variable.name,
                kind = variable.kind.as_str(),
                ok = matches!(status, VariableStatus::Resolved),
                warnings = warnings.len(),
                elapsed_ms,
                "variable resolved"
            );
            outcomes.push(VariableOutcome {
                name: variable.name.clone(),
                kind: variable.kind,
                status,
                warnings,
                elapsed_ms,
            });
        }
        outcomes
    }

    async fn resolve_variable(
        &self,
        spec: &ReportSpec,
        variable: &ReportVariable,
        context: &RenderContext,
        warnings: &mut Vec<String>,
    ) -> Result<Value> {
        let mut resolved = IndexMap::with_capacity(variable.inputs.len());
        let mut prompt_inputs = Map::new();
        for section in STANDARD_SECTIONS {
            if let Some(value) = context.section(section) {
                prompt_inputs.insert(section.to_string(), value.clone());
            }
        }
        prompt_inputs.insert("context".into(), context.to_value());
        for path in &variable.inputs {
            let value = context.resolve(path);
            match &value {
                Some(value) => {
                    let key = path.rsplit('.').next().unwrap_or(path.as_str());
                    prompt_inputs.insert(key.to_string(), value.clone());
                }
                None => debug!(variable = %variable.name, input = %path, "input did not resolve"),
            }
            resolved.insert(path.clone(), value);
        }

        if self.options.validate_variables {
            for warning in validate_inputs(&resolved, context) {
                warn!(variable = %variable.name, "{warning}");
                warnings.push(warning);
            }
        }

        let template = self.load_prompt(spec, variable)?;
        if self.options.validate_variables {
            let missing = missing_template_variables(&template, &prompt_inputs);
            if !missing.is_empty() {
                let warning = format!("Prompt references missing variables: {}", missing.join(", "));
                warn!(variable = %variable.name, "{warning}");
                warnings.push(warning);
            }
        }

        let prompt = self.renderer.render(&template, &Value::Object(prompt_inputs))?;
        let prompt = self.fit_prompt(&variable.name, prompt, warnings);
        let raw = self.complete(prompt).await?;

        let parsed = parse_response(variable.kind, &raw, self.options.parse_structured)?;
        if let Some(warning) = parsed.warning {
            warn!(variable = %variable.name, "{warning}");
            warnings.push(warning);
        }
        Ok(parsed.value)
    }

    fn load_prompt(&self, spec: &ReportSpec, variable: &ReportVariable) -> Result<String> {
        match variable.prompt_source() {
            PromptSource::Library(reference) if self.options.use_prompt_library => {
                let library = self
                    .library
                    .as_ref()
                    .ok_or_else(|| ReportError::LibraryUnavailable(reference.to_string()))?;
                Ok(library.resolve(reference)?.to_string())
            }
            PromptSource::Library(path) | PromptSource::File(path) => {
                load_prompt_file(&spec.resolve(path))
            }
        }
    }

    /// Shrinks a prompt that would overflow the context window: the first
    /// paragraph chunk when there are several, otherwise a hard truncation.
    fn fit_prompt(&self, label: &str, prompt: String, warnings: &mut Vec<String>) -> String {
        if !self.options.manage_context {
            return prompt;
        }
        let manager = ContextManager::new(self.options.context_window);
        let reserve = self.options.output_reserve;
        if manager.fits(&prompt, reserve) {
            return prompt;
        }
        let usage = manager.usage(&prompt);
        let mut chunks = manager.chunk_by_paragraphs(&prompt, reserve);
        if chunks.len() > 1 {
            let warning = format!(
                "Prompt uses {usage:.0}% of the context window; sent only the first of {} chunks",
                chunks.len()
            );
            warn!(variable = label, usage, chunks = chunks.len(), "prompt chunked");
            warnings.push(warning);
            chunks.swap_remove(0)
        } else {
            warn!(variable = label, usage, "prompt truncated");
            warnings.push(format!(
                "Prompt uses {usage:.0}% of the context window; truncated"
            ));
            manager.truncate(&prompt, reserve)
        }
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let mut request = GenerateRequest::new(prompt);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }
        Ok(self.llm.generate_text(request).await?)
    }

    pub async fn render_template(
        &self,
        spec: &ReportSpec,
        context: &RenderContext,
    ) -> Result<String> {
        let template = read_template(&spec.template_path()).await?;
        self.renderer.render(&template, &context.to_value())
    }

    /// Runs one library prompt over the bundle and renders `output_template`
    /// with the model's answer available as `analysis`.
    pub async fn generate_with_library(
        &self,
        bundle: &EnrichedBundle,
        category: &str,
        name: &str,
        output_template: &Path,
        meta: &ReportMeta,
    ) -> Result<String> {
        let library = self.require_library(category, name)?;
        let prompt_template = library.load(category, name)?;
        let base = library_context(bundle, meta, "Report")?;

        let prompt = self
            .renderer
            .render(&prompt_template, &Value::Object(base.clone()))?;
        let mut warnings = Vec::new();
        let prompt = self.fit_prompt(name, prompt, &mut warnings);
        let analysis = self.complete(prompt).await?;
        info!(category, prompt = name, "library prompt completed");

        let mut context = base;
        context.insert("analysis".into(), Value::String(analysis.trim().to_string()));
        let template = read_template(output_template).await?;
        self.renderer.render(&template, &Value::Object(context))
    }

    /// Runs library prompts in order. Each step sees the base context, every
    /// earlier step's output and its own inputs.
    pub async fn generate_multi_step(
        &self,
        bundle: &EnrichedBundle,
        steps: &[LibraryStep],
        output_template: &Path,
        meta: &ReportMeta,
    ) -> Result<MultiStepReport> {
        if steps.is_empty() {
            return Err(ReportError::EmptyComposition);
        }
        let base = library_context(bundle, meta, "Multi-Step Report")?;
        let mut results: IndexMap<String, String> = IndexMap::new();
        for (idx, step) in steps.iter().enumerate() {
            let library = self.require_library(&step.category, &step.name)?;
            let template = library.load(&step.category, &step.name)?;
            let mut context = base.clone();
            for (key, output) in &results {
                context.insert(key.clone(), Value::String(output.clone()));
            }
            context.extend(step.inputs.clone());

            let prompt = self.renderer.render(&template, &Value::Object(context))?;
            let mut warnings = Vec::new();
            let prompt = self.fit_prompt(&step.name, prompt, &mut warnings);
            let output = self.complete(prompt).await?;
            let key = format!("step_{}_{}", idx + 1, step.name);
            info!(step = %key, category = %step.category, "step completed");
            results.insert(key, output.trim().to_string());
        }

        let mut context = base;
        let mut step_map = Map::new();
        for (key, output) in &results {
            context.insert(key.clone(), Value::String(output.clone()));
            step_map.insert(key.clone(), Value::String(output.clone()));
        }
        context.insert("steps".into(), Value::Object(step_map));
        let template = read_template(output_template).await?;
        let content = self.renderer.render(&template, &Value::Object(context))?;
        Ok(MultiStepReport {
            content,
            steps: results,
        })
    }

    fn require_library(&self, category: &str, name: &str) -> Result<&Arc<PromptLibrary>> {
        self.library
            .as_ref()
            .ok_or_else(|| ReportError::LibraryUnavailable(format!("{LIBRARY_PREFIX}{category}:{name}")))
    }
}

async fn read_template(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(ReportError::TemplateNotFound(path.to_path_buf()));
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

fn library_context(
    bundle: &EnrichedBundle,
    meta: &ReportMeta,
    default_name: &str,
) -> Result<Map<String, Value>> {
    let preview: Vec<_> = bundle.samples.main.iter().take(SAMPLE_PREVIEW_ROWS).collect();
    let mut context = Map::new();
    context.insert(
        "reportName".into(),
        Value::from(meta.report_name.as_deref().unwrap_or(default_name)),
    );
    context.insert(
        "author".into(),
        Value::from(meta.author.as_deref().unwrap_or(DEFAULT_AUTHOR)),
    );
    context.insert("bundle".into(), serde_json::to_value(bundle)?);
    context.insert(
        "dataset_name".into(),
        Value::from(bundle.metadata.source_file.as_str()),
    );
    context.insert("record_count".into(), Value::from(bundle.metadata.record_count));
    context.insert("column_count".into(), Value::from(bundle.stats.column_count));
    context.insert(
        "data_sample".into(),
        Value::String(serde_json::to_string_pretty(&preview)?),
    );
    context.insert("stats".into(), serde_json::to_value(&bundle.stats)?);
    context.insert("metadata".into(), serde_json::to_value(&bundle.metadata)?);
    context.insert(
        "customFields".into(),
        serde_json::to_value(&bundle.custom_fields)?,
    );
    context.insert(
        "computedFields".into(),
        serde_json::to_value(&bundle.computed_fields)?,
    );
    context.extend(meta.variables.clone());
    Ok(context)
}
