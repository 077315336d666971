pub mod config;
pub mod context;
pub mod engine;
mod error;
pub mod export;
pub mod pipeline;
pub mod projects;
pub mod prompt;
pub mod response;
pub mod spec;
pub mod template;

pub use config::{FrameworkDefaults, ProjectConfig, ResolvedLlm, DEFAULT_CONFIG_FILE};
pub use context::RenderContext;
pub use engine::{
    EngineOptions, GenerationPhase, GenerationReport, LibraryStep, MultiStepReport, ReportEngine,
    ReportMeta, VariableOutcome, VariableStatus,
};
pub use error::{ReportError, Result};
pub use export::{DocumentRenderer, ExportFormat, ExportManager, ExportOptions, ExportReport};
pub use pipeline::{
    workspace_root, ExecutionResult, ExecutionStatus, ExecutionStore, PipelineDefinition,
    PipelineExecutor, PipelineRegistry, Processor, ProcessorContext, ProcessorRegistry,
};
pub use projects::{list_projects, ProjectInfo};
pub use prompt::{PromptBuilder, PromptComposer, PromptLibrary};
pub use spec::{ReportSpec, ReportVariable, VariableType};
pub use template::{TemplateEngine, TemplateRenderer};
