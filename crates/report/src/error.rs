use std::path::PathBuf;

use dproc_core::DprocError;
use dproc_llm::LlmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("serde yaml error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Data(#[from] DprocError),
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error("config file not found: {0:?}")]
    ConfigNotFound(PathBuf),
    #[error("unsupported config format: {0:?} (use .json, .yml or .yaml)")]
    UnsupportedConfigFormat(PathBuf),
    #[error("invalid config {path:?}: {message}")]
    InvalidConfig { path: PathBuf, message: String },
    #[error("invalid spec {path:?}: {message}")]
    InvalidSpec { path: PathBuf, message: String },
    #[error("Prompt file not found: {0:?}")]
    PromptFileNotFound(PathBuf),
    #[error("Prompt not found: {category}/{name}")]
    PromptNotFound { category: String, name: String },
    #[error("Invalid library prompt format: {0}. Expected: library:category:name")]
    InvalidLibraryReference(String),
    #[error("prompt library is not configured; cannot resolve {0}")]
    LibraryUnavailable(String),
    #[error("No steps added to prompt composer")]
    EmptyComposition,
    #[error("Template file not found: {0:?}")]
    TemplateNotFound(PathBuf),
    #[error("template error: {0}")]
    Template(String),
    #[error("unknown filter: {0}")]
    UnknownFilter(String),
    #[error("unsupported export format: {0}")]
    UnsupportedExportFormat(String),
    #[error("No valid export formats specified")]
    NoExportFormats,
    #[error("no document renderer registered for {0}")]
    MissingRenderer(String),
    #[error("document renderer failed: {0:#}")]
    Renderer(anyhow::Error),
    #[error("Pipeline with ID \"{0}\" not found.")]
    UnknownPipeline(String),
    #[error("processor not registered: {0}")]
    UnknownProcessor(String),
    #[error("invalid inputs: {}", .0.join("; "))]
    InvalidInputs(Vec<String>),
    #[error("processor failed: {0:#}")]
    Processor(anyhow::Error),
    #[error("failed to parse {kind} response: {message}")]
    ResponseParse { kind: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ReportError>;
