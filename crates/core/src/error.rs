use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DprocError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("data file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("unsupported input format: {0:?}")]
    UnsupportedFormat(PathBuf),
    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("invalid formula syntax: {0}")]
    InvalidFormulaSyntax(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("Formula '{field}' failed: {message}")]
    Formula { field: String, message: String },
    #[error("No valid JSON found in text")]
    NoJsonFound,
    #[error("other: {0}")]
    Other(String),
}

impl DprocError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Input errors abort a dataset load; everything else is reported by the caller.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::UnsupportedFormat(_) | Self::Parse { .. } | Self::EmptyDataset
        )
    }
}

pub type Result<T> = std::result::Result<T, DprocError>;

impl From<anyhow::Error> for DprocError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
