//! Dataset connectors: turn a CSV or JSON file into flat records.

mod json;
mod tabular;

use std::path::Path;

use tracing::debug;

use crate::error::{DprocError, Result};
use crate::record::Record;

pub use self::tabular::{load_csv, parse_csv_str};
pub use self::json::{load_json, parse_json_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
}

impl DataFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(DataFormat::Csv),
            "json" => Some(DataFormat::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
        }
    }
}

/// Loads any supported dataset file, dispatching on its extension.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    if !path.exists() {
        return Err(DprocError::NotFound(path.to_path_buf()));
    }
    let format = DataFormat::from_path(path)
        .ok_or_else(|| DprocError::UnsupportedFormat(path.to_path_buf()))?;
    let records = match format {
        DataFormat::Csv => load_csv(path)?,
        DataFormat::Json => load_json(path)?,
    };
    debug!(
        path = %path.display(),
        format = format.as_str(),
        records = records.len(),
        "dataset loaded"
    );
    Ok(records)
}
