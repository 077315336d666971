mod executor;
mod processor;
mod store;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::read_structured;
use crate::error::Result;
use crate::export::ExportFormat;
use crate::prompt::{ValueKind, VariableRule};

pub use executor::PipelineExecutor;
pub use processor::{
    DatasetSummaryProcessor, EchoProcessor, Processor, ProcessorContext, ProcessorRegistry,
};
pub use store::{ExecutionResult, ExecutionStatus, ExecutionStore};

pub const WORKSPACE_ENV: &str = "DPROC_WORKSPACE";
pub const WORKSPACE_MARKERS: &[&str] = &["dproc.workspace.yaml", "Cargo.toml"];
pub const PIPELINES_DIR: &str = "pipelines";
pub const PIPELINE_FILES: &[&str] = &["pipeline.yaml", "pipeline.yml", "pipeline.json"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A runnable pipeline: a registered processor feeding a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub processor: String,
    pub template: PathBuf,
    #[serde(default)]
    pub output_formats: Vec<ExportFormat>,
    #[serde(default)]
    pub inputs: Vec<PipelineInput>,
    #[serde(skip)]
    pub dir: PathBuf,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PipelineDefinition {
    /// Reads the first `pipeline.*` file found in `dir`, if any.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let Some(path) = PIPELINE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
        else {
            return Ok(None);
        };
        let mut definition: PipelineDefinition = read_structured(&path)?;
        definition.dir = dir.to_path_buf();
        Ok(Some(definition))
    }

    pub fn template_path(&self) -> PathBuf {
        if self.template.is_absolute() {
            self.template.clone()
        } else {
            self.dir.join(&self.template)
        }
    }

    pub fn rules(&self) -> IndexMap<String, VariableRule> {
        self.inputs
            .iter()
            .map(|input| {
                let rule = VariableRule {
                    kind: Some(input.kind),
                    required: input.required,
                    ..VariableRule::default()
                };
                (input.name.clone(), rule)
            })
            .collect()
    }

    /// Fills declared defaults for inputs the caller left out or set to null.
    pub fn apply_defaults(&self, mut inputs: Map<String, Value>) -> Map<String, Value> {
        for input in &self.inputs {
            let Some(default) = &input.default else {
                continue;
            };
            let missing = matches!(inputs.get(&input.name), None | Some(Value::Null));
            if missing {
                inputs.insert(input.name.clone(), default.clone());
            }
        }
        inputs
    }
}

/// Pipelines found one directory below the registry root.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    root: PathBuf,
    pipelines: IndexMap<String, PipelineDefinition>,
}

impl PipelineRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pipelines: IndexMap::new(),
        }
    }

    /// Registry over `<workspace>/pipelines`, already scanned.
    pub fn discover() -> Result<Self> {
        let root = workspace_root()?.join(PIPELINES_DIR);
        let mut registry = Self::new(root);
        registry.scan()?;
        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers every valid pipeline under the root. Broken definitions are
    /// logged and skipped; a missing root yields an empty registry.
    pub fn scan(&mut self) -> Result<usize> {
        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "pipeline directory not found");
            return Ok(0);
        }
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();
        for dir in entries {
            match PipelineDefinition::load(&dir) {
                Ok(Some(definition)) if definition.id.trim().is_empty() => {
                    warn!(dir = %dir.display(), "pipeline without id skipped");
                }
                Ok(Some(definition)) => {
                    info!(id = %definition.id, name = %definition.name, "pipeline registered");
                    self.pipelines.insert(definition.id.clone(), definition);
                }
                Ok(None) => debug!(dir = %dir.display(), "no pipeline definition"),
                Err(err) => warn!(dir = %dir.display(), error = %err, "invalid pipeline skipped"),
            }
        }
        Ok(self.pipelines.len())
    }

    pub fn register(&mut self, definition: PipelineDefinition) {
        self.pipelines.insert(definition.id.clone(), definition);
    }

    pub fn get(&self, id: &str) -> Option<&PipelineDefinition> {
        self.pipelines.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.values()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// `DPROC_WORKSPACE` if set, otherwise the nearest ancestor of the working
/// directory holding a workspace marker, otherwise the working directory.
pub fn workspace_root() -> Result<PathBuf> {
    if let Some(root) = env::var_os(WORKSPACE_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    let cwd = env::current_dir()?;
    Ok(find_workspace_root(&cwd).unwrap_or(cwd))
}

pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| WORKSPACE_MARKERS.iter().any(|marker| dir.join(marker).is_file()))
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const SALES_PIPELINE: &str = "id: sales-analysis\nname: Sales Analysis\nprocessor: dataset-summary\ntemplate: report.md\noutputFormats: [html, md]\ninputs:\n  - name: dataset\n    type: string\n    required: true\n  - name: format\n    type: string\n    default: html\n";

    #[test]
    fn scan_registers_valid_pipelines_only() {
        let dir = tempdir().unwrap();
        let sales = dir.path().join("sales");
        fs::create_dir_all(&sales).unwrap();
        fs::write(sales.join("pipeline.yaml"), SALES_PIPELINE).unwrap();
        let broken = dir.path().join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("pipeline.json"), "{\"id\": 3}").unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let mut registry = PipelineRegistry::new(dir.path());
        assert_eq!(registry.scan().unwrap(), 1);
        let pipeline = registry.get("sales-analysis").unwrap();
        assert_eq!(pipeline.version, "1.0.0");
        assert_eq!(pipeline.output_formats, vec![ExportFormat::Html, ExportFormat::Md]);
        assert_eq!(pipeline.template_path(), sales.join("report.md"));
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let mut registry = PipelineRegistry::new(dir.path().join("nope"));
        assert_eq!(registry.scan().unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn defaults_fill_missing_inputs() {
        let definition: PipelineDefinition = serde_yaml::from_str(SALES_PIPELINE).unwrap();
        let mut given = Map::new();
        given.insert("dataset".into(), json!("sales.csv"));
        given.insert("format".into(), Value::Null);
        let inputs = definition.apply_defaults(given);
        assert_eq!(inputs["format"], json!("html"));
        let rules = definition.rules();
        assert!(rules["dataset"].required);
        assert_eq!(rules["format"].kind, Some(ValueKind::String));
    }

    #[test]
    fn workspace_root_is_nearest_marked_ancestor() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("dproc.workspace.yaml"), "").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_workspace_root(&nested), Some(dir.path().to_path_buf()));
    }
}
