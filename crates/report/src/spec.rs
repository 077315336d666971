use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::read_structured;
use crate::context::SECTION_NAMES;
use crate::error::{ReportError, Result};

pub const LIBRARY_PREFIX: &str = "library:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Markdown,
    String,
    StringList,
    Json,
    Number,
}

impl VariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::Markdown => "markdown",
            VariableType::String => "string",
            VariableType::StringList => "string_list",
            VariableType::Json => "json",
            VariableType::Number => "number",
        }
    }
}

/// Where a variable's prompt template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource<'a> {
    File(&'a str),
    Library(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableType,
    pub prompt_file: String,
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl ReportVariable {
    pub fn prompt_source(&self) -> PromptSource<'_> {
        if self.prompt_file.starts_with(LIBRARY_PREFIX) {
            PromptSource::Library(&self.prompt_file)
        } else {
            PromptSource::File(&self.prompt_file)
        }
    }
}

/// Declared report variables, resolved in order, plus the final template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub template_file: String,
    pub variables: Vec<ReportVariable>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl ReportSpec {
    /// Reads a `.json`, `.yml` or `.yaml` spec. Relative template and prompt
    /// paths are resolved against `base_dir` (defaults to the spec's directory).
    pub fn load(path: &Path, base_dir: Option<&Path>) -> Result<Self> {
        let mut spec: ReportSpec = read_structured(path).map_err(|err| match err {
            ReportError::InvalidConfig { path, message } => {
                ReportError::InvalidSpec { path, message }
            }
            other => other,
        })?;
        spec.validate(path)?;
        spec.base_dir = base_dir
            .map(Path::to_path_buf)
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        debug!(
            spec = spec.id.as_deref().unwrap_or("unnamed"),
            variables = spec.variables.len(),
            "spec loaded"
        );
        Ok(spec)
    }

    pub fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: String| ReportError::InvalidSpec {
            path: path.to_path_buf(),
            message,
        };
        if self.template_file.trim().is_empty() {
            return Err(invalid("templateFile must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for variable in &self.variables {
            if variable.name.trim().is_empty() {
                return Err(invalid("variable name must not be empty".into()));
            }
            if !seen.insert(variable.name.as_str()) {
                return Err(invalid(format!("duplicate variable {}", variable.name)));
            }
            if SECTION_NAMES.contains(&variable.name.as_str()) {
                return Err(invalid(format!(
                    "variable {} shadows a built-in context section",
                    variable.name
                )));
            }
        }
        Ok(())
    }

    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.base_dir.join(relative)
        }
    }

    pub fn template_path(&self) -> PathBuf {
        self.resolve(&self.template_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SPEC_YAML: &str = "id: sales\ntemplateFile: report.md.njk\nvariables:\n  - name: summary\n    type: markdown\n    promptFile: prompts/summary.prompt.md\n    inputs: [computedFields.total]\n  - name: risks\n    type: string_list\n    promptFile: library:common:summarize\n    inputs: []\n";

    #[test]
    fn yaml_spec_loads_in_declaration_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yml");
        fs::write(&path, SPEC_YAML).unwrap();
        let spec = ReportSpec::load(&path, None).unwrap();
        assert_eq!(spec.id.as_deref(), Some("sales"));
        let names: Vec<_> = spec.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["summary", "risks"]);
        assert_eq!(spec.variables[1].kind, VariableType::StringList);
        assert_eq!(
            spec.variables[1].prompt_source(),
            PromptSource::Library("library:common:summarize")
        );
        assert_eq!(spec.template_path(), dir.path().join("report.md.njk"));
    }

    #[test]
    fn duplicate_and_shadowing_names_are_rejected() {
        let dir = tempdir().unwrap();
        let dup = dir.path().join("dup.yml");
        fs::write(&dup, SPEC_YAML.replace("name: risks", "name: summary")).unwrap();
        assert!(matches!(
            ReportSpec::load(&dup, None),
            Err(ReportError::InvalidSpec { .. })
        ));

        let shadow = dir.path().join("shadow.yml");
        fs::write(&shadow, SPEC_YAML.replace("name: risks", "name: stats")).unwrap();
        let err = ReportSpec::load(&shadow, None).unwrap_err();
        assert!(err.to_string().contains("shadows"));
    }

    #[test]
    fn unknown_variable_type_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.json");
        fs::write(
            &path,
            r#"{"templateFile": "t.md", "variables": [{"name": "x", "type": "table", "promptFile": "p.md", "inputs": []}]}"#,
        )
        .unwrap();
        assert!(matches!(
            ReportSpec::load(&path, None),
            Err(ReportError::InvalidSpec { .. })
        ));
    }
}
