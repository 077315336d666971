use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dproc_core::{ComputedField, CustomField};
use dproc_llm::{LlmProvider, LlmSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReportError, Result};
use crate::export::ExportFormat;

pub const DEFAULT_CONFIG_FILE: &str = "dproc.config.json";
pub const DEFAULT_DESTINATION: &str = "./output";

/// Per-project settings, camelCase on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub report_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub fields: FieldsConfig,
    pub spec_file: String,
    pub output: OutputConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<ProjectLlmConfig>,
    /// Directory relative paths are resolved against; set on load.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldsConfig {
    #[serde(default)]
    pub custom: Vec<CustomField>,
    #[serde(default)]
    pub computed: Vec<ComputedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub formats: Vec<ExportFormat>,
    #[serde(default = "default_destination")]
    pub destination: String,
}

fn default_destination() -> String {
    DEFAULT_DESTINATION.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectLlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ProjectConfig {
    /// Loads `path`, or `dproc.config.json` in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => env::current_dir()?.join(DEFAULT_CONFIG_FILE),
        };
        let mut config: ProjectConfig = read_structured(&path)?;
        config.validate(&path)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!(path = %path.display(), report = %config.report_name, "project config loaded");
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: String| ReportError::InvalidConfig {
            path: path.to_path_buf(),
            message,
        };
        if self.report_name.trim().is_empty() {
            return Err(invalid("reportName must not be empty".into()));
        }
        if let Some(llm) = &self.llm {
            if let Some(temperature) = llm.temperature {
                if !(0.0..=2.0).contains(&temperature) {
                    return Err(invalid(format!(
                        "llm.temperature must be between 0 and 2, got {temperature}"
                    )));
                }
            }
            if let Some(provider) = &llm.provider {
                if LlmProvider::parse(provider).is_none() {
                    return Err(invalid(format!("unknown llm.provider {provider}")));
                }
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

    pub fn data_source_paths(&self) -> Vec<PathBuf> {
        self.data_sources.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn spec_path(&self) -> PathBuf {
        self.resolve(&self.spec_file)
    }

    pub fn destination(&self) -> PathBuf {
        self.resolve(&self.output.destination)
    }

    pub fn author_or_default(&self) -> &str {
        self.author.as_deref().unwrap_or("Anonymous")
    }
}

/// Reads JSON or YAML by extension.
pub(crate) fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(ReportError::ConfigNotFound(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let invalid = |message: String| ReportError::InvalidConfig {
        path: path.to_path_buf(),
        message,
    };
    match extension.as_deref() {
        Some("json") => serde_json::from_str(&raw).map_err(|err| invalid(err.to_string())),
        Some("yml") | Some("yaml") => {
            serde_yaml::from_str(&raw).map_err(|err| invalid(err.to_string()))
        }
        _ => Err(ReportError::UnsupportedConfigFormat(path.to_path_buf())),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmDefaults {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathDefaults {
    pub prompts: PathBuf,
    pub templates: PathBuf,
    pub data: PathBuf,
    pub output: PathBuf,
}

/// Framework-wide fallbacks, overridable through `DPROC_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkDefaults {
    pub llm: LlmDefaults,
    pub paths: PathDefaults,
}

impl Default for FrameworkDefaults {
    fn default() -> Self {
        Self {
            llm: LlmDefaults {
                provider: "gemini".to_string(),
                model: "gemini-1.5-flash".to_string(),
                temperature: 0.7,
                max_tokens: 4096,
            },
            paths: PathDefaults {
                prompts: PathBuf::from("prompts"),
                templates: PathBuf::from("templates"),
                data: PathBuf::from("data"),
                output: PathBuf::from("output"),
            },
        }
    }
}

/// Provider, model and sampling settings after merging project over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLlm {
    pub provider: LlmProvider,
    pub model: String,
    pub settings: LlmSettings,
}

impl FrameworkDefaults {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut defaults = Self::default();
        if let Some(provider) = lookup("DPROC_PROVIDER") {
            defaults.llm.provider = provider;
        }
        if let Some(model) = lookup("DPROC_MODEL") {
            defaults.llm.model = model;
        }
        if let Some(temperature) = lookup("DPROC_TEMPERATURE").and_then(|v| v.parse().ok()) {
            defaults.llm.temperature = temperature;
        }
        if let Some(max_tokens) = lookup("DPROC_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            defaults.llm.max_tokens = max_tokens;
        }
        if let Some(prompts) = lookup("DPROC_PROMPTS_DIR") {
            defaults.paths.prompts = PathBuf::from(prompts);
        }
        if let Some(templates) = lookup("DPROC_TEMPLATES_DIR") {
            defaults.paths.templates = PathBuf::from(templates);
        }
        defaults
    }

    pub fn resolve_llm(&self, project: Option<&ProjectLlmConfig>) -> Result<ResolvedLlm> {
        let project = project.cloned().unwrap_or_default();
        let provider_name = project.provider.unwrap_or_else(|| self.llm.provider.clone());
        let provider = LlmProvider::parse(&provider_name).ok_or_else(|| {
            ReportError::InvalidConfig {
                path: PathBuf::from("<defaults>"),
                message: format!("unknown provider {provider_name}"),
            }
        })?;
        Ok(ResolvedLlm {
            provider,
            model: project.model.unwrap_or_else(|| self.llm.model.clone()),
            settings: LlmSettings {
                temperature: Some(project.temperature.unwrap_or(self.llm.temperature)),
                max_tokens: Some(self.llm.max_tokens),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const CONFIG_JSON: &str = r#"{
        "reportName": "Q1 Sales",
        "dataSources": ["data/sales.csv"],
        "fields": {
            "custom": [{"name": "quarter", "value": "Q1"}],
            "computed": [{"name": "total", "function": "SUM(revenue)"}]
        },
        "specFile": "spec.yml",
        "output": {"formats": ["md", "json"]},
        "llm": {"provider": "openai", "temperature": 0.2}
    }"#;

    #[test]
    fn loads_json_and_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dproc.config.json");
        fs::write(&path, CONFIG_JSON).unwrap();
        let config = ProjectConfig::load(Some(&path)).unwrap();
        assert_eq!(config.report_name, "Q1 Sales");
        assert_eq!(config.author_or_default(), "Anonymous");
        assert_eq!(config.output.destination, DEFAULT_DESTINATION);
        assert_eq!(config.output.formats, vec![ExportFormat::Md, ExportFormat::Json]);
        assert_eq!(config.fields.computed[0].function, "SUM(revenue)");
        assert_eq!(config.spec_path(), dir.path().join("spec.yml"));
        assert_eq!(config.data_source_paths()[0], dir.path().join("data/sales.csv"));
    }

    #[test]
    fn loads_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("project.yaml");
        fs::write(
            &path,
            "reportName: Weekly\nauthor: Ops\ndataSources: [a.json]\nspecFile: spec.json\noutput:\n  formats: [html]\n  destination: out\n",
        )
        .unwrap();
        let config = ProjectConfig::load(Some(&path)).unwrap();
        assert_eq!(config.author_or_default(), "Ops");
        assert_eq!(config.destination(), dir.path().join("out"));
    }

    #[test]
    fn rejects_bad_configs() {
        let dir = tempdir().unwrap();
        let hot = dir.path().join("hot.json");
        fs::write(&hot, CONFIG_JSON.replace("0.2", "2.5")).unwrap();
        assert!(matches!(
            ProjectConfig::load(Some(&hot)),
            Err(ReportError::InvalidConfig { .. })
        ));

        let toml = dir.path().join("config.toml");
        fs::write(&toml, "reportName = 'x'").unwrap();
        assert!(matches!(
            ProjectConfig::load(Some(&toml)),
            Err(ReportError::UnsupportedConfigFormat(_))
        ));

        assert!(matches!(
            ProjectConfig::load(Some(&dir.path().join("missing.json"))),
            Err(ReportError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn env_overrides_and_project_settings_merge() {
        let vars: HashMap<&str, &str> = [("DPROC_MODEL", "gpt-4o-mini"), ("DPROC_MAX_TOKENS", "900")]
            .into_iter()
            .collect();
        let defaults = FrameworkDefaults::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(defaults.llm.provider, "gemini");
        assert_eq!(defaults.llm.model, "gpt-4o-mini");
        assert_eq!(defaults.llm.max_tokens, 900);

        let resolved = defaults
            .resolve_llm(Some(&ProjectLlmConfig {
                provider: Some("openai".into()),
                model: None,
                temperature: Some(0.1),
            }))
            .unwrap();
        assert_eq!(resolved.provider, LlmProvider::OpenAi);
        assert_eq!(resolved.model, "gpt-4o-mini");
        assert_eq!(resolved.settings.temperature, Some(0.1));
        assert_eq!(resolved.settings.max_tokens, Some(900));
    }
}
