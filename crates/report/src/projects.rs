use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::ProjectConfig;
use crate::error::Result;

pub const PROJECT_CONFIG_FILES: &[&str] = &["dproc.config.json", "dproc.config.yaml"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub config: ProjectConfig,
    pub last_modified: DateTime<Utc>,
}

/// Projects directly under `root`, most recently modified first. Directories
/// whose config fails to load are logged and skipped.
pub fn list_projects(root: &Path) -> Result<Vec<ProjectInfo>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut projects = Vec::new();
    for entry in fs::read_dir(root)?.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        match read_project(&path, &id) {
            Ok(Some(project)) => projects.push(project),
            Ok(None) => {}
            Err(err) => warn!(project = %id, error = %err, "failed to load project"),
        }
    }
    projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    Ok(projects)
}

pub fn get_project(root: &Path, id: &str) -> Result<Option<ProjectInfo>> {
    read_project(&root.join(id), id)
}

fn read_project(dir: &Path, id: &str) -> Result<Option<ProjectInfo>> {
    let Some(config_path) = PROJECT_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
    else {
        return Ok(None);
    };
    let config = ProjectConfig::load(Some(&config_path))?;
    let modified: DateTime<Utc> = fs::metadata(&config_path)?.modified()?.into();
    let name = if config.report_name.trim().is_empty() {
        id.to_string()
    } else {
        config.report_name.clone()
    };
    Ok(Some(ProjectInfo {
        id: id.to_string(),
        name,
        path: dir.to_path_buf(),
        config,
        last_modified: modified,
    }))
}
