mod builder;
mod validate;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ReportError, Result};
use crate::spec::LIBRARY_PREFIX;

pub use builder::{PromptBuilder, PromptComposer, PromptStep};
pub use validate::{
    check_kind, missing_template_variables, validate_inputs, validate_variables, ValueKind,
    VariableRule, MAX_TEXT_LENGTH, STANDARD_SECTIONS,
};

pub const PROMPT_EXTENSION: &str = ".prompt.md";

/// Prompt templates stored as `<root>/<category>/<name>.prompt.md`.
/// Files are read once and kept for the lifetime of the library.
#[derive(Debug)]
pub struct PromptLibrary {
    root: PathBuf,
    cache: RwLock<HashMap<String, Arc<str>>>,
}

impl PromptLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, category: &str, name: &str) -> PathBuf {
        self.root
            .join(category)
            .join(format!("{name}{PROMPT_EXTENSION}"))
    }

    pub fn load(&self, category: &str, name: &str) -> Result<Arc<str>> {
        let key = format!("{category}/{name}");
        if let Some(hit) = self.cache.read().get(&key) {
            return Ok(hit.clone());
        }
        let path = self.path_for(category, name);
        if !path.is_file() {
            return Err(ReportError::PromptNotFound {
                category: category.to_string(),
                name: name.to_string(),
            });
        }
        let content: Arc<str> = fs::read_to_string(&path)?.into();
        debug!(prompt = %key, "prompt loaded");
        self.cache.write().insert(key, content.clone());
        Ok(content)
    }

    /// Loads a `library:<category>:<name>` reference.
    pub fn resolve(&self, reference: &str) -> Result<Arc<str>> {
        let (category, name) = parse_reference(reference)?;
        self.load(category, name)
    }

    pub fn exists(&self, category: &str, name: &str) -> bool {
        self.path_for(category, name).is_file()
    }

    /// Every prompt under the root as `category:name`, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut found = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(PROMPT_EXTENSION) else {
                continue;
            };
            let Some(category) = entry
                .path()
                .parent()
                .and_then(|parent| parent.strip_prefix(&self.root).ok())
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .filter(|rel| !rel.is_empty())
            else {
                warn!(path = %entry.path().display(), "prompt outside any category skipped");
                continue;
            };
            found.push(format!("{category}:{name}"));
        }
        found.sort();
        found
    }

    /// Writes a prompt into the library and primes the cache with it.
    pub fn save(&self, category: &str, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path_for(category, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        self.cache
            .write()
            .insert(format!("{category}/{name}"), Arc::from(content));
        Ok(path)
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

/// Splits `library:<category>:<name>`; anything else is rejected.
pub fn parse_reference(reference: &str) -> Result<(&str, &str)> {
    let invalid = || ReportError::InvalidLibraryReference(reference.to_string());
    if !reference.starts_with(LIBRARY_PREFIX) {
        return Err(invalid());
    }
    let parts: Vec<&str> = reference.split(':').collect();
    match parts.as_slice() {
        [_, category, name] if !category.is_empty() && !name.is_empty() => Ok((*category, *name)),
        _ => Err(invalid()),
    }
}

/// Reads a prompt template from a plain file path.
pub fn load_prompt_file(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(ReportError::PromptFileNotFound(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn references_need_three_parts() {
        assert_eq!(
            parse_reference("library:common:summarize").unwrap(),
            ("common", "summarize")
        );
        assert_eq!(
            parse_reference("library:domain/biomedical:trials").unwrap(),
            ("domain/biomedical", "trials")
        );
        for bad in ["library:common", "library:a:b:c", "common:summarize", "library::x"] {
            let err = parse_reference(bad).unwrap_err();
            assert!(err.to_string().contains("Expected: library:category:name"), "{bad}");
        }
    }

    #[test]
    fn loads_once_and_serves_from_cache() {
        let dir = tempdir().unwrap();
        let library = PromptLibrary::new(dir.path());
        let path = library.save("common", "summarize", "Summarize {{ data }}").unwrap();
        library.clear_cache();

        assert_eq!(&*library.resolve("library:common:summarize").unwrap(), "Summarize {{ data }}");
        assert_eq!(library.cached(), 1);
        fs::write(&path, "changed").unwrap();
        assert_eq!(&*library.load("common", "summarize").unwrap(), "Summarize {{ data }}");
        library.clear_cache();
        assert_eq!(&*library.load("common", "summarize").unwrap(), "changed");
    }

    #[test]
    fn missing_prompt_names_category_and_name() {
        let dir = tempdir().unwrap();
        let err = PromptLibrary::new(dir.path()).load("common", "nope").unwrap_err();
        assert_eq!(err.to_string(), "Prompt not found: common/nope");
    }

    #[test]
    fn list_walks_nested_categories() {
        let dir = tempdir().unwrap();
        let library = PromptLibrary::new(dir.path());
        library.save("common", "summarize", "a").unwrap();
        library.save("domain/biomedical", "trials", "b").unwrap();
        fs::write(dir.path().join("loose.prompt.md"), "c").unwrap();
        fs::write(dir.path().join("common").join("notes.md"), "d").unwrap();
        assert_eq!(
            library.list(),
            vec!["common:summarize".to_string(), "domain/biomedical:trials".to_string()]
        );
    }

    #[test]
    fn prompt_files_must_exist() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_prompt_file(&dir.path().join("x.prompt.md")),
            Err(ReportError::PromptFileNotFound(_))
        ));
    }
}
