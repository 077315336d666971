use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::SchemaDescription;
use crate::error::Result;

pub const DEFAULT_SCHEMA_CACHE: &str = ".dproc/schemas";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub shape: SchemaDescription,
    pub record_count: usize,
    pub source: String,
}

/// Disk-backed cache of inferred schemas. Entries are never rewritten: a
/// different shape hashes to a different id.
#[derive(Debug)]
pub struct SchemaRegistry {
    cache_dir: PathBuf,
    entries: RwLock<IndexMap<String, SchemaEntry>>,
}

impl SchemaRegistry {
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        let registry = Self {
            cache_dir,
            entries: RwLock::new(IndexMap::new()),
        };
        registry.load_all()?;
        Ok(registry)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn load_all(&self) -> Result<()> {
        let mut paths = fs::read_dir(&self.cache_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect::<Vec<_>>();
        paths.sort();
        let mut entries = self.entries.write();
        for path in paths {
            let parsed = fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|text| Ok(serde_json::from_str::<SchemaEntry>(&text)?));
            match parsed {
                Ok(entry) => {
                    entries.insert(entry.id.clone(), entry);
                }
                Err(err) => warn!(path = %path.display(), "skipping unreadable schema cache entry: {err}"),
            }
        }
        debug!(count = entries.len(), dir = %self.cache_dir.display(), "schema cache loaded");
        Ok(())
    }

    /// Content-derived id: same source and same field/type pairs give the same id.
    pub fn schema_id(shape: &SchemaDescription, source: &str) -> String {
        let mut pairs = shape
            .fields
            .iter()
            .map(|(name, field)| format!("{name}:{}:{}", field.kind.as_str(), field.optional))
            .collect::<Vec<_>>();
        pairs.sort();
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        for pair in pairs {
            hasher.update(b"\n");
            hasher.update(pair.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        format!("schema_{}", &digest[..16])
    }

    pub fn register(
        &self,
        shape: &SchemaDescription,
        source: &str,
        record_count: usize,
    ) -> Result<String> {
        let id = Self::schema_id(shape, source);
        if self.entries.read().contains_key(&id) {
            debug!(%id, "schema already registered");
            return Ok(id);
        }
        let now = Utc::now();
        let entry = SchemaEntry {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            shape: shape.clone(),
            record_count,
            source: source.to_string(),
        };
        let mut entries = self.entries.write();
        fs::write(self.entry_path(&id), serde_json::to_string_pretty(&entry)?)?;
        entries.insert(id.clone(), entry);
        debug!(%id, fields = shape.len(), "schema registered");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<SchemaEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<SchemaEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        if entries.shift_remove(id).is_none() {
            return Ok(false);
        }
        let path = self.entry_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        for id in entries.keys() {
            let path = self.entry_path(id);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        entries.clear();
        Ok(())
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{id}.json"))
    }
}
