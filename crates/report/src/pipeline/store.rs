use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub pipeline_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status of every execution started in this process. Cheap to clone; clones
/// share the same map.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStore {
    entries: Arc<RwLock<HashMap<String, ExecutionResult>>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new running execution. Returns false if the id is taken.
    pub fn start(&self, execution_id: &str, pipeline_id: &str) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(execution_id) {
            warn!(execution_id, "execution id already recorded");
            return false;
        }
        entries.insert(
            execution_id.to_string(),
            ExecutionResult {
                execution_id: execution_id.to_string(),
                pipeline_id: pipeline_id.to_string(),
                status: ExecutionStatus::Running,
                artifact_path: None,
                error: None,
            },
        );
        debug!(execution_id, pipeline_id, status = "running", "execution status");
        true
    }

    pub fn complete(&self, execution_id: &str, artifact: PathBuf) -> Option<ExecutionResult> {
        self.finish(execution_id, ExecutionStatus::Completed, |entry| {
            entry.artifact_path = Some(artifact);
        })
    }

    pub fn fail(&self, execution_id: &str, error: impl Into<String>) -> Option<ExecutionResult> {
        let error = error.into();
        self.finish(execution_id, ExecutionStatus::Failed, |entry| {
            entry.error = Some(error);
        })
    }

    /// Moves a running execution to a terminal status. Unknown or already
    /// finished ids are left untouched.
    fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        update: impl FnOnce(&mut ExecutionResult),
    ) -> Option<ExecutionResult> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(execution_id) else {
            warn!(execution_id, "unknown execution");
            return None;
        };
        if entry.status.is_terminal() {
            warn!(
                execution_id,
                current = entry.status.as_str(),
                requested = status.as_str(),
                "execution already finished"
            );
            return None;
        }
        entry.status = status;
        update(entry);
        debug!(execution_id, status = status.as_str(), "execution status");
        Some(entry.clone())
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionResult> {
        self.entries.read().get(execution_id).cloned()
    }

    pub fn list(&self) -> Vec<ExecutionResult> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ids_are_inserted_once() {
        let store = ExecutionStore::new();
        assert!(store.start("a", "sales"));
        assert!(!store.start("a", "other"));
        assert_eq!(store.get("a").unwrap().pipeline_id, "sales");
    }

    #[test]
    fn only_running_executions_transition() {
        let store = ExecutionStore::new();
        store.start("a", "sales");
        let done = store.complete("a", PathBuf::from("/tmp/report.html")).unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(store.fail("a", "late").is_none());
        assert_eq!(store.get("a").unwrap().status, ExecutionStatus::Completed);
        assert!(store.fail("missing", "x").is_none());
    }

    #[test]
    fn concurrent_writers_share_one_map() {
        let store = ExecutionStore::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let id = format!("exec-{i}");
                    store.start(&id, "p");
                    if i % 2 == 0 {
                        store.complete(&id, PathBuf::from("out"));
                    } else {
                        store.fail(&id, "boom");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8);
        assert!(store.list().iter().all(|entry| entry.status.is_terminal()));
    }
}
