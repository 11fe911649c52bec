//! Persistence backends - whole-document load/save
//!
//! - `MemoryPersistence`: DashMap, lost on exit
//! - `JsonDirPersistence`: one `<id>.json` per workflow, written atomically
//!   (temp file + rename) so readers never see a torn document

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::ast::Workflow;
use crate::error::{OpflowError, Result};

/// Persistence provider contract
///
/// Implementations store and return whole documents. Errors are surfaced
/// as `OpflowError::Storage`.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Workflow>>;

    async fn save(&self, workflow: &Workflow) -> Result<()>;

    /// Remove a document; returns false if it did not exist
    async fn remove(&self, id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<Workflow>>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// In-memory backend
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    docs: Arc<DashMap<String, Workflow>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.docs.get(id).map(|doc| doc.value().clone()))
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        self.docs.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.docs.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        Ok(self.docs.iter().map(|doc| doc.value().clone()).collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// JSON-file-per-document backend
#[derive(Debug, Clone)]
pub struct JsonDirPersistence {
    dir: PathBuf,
}

impl JsonDirPersistence {
    /// Open (and create if needed) a data directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            OpflowError::storage(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        // ids become file names: no separators, no traversal
        if id.is_empty()
            || id.contains("..")
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(OpflowError::storage(format!("invalid workflow id '{}'", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl Persistence for JsonDirPersistence {
    async fn load(&self, id: &str) -> Result<Option<Workflow>> {
        let path = match self.path_for(id) {
            Ok(path) => path,
            // an id that cannot be a file name cannot have been stored
            Err(_) => return Ok(None),
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| OpflowError::storage(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OpflowError::storage(format!("{}: {}", path.display(), e))),
        }
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        let path = self.path_for(&workflow.id)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(workflow)
            .map_err(|e| OpflowError::storage(format!("cannot encode '{}': {}", workflow.id, e)))?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| OpflowError::storage(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| OpflowError::storage(format!("{}: {}", path.display(), e)))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(OpflowError::storage(format!("{}: {}", path.display(), e))),
        }
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| OpflowError::storage(format!("{}: {}", self.dir.display(), e)))?;
        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(OpflowError::storage)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| OpflowError::storage(format!("{}: {}", path.display(), e)))?;
            match serde_json::from_slice::<Workflow>(&bytes) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable workflow file");
                }
            }
        }
        Ok(docs)
    }

    fn name(&self) -> &'static str {
        "json-dir"
    }
}
