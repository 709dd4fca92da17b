//! Worker catalogs backing the registry.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkerDefinition;
use crate::domain::ports::WorkerCatalog;

/// Fixed in-memory list of definitions.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkerCatalog {
    workers: Vec<WorkerDefinition>,
}

impl StaticWorkerCatalog {
    pub fn new(workers: Vec<WorkerDefinition>) -> Self {
        Self { workers }
    }
}

#[async_trait]
impl WorkerCatalog for StaticWorkerCatalog {
    async fn load(&self) -> DomainResult<Vec<WorkerDefinition>> {
        Ok(self.workers.clone())
    }
}

/// Reads definitions from a YAML file on every load.
///
/// The file holds either a bare list or a `workers:` mapping. A missing file
/// is an empty catalog.
#[derive(Debug, Clone)]
pub struct YamlWorkerCatalog {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { workers: Vec<WorkerDefinition> },
    List(Vec<WorkerDefinition>),
}

impl YamlWorkerCatalog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse(contents: &str) -> DomainResult<Vec<WorkerDefinition>> {
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: CatalogFile = serde_yaml::from_str(contents)
            .map_err(|e| DomainError::SerializationError(format!("worker catalog: {e}")))?;
        let workers = match file {
            CatalogFile::Wrapped { workers } | CatalogFile::List(workers) => workers,
        };
        for worker in &workers {
            if worker.id.trim().is_empty() {
                return Err(DomainError::ValidationFailed(
                    "worker definition with empty id".to_string(),
                ));
            }
        }
        Ok(workers)
    }
}

#[async_trait]
impl WorkerCatalog for YamlWorkerCatalog {
    async fn load(&self) -> DomainResult<Vec<WorkerDefinition>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "worker catalog not found, no workers registered");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(DomainError::ExecutionFailed(format!(
                    "failed to read worker catalog {}: {e}",
                    self.path.display()
                )))
            }
        };
        Self::parse(&contents)
    }
}
