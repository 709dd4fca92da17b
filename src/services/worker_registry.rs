//! Cached view of the worker catalog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{RegistryConfig, WorkerDefinition};
use crate::domain::ports::WorkerCatalog;

struct CachedDefinitions {
    workers: Arc<Vec<WorkerDefinition>>,
    loaded_at: Instant,
}

/// Serves worker definitions from a catalog, reloading after `ttl`.
pub struct WorkerRegistry {
    catalog: Arc<dyn WorkerCatalog>,
    ttl: Duration,
    cache: RwLock<Option<CachedDefinitions>>,
}

impl WorkerRegistry {
    pub fn new(catalog: Arc<dyn WorkerCatalog>, ttl: Duration) -> Self {
        Self {
            catalog,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(catalog: Arc<dyn WorkerCatalog>, config: &RegistryConfig) -> Self {
        Self::new(catalog, Duration::from_secs(config.cache_ttl_secs))
    }

    /// Every known definition, enabled or not.
    pub async fn all(&self) -> DomainResult<Arc<Vec<WorkerDefinition>>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.workers));
                }
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.workers));
            }
        }

        match self.catalog.load().await {
            Ok(workers) => {
                debug!(count = workers.len(), "loaded worker definitions");
                let workers = Arc::new(workers);
                *cache = Some(CachedDefinitions {
                    workers: Arc::clone(&workers),
                    loaded_at: Instant::now(),
                });
                Ok(workers)
            }
            Err(e) => match cache.as_ref() {
                Some(stale) => {
                    warn!(error = %e, "worker catalog reload failed, serving stale definitions");
                    Ok(Arc::clone(&stale.workers))
                }
                None => Err(e),
            },
        }
    }

    pub async fn enabled_workers(&self) -> DomainResult<Vec<WorkerDefinition>> {
        Ok(self
            .all()
            .await?
            .iter()
            .filter(|w| w.enabled)
            .cloned()
            .collect())
    }

    pub async fn get(&self, id: &str) -> DomainResult<Option<WorkerDefinition>> {
        Ok(self.all().await?.iter().find(|w| w.id == id).cloned())
    }

    /// Drop the cache so the next lookup reloads.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}
