use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::WorkerDefinition;

/// Source of worker definitions behind the registry cache.
#[async_trait]
pub trait WorkerCatalog: Send + Sync {
    async fn load(&self) -> DomainResult<Vec<WorkerDefinition>>;
}
