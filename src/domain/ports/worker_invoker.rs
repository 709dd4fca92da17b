use async_trait::async_trait;

use crate::domain::errors::InvocationError;
use crate::domain::models::{InvocationOptions, WorkerContext, WorkerResponse};

/// Boundary to whatever actually runs a worker.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(
        &self,
        worker_id: &str,
        context: &WorkerContext,
        options: &InvocationOptions,
    ) -> Result<WorkerResponse, InvocationError>;
}
