//! Domain errors for the Colony orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Colony system.
///
/// "Not found" outcomes of store operations are reported through `Option`/`bool`
/// return values; the `*NotFound` variants are reserved for callers that need an
/// entity to exist (for example linking to a missing parent).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("Goal not found: {0}")]
    GoalNotFound(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Errors raised at the worker invocation boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("Worker invocation timed out after {0}s")]
    Timeout(u64),

    #[error("Worker provider error: {0}")]
    Provider(String),

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Invalid worker response: {0}")]
    InvalidResponse(String),
}

impl InvocationError {
    /// Whether the job that produced this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Provider(_))
    }
}
