use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Job, JobStatus};

/// Filters for listing jobs
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    /// Any of these statuses; all statuses when empty.
    pub statuses: Vec<JobStatus>,
    pub worker_id: Option<String>,
    pub task_id: Option<Uuid>,
    pub goal_id: Option<Uuid>,
    pub synthesis_only: bool,
    pub limit: Option<i64>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Jobs that are pending or running.
    pub fn open() -> Self {
        Self::new()
            .with_status(JobStatus::Pending)
            .with_status(JobStatus::Running)
    }

    pub fn for_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn for_goal(mut self, goal_id: Uuid) -> Self {
        self.goal_id = Some(goal_id);
        self
    }

    pub fn synthesis(mut self) -> Self {
        self.synthesis_only = true;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Durable lease-based job queue.
///
/// Every state transition is conditional on the row still being in the state
/// the caller observed, so concurrent schedulers never both act on one job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> DomainResult<Job>;

    /// Lease up to `limit` eligible jobs to `owner`, reaping expired leases first.
    async fn claim_ready(&self, owner: &str, limit: u32) -> DomainResult<Vec<Job>>;

    /// Lease one specific job if it is eligible.
    async fn claim(&self, id: Uuid, owner: &str) -> DomainResult<Option<Job>>;

    /// Mark a running job completed.
    async fn complete(&self, id: Uuid) -> DomainResult<bool>;

    /// Record a failed attempt; retried with backoff unless permanent or exhausted.
    async fn fail(&self, id: Uuid, error: &str, permanent: bool) -> DomainResult<Option<Job>>;

    /// Return a running job to pending without consuming an attempt.
    async fn release_lease(&self, id: Uuid) -> DomainResult<bool>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Job>>;

    async fn list(&self, filter: &JobFilter) -> DomainResult<Vec<Job>>;

    async fn count(&self, filter: &JobFilter) -> DomainResult<u64>;
}
