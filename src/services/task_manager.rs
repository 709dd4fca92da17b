//! Task admission and assignment.
//!
//! A task is admitted once every dependency is completed. Assignment ranks
//! the enabled workers against the task, records the chosen workers on the
//! task with a version-guarded write, and only the writer that wins that
//! update enqueues the `run_worker` jobs.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Dimensions, Item, ItemPatch, ItemStatus, ItemType, Job, RunWorkerPayload, UpdateGuard,
    UpdateOutcome, WorkerContext, WorkerDefinition, DEFAULT_MAX_ATTEMPTS,
};
use crate::domain::ports::{ItemFilter, ItemRepository, JobQueue};
use crate::services::dispatch::DispatchNotifier;
use crate::services::interest_matcher;
use crate::services::worker_registry::WorkerRegistry;

/// Re-reads of a task whose version moved for reasons other than a competing assignment.
const MAX_ASSIGN_ATTEMPTS: u32 = 3;

/// Input for [`TaskManager::create_task`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub summary: String,
    pub dependencies: Vec<Uuid>,
    pub agent_count: Option<u32>,
    pub task_type: Option<String>,
    pub topic: Option<String>,
    pub priority: Option<i64>,
    pub detail: Option<Value>,
}

impl NewTask {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, task_id: Uuid) -> Self {
        self.dependencies.push(task_id);
        self
    }

    pub fn with_agent_count(mut self, count: u32) -> Self {
        self.agent_count = Some(count);
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// The state a caller observed before asking for an assignment.
///
/// Assignment only proceeds while the task still matches it, so callers
/// acting on an old read cannot assign a task twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignExpectation {
    /// The task is still waiting for its first assignment.
    Pending,
    /// The task is unchanged since the caller read this version.
    Version(u64),
}

impl AssignExpectation {
    fn matches(self, task: &Item) -> bool {
        match self {
            Self::Pending => task.status() == Some(ItemStatus::Pending),
            Self::Version(version) => task.version == version,
        }
    }
}

pub struct TaskManager {
    items: Arc<dyn ItemRepository>,
    jobs: Arc<dyn JobQueue>,
    registry: Arc<WorkerRegistry>,
    notifier: DispatchNotifier,
    max_attempts: u32,
}

impl TaskManager {
    pub fn new(
        items: Arc<dyn ItemRepository>,
        jobs: Arc<dyn JobQueue>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            items,
            jobs,
            registry,
            notifier: DispatchNotifier::disabled(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_notifier(mut self, notifier: DispatchNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Retry budget given to the jobs this manager enqueues.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Whether every well-formed dependency of the task is completed.
    pub async fn can_start(&self, task_id: Uuid) -> DomainResult<bool> {
        match self.items.get(task_id).await? {
            Some(task) => self.dependencies_met(&task).await,
            None => Ok(false),
        }
    }

    async fn dependencies_met(&self, task: &Item) -> DomainResult<bool> {
        for dependency in task.dimensions.dependency_ids() {
            match self.items.get(dependency).await? {
                Some(dep) if dep.is_completed() => {}
                Some(_) => return Ok(false),
                None => {
                    warn!(task_id = %task.id, dependency = %dependency, "dependency not found, ignoring");
                }
            }
        }
        Ok(true)
    }

    /// Pick workers for a pending task and enqueue their jobs.
    ///
    /// Returns true only for the caller whose assignment was recorded. A task
    /// that is already assigned is left alone.
    pub async fn assign(&self, task_id: Uuid) -> DomainResult<bool> {
        self.assign_if(task_id, AssignExpectation::Pending).await
    }

    /// Assign a task only while it still matches what the caller saw.
    pub async fn assign_if(&self, task_id: Uuid, expected: AssignExpectation) -> DomainResult<bool> {
        for _ in 0..MAX_ASSIGN_ATTEMPTS {
            let Some(task) = self.items.get(task_id).await? else {
                debug!(task_id = %task_id, "assign: task not found");
                return Ok(false);
            };
            if task.item_type != ItemType::Task {
                warn!(task_id = %task_id, item_type = %task.item_type, "assign: item is not a task");
                return Ok(false);
            }
            if task.is_completed() {
                return Ok(false);
            }
            if !expected.matches(&task) {
                debug!(task_id = %task_id, expected = ?expected, version = task.version, "assign: task moved on");
                return Ok(false);
            }
            if !self.dependencies_met(&task).await? {
                debug!(task_id = %task_id, "assign: dependencies not met");
                return Ok(false);
            }

            let selected = self.select_workers(&task).await?;
            if selected.is_empty() {
                warn!(task_id = %task_id, summary = %task.summary, "no interested workers for task");
                return Ok(false);
            }

            let patch = ItemPatch::new().with_dimensions(Dimensions {
                status: Some(ItemStatus::Assigned),
                assigned_workers: Some(selected.iter().map(|w| w.id.clone()).collect()),
                assigned_at: Some(Utc::now()),
                ..Default::default()
            });
            match self
                .items
                .update_where(task_id, patch, UpdateGuard::Version(task.version))
                .await?
            {
                UpdateOutcome::Applied(assigned) => {
                    self.enqueue_jobs(&assigned, &selected).await?;
                    info!(
                        task_id = %task_id,
                        workers = ?assigned.dimensions.assigned_workers(),
                        "task assigned"
                    );
                    return Ok(true);
                }
                UpdateOutcome::NotFound => return Ok(false),
                // Re-read; the expectation check decides whether a rival assigned it.
                UpdateOutcome::Rejected(_) => {}
            }
        }

        debug!(task_id = %task_id, "assign: task kept changing, giving up for now");
        Ok(false)
    }

    async fn select_workers(&self, task: &Item) -> DomainResult<Vec<WorkerDefinition>> {
        let workers = self.registry.enabled_workers().await?;
        let ranked = interest_matcher::rank(&workers, task);

        let ranked = match task.dimensions.task_type.as_deref() {
            Some(task_type) => {
                let affine: Vec<_> = ranked
                    .iter()
                    .filter(|s| s.worker.has_affinity(task_type))
                    .cloned()
                    .collect();
                if affine.is_empty() {
                    ranked
                } else {
                    affine
                }
            }
            None => ranked,
        };

        Ok(ranked
            .into_iter()
            .take(task.dimensions.agent_count())
            .map(|s| s.worker)
            .collect())
    }

    async fn enqueue_jobs(&self, task: &Item, workers: &[WorkerDefinition]) -> DomainResult<()> {
        let goal_id = task.parent_id();
        for worker in workers {
            let payload = RunWorkerPayload {
                worker_id: worker.id.clone(),
                context: WorkerContext {
                    task_id: Some(task.id),
                    goal_id,
                    task_summary: Some(task.summary.clone()),
                    task_type: task.dimensions.task_type.clone(),
                    ..Default::default()
                },
                options: worker.options.clone(),
            };
            let job = self
                .jobs
                .enqueue(Job::run_worker(&payload)?.with_max_attempts(self.max_attempts))
                .await?;
            debug!(task_id = %task.id, job_id = %job.id, worker_id = %worker.id, "enqueued worker job");
            self.notifier.notify(job.id);
        }
        Ok(())
    }

    pub async fn create_goal(&self, summary: impl Into<String> + Send) -> DomainResult<Item> {
        let goal = self.items.create(Item::goal(summary)).await?;
        info!(goal_id = %goal.id, "goal created");
        Ok(goal)
    }

    /// Create a pending task under an existing goal.
    pub async fn create_task(&self, goal_id: Uuid, new_task: NewTask) -> DomainResult<Item> {
        match self.items.get(goal_id).await? {
            Some(goal) if goal.item_type == ItemType::Goal => {}
            _ => return Err(DomainError::GoalNotFound(goal_id)),
        }
        if new_task.summary.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task summary cannot be empty".to_string(),
            ));
        }

        let dimensions = Dimensions {
            dependencies: (!new_task.dependencies.is_empty())
                .then(|| new_task.dependencies.iter().map(Uuid::to_string).collect()),
            agent_count: new_task.agent_count,
            task_type: new_task.task_type,
            topic: new_task.topic,
            priority: new_task.priority,
            ..Default::default()
        };
        let mut task = Item::task(goal_id, new_task.summary).with_dimensions(dimensions);
        task.detail = new_task.detail;

        let task = self.items.create(task).await?;
        info!(task_id = %task.id, goal_id = %goal_id, "task created");
        Ok(task)
    }

    /// Tasks under a goal in creation order.
    pub async fn tasks_for_goal(&self, goal_id: Uuid) -> DomainResult<Vec<Item>> {
        self.items
            .query(&ItemFilter::new().of_type(ItemType::Task).with_parent(goal_id))
            .await
    }
}
