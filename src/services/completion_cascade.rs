//! Task completion, dependent unblocking and goal synthesis.
//!
//! Every transition here is a conditional write. Whichever caller wins the
//! write performs the follow-up work, so the event path, the staleness sweep
//! and the backstop can all run the same checks concurrently.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CascadeConfig, Dimensions, Item, ItemPatch, ItemStatus, ItemType, Job, OutputDigest,
    RunWorkerPayload, SynthesisContext, TaskDigest, UpdateGuard, UpdateOutcome, WorkerContext,
    WorkerResponse, DEFAULT_MAX_ATTEMPTS,
};
use crate::domain::ports::{ItemFilter, ItemRepository, JobQueue};
use crate::services::dispatch::DispatchNotifier;
use crate::services::task_manager::TaskManager;

const SUMMARY_MAX_CHARS: usize = 120;

/// What a completion check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    NotFound,
    AlreadyCompleted,
    /// Nothing is assigned and no output names a worker yet.
    NoRequiredWorkers,
    Waiting { missing: Vec<String> },
    /// This call moved the task to `completed`.
    Completed,
}

pub struct CompletionCascade {
    items: Arc<dyn ItemRepository>,
    jobs: Arc<dyn JobQueue>,
    task_manager: Arc<TaskManager>,
    notifier: DispatchNotifier,
    config: CascadeConfig,
    max_attempts: u32,
}

impl CompletionCascade {
    pub fn new(
        items: Arc<dyn ItemRepository>,
        jobs: Arc<dyn JobQueue>,
        task_manager: Arc<TaskManager>,
        config: CascadeConfig,
    ) -> Self {
        Self {
            items,
            jobs,
            task_manager,
            notifier: DispatchNotifier::disabled(),
            config,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_notifier(mut self, notifier: DispatchNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    /// Complete the task if every required worker has produced output, then
    /// cascade. Returns whether the task is completed after the call.
    pub async fn check_completion(&self, task_id: Uuid) -> DomainResult<bool> {
        match self.reconcile(task_id).await? {
            CompletionOutcome::Completed => {
                if let Some(task) = self.items.get(task_id).await? {
                    self.cascade(&task).await?;
                }
                Ok(true)
            }
            CompletionOutcome::AlreadyCompleted => Ok(true),
            CompletionOutcome::Waiting { missing } => {
                debug!(task_id = %task_id, missing = ?missing, "task still waiting on workers");
                Ok(false)
            }
            CompletionOutcome::NotFound | CompletionOutcome::NoRequiredWorkers => Ok(false),
        }
    }

    /// Compare required and produced workers and complete the task when
    /// nothing is missing. Does not cascade.
    pub async fn reconcile(&self, task_id: Uuid) -> DomainResult<CompletionOutcome> {
        let Some(task) = self.items.get(task_id).await? else {
            return Ok(CompletionOutcome::NotFound);
        };
        if task.is_completed() {
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        let produced: BTreeSet<String> = self
            .outputs_of(task_id)
            .await?
            .into_iter()
            .filter_map(|output| output.dimensions.worker_id)
            .collect();

        let required: Vec<String> = if task.dimensions.assigned_workers().is_empty() {
            let inferred: Vec<String> = produced
                .iter()
                .filter(|w| !self.config.orchestration_workers.contains(*w))
                .cloned()
                .collect();
            if !inferred.is_empty() {
                self.persist_inferred(&task, &inferred).await?;
            }
            inferred
        } else {
            task.dimensions.assigned_workers().to_vec()
        };

        if required.is_empty() {
            return Ok(CompletionOutcome::NoRequiredWorkers);
        }

        let missing: Vec<String> = required
            .into_iter()
            .filter(|w| !produced.contains(w))
            .collect();
        if !missing.is_empty() {
            return Ok(CompletionOutcome::Waiting { missing });
        }

        let patch = ItemPatch::new().with_dimensions(Dimensions {
            status: Some(ItemStatus::Completed),
            completed_at: Some(Utc::now()),
            ..Default::default()
        });
        Ok(
            match self
                .items
                .update_where(task_id, patch, UpdateGuard::StatusNot(ItemStatus::Completed))
                .await?
            {
                UpdateOutcome::Applied(_) => {
                    info!(task_id = %task_id, "task completed");
                    CompletionOutcome::Completed
                }
                UpdateOutcome::Rejected(_) => CompletionOutcome::AlreadyCompleted,
                UpdateOutcome::NotFound => CompletionOutcome::NotFound,
            },
        )
    }

    async fn persist_inferred(&self, task: &Item, inferred: &[String]) -> DomainResult<()> {
        let patch = ItemPatch::new().with_dimensions(Dimensions {
            assigned_workers: Some(inferred.to_vec()),
            ..Default::default()
        });
        let outcome = self
            .items
            .update_where(task.id, patch, UpdateGuard::Version(task.version))
            .await?;
        if outcome.is_applied() {
            debug!(task_id = %task.id, workers = ?inferred, "persisted inferred required workers");
        }
        Ok(())
    }

    async fn cascade(&self, task: &Item) -> DomainResult<()> {
        let Some(goal_id) = task.parent_id() else {
            warn!(task_id = %task.id, "completed task has no goal");
            return Ok(());
        };
        self.unblock_dependents(goal_id, task.id).await?;
        self.check_goal(goal_id).await?;
        Ok(())
    }

    /// Offer pending siblings that depend on `task_id` to the task manager.
    async fn unblock_dependents(&self, goal_id: Uuid, task_id: Uuid) -> DomainResult<()> {
        let dependents: Vec<Item> = self
            .items
            .query(
                &ItemFilter::new()
                    .of_type(ItemType::Task)
                    .with_parent(goal_id)
                    .with_status(ItemStatus::Pending),
            )
            .await?
            .into_iter()
            .filter(|t| t.dimensions.dependency_ids().contains(&task_id))
            .collect();

        for dependent in dependents {
            match self.task_manager.assign(dependent.id).await {
                Ok(true) => debug!(task_id = %dependent.id, unblocked_by = %task_id, "dependent assigned"),
                Ok(false) => {}
                Err(e) => warn!(task_id = %dependent.id, error = %e, "failed to assign dependent"),
            }
        }
        Ok(())
    }

    /// Enqueue the goal's synthesis job once every task is completed.
    ///
    /// Returns true only when this call enqueued it.
    pub async fn check_goal(&self, goal_id: Uuid) -> DomainResult<bool> {
        let Some(goal) = self.items.get(goal_id).await? else {
            warn!(goal_id = %goal_id, "goal not found");
            return Ok(false);
        };
        if goal.item_type != ItemType::Goal {
            warn!(goal_id = %goal_id, item_type = %goal.item_type, "check_goal on non-goal item");
            return Ok(false);
        }
        if goal.dimensions.finalized_at.is_some() {
            return Ok(false);
        }

        let tasks = self.task_manager.tasks_for_goal(goal_id).await?;
        if tasks.is_empty() || !tasks.iter().all(Item::is_completed) {
            return Ok(false);
        }

        let claim = ItemPatch::new().with_dimensions(Dimensions {
            finalized_at: Some(Utc::now()),
            ..Default::default()
        });
        let claimed = self
            .items
            .update_where(
                goal_id,
                claim,
                UpdateGuard::DimensionAbsent("finalized_at".to_string()),
            )
            .await?;
        if !claimed.is_applied() {
            debug!(goal_id = %goal_id, "synthesis already claimed");
            return Ok(false);
        }

        match self.enqueue_synthesis(&goal, &tasks).await {
            Ok(job) => {
                info!(goal_id = %goal_id, job_id = %job.id, worker_id = %self.config.synthesis_worker, "synthesis enqueued");
                self.notifier.notify(job.id);
                Ok(true)
            }
            Err(e) => {
                let release = ItemPatch::new().with_dimensions(Dimensions::unset("finalized_at"));
                if let Err(release_err) = self.items.update(goal_id, release).await {
                    warn!(goal_id = %goal_id, error = %release_err, "failed to release synthesis claim");
                }
                Err(e)
            }
        }
    }

    async fn enqueue_synthesis(&self, goal: &Item, tasks: &[Item]) -> DomainResult<Job> {
        let mut digests = Vec::with_capacity(tasks.len());
        for task in tasks {
            let outputs = self
                .outputs_of(task.id)
                .await?
                .iter()
                .map(|output| OutputDigest {
                    worker_id: output
                        .dimensions
                        .worker_id
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                    output: truncate_chars(&output_text(output), self.config.digest_max_chars),
                })
                .collect();
            digests.push(TaskDigest {
                task_id: task.id,
                summary: task.summary.clone(),
                outputs,
            });
        }

        let worker_id = self.config.synthesis_worker.clone();
        let options = self
            .task_manager
            .registry()
            .get(&worker_id)
            .await?
            .map(|w| w.options)
            .unwrap_or_default();
        let payload = RunWorkerPayload {
            worker_id,
            context: WorkerContext {
                goal_id: Some(goal.id),
                synthesis: Some(SynthesisContext {
                    goal_summary: goal.summary.clone(),
                    tasks: digests,
                }),
                ..Default::default()
            },
            options,
        };
        self.jobs
            .enqueue(Job::run_worker(&payload)?.with_max_attempts(self.max_attempts))
            .await
    }

    /// Store a worker's response as a `worker_output` item.
    ///
    /// Outputs land under the task, or under the goal for synthesis jobs. A
    /// job that already recorded its output gets the existing item back.
    pub async fn record_output(&self, job: &Job, response: &WorkerResponse) -> DomainResult<Item> {
        let payload = job.run_worker_payload()?;
        let parent_id = if payload.context.is_synthesis() {
            payload.context.goal_id
        } else {
            payload.context.task_id.or(payload.context.goal_id)
        }
        .ok_or_else(|| {
            DomainError::ValidationFailed(format!("job {} has no task or goal to attach to", job.id))
        })?;

        let job_key = json!(job.id.to_string());
        let existing = self
            .items
            .query(
                &ItemFilter::new()
                    .of_type(ItemType::WorkerOutput)
                    .with_parent(parent_id)
                    .with_dimension("job_id", job_key.clone())
                    .limit(1),
            )
            .await?;
        if let Some(item) = existing.into_iter().next() {
            debug!(job_id = %job.id, item_id = %item.id, "output already recorded");
            return Ok(item);
        }

        let mut dimensions = Dimensions {
            worker_id: Some(payload.worker_id.clone()),
            ..Default::default()
        };
        dimensions.extra.insert("job_id".to_string(), job_key);

        let output = Item::new(ItemType::WorkerOutput, output_summary(&payload.worker_id, &response.output))
            .with_parent(parent_id)
            .with_dimensions(dimensions)
            .with_detail(json!({
                "output": response.output,
                "metadata": response.metadata,
                "job_id": job.id,
            }));
        let output = self.items.create(output).await?;
        debug!(job_id = %job.id, item_id = %output.id, parent_id = %parent_id, "worker output recorded");

        if payload.context.is_synthesis() && self.config.complete_goal_on_synthesis {
            let patch = ItemPatch::new().with_dimensions(Dimensions {
                status: Some(ItemStatus::Completed),
                completed_at: Some(Utc::now()),
                ..Default::default()
            });
            if self
                .items
                .update_where(parent_id, patch, UpdateGuard::StatusNot(ItemStatus::Completed))
                .await?
                .is_applied()
            {
                info!(goal_id = %parent_id, "goal completed by synthesis");
            }
        }

        Ok(output)
    }

    async fn outputs_of(&self, parent_id: Uuid) -> DomainResult<Vec<Item>> {
        self.items
            .query(
                &ItemFilter::new()
                    .of_type(ItemType::WorkerOutput)
                    .with_parent(parent_id),
            )
            .await
    }
}

fn output_text(item: &Item) -> String {
    match item.detail.as_ref().and_then(|d| d.get("output")) {
        Some(Value::String(text)) => text.clone(),
        _ => item.summary.clone(),
    }
}

fn output_summary(worker_id: &str, output: &str) -> String {
    let first_line = output.lines().map(str::trim).find(|l| !l.is_empty());
    match first_line {
        Some(line) => truncate_chars(line, SUMMARY_MAX_CHARS),
        None => format!("Output from {worker_id}"),
    }
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::StaticWorkerCatalog;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteItemRepository, SqliteJobQueue};
    use crate::domain::models::{Interests, WorkerDefinition};
    use crate::domain::ports::JobFilter;
    use crate::services::task_manager::NewTask;
    use crate::services::worker_registry::WorkerRegistry;
    use std::time::Duration;

    struct Fixture {
        items: Arc<SqliteItemRepository>,
        jobs: Arc<SqliteJobQueue>,
        manager: Arc<TaskManager>,
        cascade: CompletionCascade,
    }

    async fn setup(config: CascadeConfig) -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let items = Arc::new(SqliteItemRepository::new(pool.clone()));
        let jobs = Arc::new(SqliteJobQueue::new(pool));
        let workers = vec![
            WorkerDefinition::new("analyst")
                .with_interests(Interests::default().with_item_type("task")),
            WorkerDefinition::new("critic")
                .with_interests(Interests::default().with_item_type("task")),
            WorkerDefinition::new("synthesizer"),
        ];
        let registry = Arc::new(WorkerRegistry::new(
            Arc::new(StaticWorkerCatalog::new(workers)),
            Duration::from_secs(60),
        ));
        let manager = Arc::new(TaskManager::new(items.clone(), jobs.clone(), registry));
        let cascade = CompletionCascade::new(items.clone(), jobs.clone(), manager.clone(), config);
        Fixture {
            items,
            jobs,
            manager,
            cascade,
        }
    }

    async fn add_output(items: &SqliteItemRepository, parent: Uuid, worker: &str, text: &str) {
        let output = Item::new(ItemType::WorkerOutput, text)
            .with_parent(parent)
            .with_dimensions(Dimensions {
                worker_id: Some(worker.to_string()),
                ..Default::default()
            })
            .with_detail(json!({"output": text}));
        items.create(output).await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_every_assigned_worker() {
        let f = setup(CascadeConfig::default()).await;
        let goal = f.manager.create_goal("g").await.unwrap();
        let task = f
            .manager
            .create_task(goal.id, NewTask::new("t").with_agent_count(2))
            .await
            .unwrap();
        assert!(f.manager.assign(task.id).await.unwrap());

        add_output(&f.items, task.id, "analyst", "half").await;
        assert_eq!(
            f.cascade.reconcile(task.id).await.unwrap(),
            CompletionOutcome::Waiting {
                missing: vec!["critic".into()]
            }
        );
        assert!(!f.cascade.check_completion(task.id).await.unwrap());

        add_output(&f.items, task.id, "critic", "other half").await;
        assert!(f.cascade.check_completion(task.id).await.unwrap());
        let stored = f.items.get(task.id).await.unwrap().unwrap();
        assert!(stored.is_completed());
        assert!(stored.dimensions.completed_at.is_some());

        // Idempotent once completed.
        assert!(f.cascade.check_completion(task.id).await.unwrap());
        assert_eq!(
            f.cascade.reconcile(task.id).await.unwrap(),
            CompletionOutcome::AlreadyCompleted
        );
    }

    #[tokio::test]
    async fn test_infers_required_workers_from_outputs() {
        let f = setup(CascadeConfig::default()).await;
        let goal = f.manager.create_goal("g").await.unwrap();
        let task = f.manager.create_task(goal.id, NewTask::new("t")).await.unwrap();

        assert_eq!(
            f.cascade.reconcile(task.id).await.unwrap(),
            CompletionOutcome::NoRequiredWorkers
        );
        add_output(&f.items, task.id, "planner", "plan").await;
        assert_eq!(
            f.cascade.reconcile(task.id).await.unwrap(),
            CompletionOutcome::NoRequiredWorkers
        );

        add_output(&f.items, task.id, "analyst", "done").await;
        assert!(f.cascade.check_completion(task.id).await.unwrap());
        let stored = f.items.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.dimensions.assigned_workers(), ["analyst"]);
    }

    #[tokio::test]
    async fn test_completion_unblocks_dependents_and_finalizes_goal_once() {
        let f = setup(CascadeConfig::default()).await;
        let goal = f.manager.create_goal("Ship the report").await.unwrap();
        let first = f.manager.create_task(goal.id, NewTask::new("draft")).await.unwrap();
        let second = f
            .manager
            .create_task(goal.id, NewTask::new("review").depends_on(first.id))
            .await
            .unwrap();
        assert!(f.manager.assign(first.id).await.unwrap());
        assert!(!f.manager.assign(second.id).await.unwrap());

        add_output(&f.items, first.id, "analyst", "draft text").await;
        assert!(f.cascade.check_completion(first.id).await.unwrap());
        let second_now = f.items.get(second.id).await.unwrap().unwrap();
        assert_eq!(second_now.status(), Some(ItemStatus::Assigned));
        assert!(!f.cascade.check_goal(goal.id).await.unwrap());

        add_output(&f.items, second.id, "analyst", "looks good").await;
        assert!(f.cascade.check_completion(second.id).await.unwrap());

        let goal_now = f.items.get(goal.id).await.unwrap().unwrap();
        assert!(goal_now.dimensions.finalized_at.is_some());
        assert_eq!(goal_now.status(), Some(ItemStatus::Open));
        assert!(!f.cascade.check_goal(goal.id).await.unwrap());

        let synthesis = f.jobs.list(&JobFilter::new().synthesis()).await.unwrap();
        assert_eq!(synthesis.len(), 1);
        let payload = synthesis[0].run_worker_payload().unwrap();
        assert_eq!(payload.worker_id, "synthesizer");
        let context = payload.context.synthesis.unwrap();
        assert_eq!(context.goal_summary, "Ship the report");
        assert_eq!(context.tasks.len(), 2);
        assert_eq!(context.tasks[0].outputs[0].output, "draft text");
    }

    #[tokio::test]
    async fn test_concurrent_checks_complete_once() {
        let f = setup(CascadeConfig::default()).await;
        let goal = f.manager.create_goal("g").await.unwrap();
        let task = f.manager.create_task(goal.id, NewTask::new("t")).await.unwrap();
        assert!(f.manager.assign(task.id).await.unwrap());
        add_output(&f.items, task.id, "analyst", "done").await;

        let (a, b) = tokio::join!(
            f.cascade.reconcile(task.id),
            f.cascade.reconcile(task.id)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == CompletionOutcome::Completed)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_check_goal_edge_cases() {
        let f = setup(CascadeConfig::default()).await;
        assert!(!f.cascade.check_goal(Uuid::new_v4()).await.unwrap());
        let empty = f.manager.create_goal("nothing to do").await.unwrap();
        assert!(!f.cascade.check_goal(empty.id).await.unwrap());
        assert_eq!(f.jobs.count(&JobFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_output_attaches_and_dedupes() {
        let f = setup(CascadeConfig {
            complete_goal_on_synthesis: true,
            ..CascadeConfig::default()
        })
        .await;
        let goal = f.manager.create_goal("g").await.unwrap();
        let task = f.manager.create_task(goal.id, NewTask::new("t")).await.unwrap();
        assert!(f.manager.assign(task.id).await.unwrap());
        let job = f.jobs.list(&JobFilter::new().for_task(task.id)).await.unwrap().remove(0);

        let mut response = WorkerResponse::new("analyst", "\n  Findings: all good\nmore");
        response.metadata.insert("tokens".into(), json!(12));
        let output = f.cascade.record_output(&job, &response).await.unwrap();
        assert_eq!(output.parent_id(), Some(task.id));
        assert_eq!(output.summary, "Findings: all good");
        assert_eq!(output.dimensions.worker_id.as_deref(), Some("analyst"));
        assert_eq!(output.detail.as_ref().unwrap()["metadata"]["tokens"], json!(12));

        let again = f.cascade.record_output(&job, &response).await.unwrap();
        assert_eq!(again.id, output.id);

        add_output(&f.items, task.id, "analyst", "x").await;
        assert!(f.cascade.check_completion(task.id).await.unwrap());
        let synthesis = f.jobs.list(&JobFilter::new().synthesis()).await.unwrap().remove(0);
        let summary = f
            .cascade
            .record_output(&synthesis, &WorkerResponse::new("synthesizer", ""))
            .await
            .unwrap();
        assert_eq!(summary.parent_id(), Some(goal.id));
        assert_eq!(summary.summary, "Output from synthesizer");
        assert!(f.items.get(goal.id).await.unwrap().unwrap().is_completed());
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("ééééé", 3), "éé…");
    }
}
