//! Scheduler - the polling loop that drives jobs and tasks forward.
//!
//! Each tick:
//!
//! - **jobs**: claims ready jobs and invokes their workers concurrently
//! - **admission**: offers pending tasks to the task manager
//! - **staleness**: re-admits assigned tasks that went quiet
//! - **backstop**: periodically re-checks open goals for missed completions
//!
//! Several schedulers may share one store; leases keep them from acting on
//! the same job.

pub mod types;

pub use types::{JobOutcome, SchedulerEvent, SchedulerStats, SchedulerStatus, TickReport};

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainResult, InvocationError};
use crate::domain::models::{
    Item, ItemStatus, ItemType, Job, JobKind, JobStatus, RateLimitConfig, SchedulerConfig,
};
use crate::domain::ports::{ItemFilter, ItemRepository, JobFilter, JobQueue, WorkerInvoker};
use crate::services::completion_cascade::CompletionCascade;
use crate::services::task_manager::{AssignExpectation, TaskManager};

/// Build the limiter shared by every invocation of one scheduler.
pub fn build_rate_limiter(config: &RateLimitConfig) -> DefaultDirectRateLimiter {
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
    let quota = (config.requests_per_second > 0.0)
        .then(|| 1.0 / config.requests_per_second)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .and_then(Quota::with_period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
    RateLimiter::direct(quota.allow_burst(burst))
}

fn generated_owner_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("scheduler-{}", &id[..8])
}

fn emit(event_tx: &mpsc::Sender<SchedulerEvent>, event: SchedulerEvent) {
    if event_tx.try_send(event).is_err() {
        debug!("scheduler event dropped");
    }
}

async fn next_hint(hints: &mut Option<mpsc::UnboundedReceiver<Uuid>>) -> Option<Uuid> {
    match hints {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drives the job queue and the task lifecycle.
#[derive(Clone)]
pub struct Scheduler {
    items: Arc<dyn ItemRepository>,
    jobs: Arc<dyn JobQueue>,
    invoker: Arc<dyn WorkerInvoker>,
    task_manager: Arc<TaskManager>,
    cascade: Arc<CompletionCascade>,
    limiter: Arc<DefaultDirectRateLimiter>,
    config: SchedulerConfig,
    owner_id: String,
    status: Arc<RwLock<SchedulerStatus>>,
    stats: Arc<RwLock<SchedulerStats>>,
    last_backstop: Arc<Mutex<Option<Instant>>>,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    pub fn new(
        items: Arc<dyn ItemRepository>,
        jobs: Arc<dyn JobQueue>,
        invoker: Arc<dyn WorkerInvoker>,
        cascade: Arc<CompletionCascade>,
        config: SchedulerConfig,
        rate_limit: &RateLimitConfig,
    ) -> Self {
        let owner_id = config.owner_id.clone().unwrap_or_else(generated_owner_id);
        Self {
            items,
            jobs,
            invoker,
            task_manager: Arc::clone(cascade.task_manager()),
            cascade,
            limiter: Arc::new(build_rate_limiter(rate_limit)),
            config,
            owner_id,
            status: Arc::new(RwLock::new(SchedulerStatus::Idle)),
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            last_backstop: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Run until [`stop`](Self::stop) is called.
    ///
    /// `hints` carries ids of freshly enqueued jobs; each is claimed and
    /// processed right away. Ticks still run on the poll interval.
    pub async fn run(
        &self,
        hints: Option<mpsc::UnboundedReceiver<Uuid>>,
        event_tx: mpsc::Sender<SchedulerEvent>,
    ) -> DomainResult<()> {
        *self.status.write().await = SchedulerStatus::Running;
        info!(owner_id = %self.owner_id, "scheduler started");
        emit(
            &event_tx,
            SchedulerEvent::Started {
                owner_id: self.owner_id.clone(),
            },
        );

        let mut hints = hints;
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let status = *self.status.read().await;
            if matches!(
                status,
                SchedulerStatus::ShuttingDown | SchedulerStatus::Stopped
            ) {
                break;
            }

            let mut hints_closed = false;
            tokio::select! {
                () = self.shutdown.notified() => {}
                _ = interval.tick() => {
                    if status == SchedulerStatus::Paused {
                        continue;
                    }
                    if let Err(e) = self.tick(&event_tx).await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                hint = next_hint(&mut hints) => match hint {
                    Some(job_id) if status != SchedulerStatus::Paused => {
                        self.dispatch_hint(job_id, &event_tx).await;
                    }
                    Some(_) => {}
                    None => hints_closed = true,
                },
            }
            if hints_closed {
                debug!("dispatch hint channel closed, polling only");
                hints = None;
            }
        }

        *self.status.write().await = SchedulerStatus::Stopped;
        info!(owner_id = %self.owner_id, "scheduler stopped");
        emit(&event_tx, SchedulerEvent::Stopped);
        Ok(())
    }

    /// Run one full iteration of the loop.
    pub async fn tick(&self, event_tx: &mpsc::Sender<SchedulerEvent>) -> DomainResult<TickReport> {
        let mut report = TickReport::default();

        let claimed = self
            .jobs
            .claim_ready(&self.owner_id, self.config.batch_size)
            .await?;
        report.claimed = claimed.len();
        let outcomes = join_all(claimed.into_iter().map(|job| self.run_job(job, event_tx))).await;
        for outcome in outcomes.iter().flatten() {
            report.record_job(outcome);
        }

        let (admitted, reassigned) = tokio::join!(
            self.admission_sweep(event_tx),
            self.staleness_sweep(event_tx)
        );
        report.admitted = admitted.unwrap_or_else(|e| {
            warn!(error = %e, "admission sweep failed");
            0
        });
        report.reassigned = reassigned.unwrap_or_else(|e| {
            warn!(error = %e, "staleness sweep failed");
            0
        });

        if self.backstop_due().await {
            report.backstop_ran = true;
            report.goals_finalized = self.run_backstop(event_tx).await?;
        }

        self.stats.write().await.record_tick(&report);
        debug!(owner_id = %self.owner_id, report = ?report, "tick completed");
        emit(event_tx, SchedulerEvent::TickCompleted(report.clone()));
        Ok(report)
    }

    async fn dispatch_hint(&self, job_id: Uuid, event_tx: &mpsc::Sender<SchedulerEvent>) {
        match self.jobs.claim(job_id, &self.owner_id).await {
            Ok(Some(job)) => match self.run_job(job, event_tx).await {
                Some(outcome) => debug!(job_id = %job_id, outcome = ?outcome, "hinted job processed"),
                None => debug!(job_id = %job_id, "hinted job left for the next tick"),
            },
            Ok(None) => debug!(job_id = %job_id, "hinted job not claimable"),
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to claim hinted job"),
        }
    }

    async fn run_job(
        &self,
        job: Job,
        event_tx: &mpsc::Sender<SchedulerEvent>,
    ) -> Option<JobOutcome> {
        let job_id = job.id;
        emit(
            event_tx,
            SchedulerEvent::JobClaimed {
                job_id,
                worker_id: job.run_worker_payload().ok().map(|p| p.worker_id),
            },
        );
        match self.process_job(job, event_tx).await {
            Ok(outcome) => {
                self.stats.write().await.record_job(&outcome);
                Some(outcome)
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "job processing failed");
                None
            }
        }
    }

    /// Invoke the worker for a claimed job and settle the job.
    pub async fn process_job(
        &self,
        job: Job,
        event_tx: &mpsc::Sender<SchedulerEvent>,
    ) -> DomainResult<JobOutcome> {
        let payload = match &job.kind {
            JobKind::RunWorker => match job.run_worker_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    return self
                        .settle_failure(&job, &format!("invalid run_worker payload: {e}"), true, event_tx)
                        .await;
                }
            },
            JobKind::Unknown(kind) => {
                return self
                    .settle_failure(&job, &format!("unknown job kind: {kind}"), true, event_tx)
                    .await;
            }
        };

        self.limiter.until_ready().await;
        let timeout_secs = self.config.invocation_timeout_secs;
        let invocation = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.invoker
                .invoke(&payload.worker_id, &payload.context, &payload.options),
        )
        .await
        .unwrap_or(Err(InvocationError::Timeout(timeout_secs)));

        let response = match invocation {
            Ok(response) => response,
            Err(e) => {
                warn!(job_id = %job.id, worker_id = %payload.worker_id, error = %e, "worker invocation failed");
                return self
                    .settle_failure(&job, &e.to_string(), !e.is_retryable(), event_tx)
                    .await;
            }
        };

        let output = match self.cascade.record_output(&job, &response).await {
            Ok(output) => output,
            Err(e) => {
                return self
                    .settle_failure(&job, &format!("failed to record output: {e}"), false, event_tx)
                    .await;
            }
        };

        if !self.jobs.complete(job.id).await? {
            warn!(job_id = %job.id, "lease lost before completion");
            return Ok(JobOutcome::LeaseLost);
        }
        info!(job_id = %job.id, worker_id = %payload.worker_id, output_id = %output.id, "job succeeded");
        emit(
            event_tx,
            SchedulerEvent::JobSucceeded {
                job_id: job.id,
                worker_id: payload.worker_id.clone(),
                output_id: output.id,
            },
        );

        let mut task_completed = false;
        if let (Some(task_id), false) = (payload.context.task_id, payload.context.is_synthesis()) {
            task_completed = self.cascade.check_completion(task_id).await?;
            if task_completed {
                emit(event_tx, SchedulerEvent::TaskCompleted { task_id });
            }
        }

        Ok(JobOutcome::Succeeded {
            output_id: output.id,
            task_completed,
        })
    }

    async fn settle_failure(
        &self,
        job: &Job,
        error: &str,
        permanent: bool,
        event_tx: &mpsc::Sender<SchedulerEvent>,
    ) -> DomainResult<JobOutcome> {
        let Some(updated) = self.jobs.fail(job.id, error, permanent).await? else {
            warn!(job_id = %job.id, "lease lost before failure could be recorded");
            return Ok(JobOutcome::LeaseLost);
        };
        if updated.status == JobStatus::Failed {
            warn!(job_id = %job.id, attempts = updated.attempts, error = %error, "job failed");
            emit(
                event_tx,
                SchedulerEvent::JobFailed {
                    job_id: job.id,
                    error: error.to_string(),
                },
            );
            Ok(JobOutcome::Failed {
                error: error.to_string(),
            })
        } else {
            debug!(job_id = %job.id, attempts = updated.attempts, scheduled_for = %updated.scheduled_for, "job will retry");
            emit(
                event_tx,
                SchedulerEvent::JobRetrying {
                    job_id: job.id,
                    attempts: updated.attempts,
                    error: error.to_string(),
                },
            );
            Ok(JobOutcome::Retrying {
                error: error.to_string(),
            })
        }
    }

    /// Offer every pending task to the task manager.
    async fn admission_sweep(&self, event_tx: &mpsc::Sender<SchedulerEvent>) -> DomainResult<usize> {
        let pending = self
            .items
            .query(
                &ItemFilter::new()
                    .of_type(ItemType::Task)
                    .with_status(ItemStatus::Pending),
            )
            .await?;

        let results = join_all(pending.iter().map(|task| self.task_manager.assign(task.id))).await;
        let mut admitted = 0;
        for (task, result) in pending.iter().zip(results) {
            match result {
                Ok(true) => {
                    admitted += 1;
                    emit(
                        event_tx,
                        SchedulerEvent::TaskAssigned {
                            task_id: task.id,
                            reassigned: false,
                        },
                    );
                }
                Ok(false) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "admission failed"),
            }
        }
        Ok(admitted)
    }

    /// Re-check assigned tasks that have been quiet past the threshold.
    ///
    /// A quiet task with outputs gets a completion check; one with no outputs
    /// and no open jobs is assigned again.
    async fn staleness_sweep(&self, event_tx: &mpsc::Sender<SchedulerEvent>) -> DomainResult<usize> {
        let threshold = chrono::Duration::seconds(
            i64::try_from(self.config.staleness_threshold_secs).unwrap_or(i64::MAX / 1000),
        );
        let cutoff = Utc::now() - threshold;
        let stale: Vec<Item> = self
            .items
            .query(
                &ItemFilter::new()
                    .of_type(ItemType::Task)
                    .with_status(ItemStatus::Assigned),
            )
            .await?
            .into_iter()
            .filter(|task| task.dimensions.assigned_at.is_none_or(|at| at < cutoff))
            .collect();

        let results = join_all(stale.iter().map(|task| self.revive(task))).await;
        let mut reassigned = 0;
        for (task, result) in stale.iter().zip(results) {
            match result {
                Ok(true) => {
                    reassigned += 1;
                    emit(
                        event_tx,
                        SchedulerEvent::TaskAssigned {
                            task_id: task.id,
                            reassigned: true,
                        },
                    );
                }
                Ok(false) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "staleness check failed"),
            }
        }
        Ok(reassigned)
    }

    async fn revive(&self, task: &Item) -> DomainResult<bool> {
        let outputs = self
            .items
            .count(
                &ItemFilter::new()
                    .of_type(ItemType::WorkerOutput)
                    .with_parent(task.id),
            )
            .await?;
        if outputs > 0 {
            self.cascade.check_completion(task.id).await?;
            return Ok(false);
        }

        let open_jobs = self.jobs.count(&JobFilter::open().for_task(task.id)).await?;
        if open_jobs > 0 {
            return Ok(false);
        }

        info!(task_id = %task.id, assigned_at = ?task.dimensions.assigned_at, "re-admitting stuck task");
        self.task_manager
            .assign_if(task.id, AssignExpectation::Version(task.version))
            .await
    }

    async fn backstop_due(&self) -> bool {
        let mut last = self.last_backstop.lock().await;
        let due = last.is_none_or(|at| {
            at.elapsed() >= Duration::from_secs(self.config.backstop_interval_secs)
        });
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    /// Re-run completion checks on every open, unfinalized goal.
    ///
    /// Returns how many goals this sweep finalized.
    pub async fn run_backstop(&self, event_tx: &mpsc::Sender<SchedulerEvent>) -> DomainResult<usize> {
        let goals: Vec<Item> = self
            .items
            .query(
                &ItemFilter::new()
                    .of_type(ItemType::Goal)
                    .with_status(ItemStatus::Open),
            )
            .await?
            .into_iter()
            .filter(|goal| goal.dimensions.finalized_at.is_none())
            .collect();

        let mut finalized = 0;
        for goal in &goals {
            for task in self.task_manager.tasks_for_goal(goal.id).await? {
                if task.is_completed() {
                    continue;
                }
                if let Err(e) = self.cascade.check_completion(task.id).await {
                    warn!(task_id = %task.id, error = %e, "backstop completion check failed");
                }
            }
            match self.cascade.check_goal(goal.id).await {
                Ok(true) => finalized += 1,
                Ok(false) => {}
                Err(e) => warn!(goal_id = %goal.id, error = %e, "backstop goal check failed"),
            }
        }

        debug!(goals_checked = goals.len(), goals_finalized = finalized, "backstop sweep completed");
        emit(
            event_tx,
            SchedulerEvent::BackstopCompleted {
                goals_checked: goals.len(),
                goals_finalized: finalized,
            },
        );
        Ok(finalized)
    }

    pub async fn status(&self) -> SchedulerStatus {
        *self.status.read().await
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }

    pub async fn pause(&self) {
        let mut status = self.status.write().await;
        if *status == SchedulerStatus::Running {
            *status = SchedulerStatus::Paused;
        }
    }

    pub async fn resume(&self) {
        let mut status = self.status.write().await;
        if *status == SchedulerStatus::Paused {
            *status = SchedulerStatus::Running;
        }
    }

    /// Stop the loop once the current tick finishes.
    pub async fn stop(&self) {
        *self.status.write().await = SchedulerStatus::ShuttingDown;
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::StaticWorkerCatalog;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteItemRepository, SqliteJobQueue};
    use crate::domain::models::{
        CascadeConfig, Dimensions, Interests, InvocationOptions, ItemPatch, WorkerContext,
        WorkerDefinition, WorkerResponse,
    };
    use crate::services::dispatch::DispatchNotifier;
    use crate::services::task_manager::NewTask;
    use crate::services::worker_registry::WorkerRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct ScriptedInvoker {
        errors: HashMap<String, InvocationError>,
        hangs: HashSet<String>,
    }

    #[async_trait]
    impl WorkerInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            worker_id: &str,
            _context: &WorkerContext,
            _options: &InvocationOptions,
        ) -> Result<WorkerResponse, InvocationError> {
            if self.hangs.contains(worker_id) {
                std::future::pending::<()>().await;
            }
            match self.errors.get(worker_id) {
                Some(e) => Err(e.clone()),
                None => Ok(WorkerResponse::new(worker_id, format!("{worker_id} finished"))),
            }
        }
    }

    struct Fixture {
        items: Arc<SqliteItemRepository>,
        jobs: Arc<SqliteJobQueue>,
        manager: Arc<TaskManager>,
        scheduler: Scheduler,
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_ms: 3_600_000,
            owner_id: Some("test-scheduler".into()),
            ..SchedulerConfig::default()
        }
    }

    async fn setup(invoker: ScriptedInvoker, notifier: DispatchNotifier) -> Fixture {
        setup_with_config(invoker, notifier, test_config()).await
    }

    async fn setup_with_config(
        invoker: ScriptedInvoker,
        notifier: DispatchNotifier,
        config: SchedulerConfig,
    ) -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let items = Arc::new(SqliteItemRepository::new(pool.clone()));
        let jobs = Arc::new(SqliteJobQueue::new(pool));
        let registry = Arc::new(WorkerRegistry::new(
            Arc::new(StaticWorkerCatalog::new(vec![
                WorkerDefinition::new("analyst")
                    .with_interests(Interests::default().with_item_type("task")),
                WorkerDefinition::new("synthesizer"),
            ])),
            Duration::from_secs(60),
        ));
        let manager = Arc::new(
            TaskManager::new(items.clone(), jobs.clone(), registry).with_notifier(notifier.clone()),
        );
        let cascade = Arc::new(
            CompletionCascade::new(items.clone(), jobs.clone(), manager.clone(), CascadeConfig::default())
                .with_notifier(notifier),
        );
        let scheduler = Scheduler::new(
            items.clone(),
            jobs.clone(),
            Arc::new(invoker),
            cascade,
            config,
            &RateLimitConfig::default(),
        );
        Fixture {
            items,
            jobs,
            manager,
            scheduler,
        }
    }

    fn events() -> (mpsc::Sender<SchedulerEvent>, mpsc::Receiver<SchedulerEvent>) {
        mpsc::channel(256)
    }

    #[tokio::test]
    async fn test_ticks_drive_goal_to_synthesis() {
        let f = setup(ScriptedInvoker::default(), DispatchNotifier::disabled()).await;
        let (tx, _rx) = events();
        let goal = f.manager.create_goal("Summarize logs").await.unwrap();
        let task = f.manager.create_task(goal.id, NewTask::new("read logs")).await.unwrap();

        let first = f.scheduler.tick(&tx).await.unwrap();
        assert_eq!(first.claimed, 0);
        assert_eq!(first.admitted, 1);
        assert!(first.backstop_ran);

        let second = f.scheduler.tick(&tx).await.unwrap();
        assert_eq!(second.claimed, 1);
        assert_eq!(second.succeeded, 1);
        assert!(f.items.get(task.id).await.unwrap().unwrap().is_completed());
        assert!(!second.backstop_ran);

        let third = f.scheduler.tick(&tx).await.unwrap();
        assert_eq!(third.succeeded, 1);
        let goal_outputs = f
            .items
            .query(
                &ItemFilter::new()
                    .of_type(ItemType::WorkerOutput)
                    .with_parent(goal.id),
            )
            .await
            .unwrap();
        assert_eq!(goal_outputs.len(), 1);
        assert_eq!(goal_outputs[0].dimensions.worker_id.as_deref(), Some("synthesizer"));

        let stats = f.scheduler.stats().await;
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.jobs_succeeded, 2);
    }

    #[tokio::test]
    async fn test_retryable_and_permanent_failures() {
        let mut invoker = ScriptedInvoker::default();
        invoker
            .errors
            .insert("analyst".into(), InvocationError::Provider("503".into()));
        let f = setup(invoker, DispatchNotifier::disabled()).await;
        let (tx, _rx) = events();

        let retry = f
            .jobs
            .enqueue(Job::new(JobKind::RunWorker, json!({"worker_id": "analyst", "context": {}})))
            .await
            .unwrap();
        let claimed = f.jobs.claim(retry.id, "test-scheduler").await.unwrap().unwrap();
        let outcome = f.scheduler.process_job(claimed, &tx).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Retrying { .. }));
        let stored = f.jobs.get(retry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(stored.scheduled_for > Utc::now());

        let unknown = f
            .jobs
            .enqueue(Job::new(JobKind::Unknown("reindex".into()), json!({})))
            .await
            .unwrap();
        let claimed = f.jobs.claim(unknown.id, "test-scheduler").await.unwrap().unwrap();
        let outcome = f.scheduler.process_job(claimed, &tx).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        assert_eq!(
            f.jobs.get(unknown.id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );

        let garbage = f
            .jobs
            .enqueue(Job::new(JobKind::RunWorker, json!({"nope": true})))
            .await
            .unwrap();
        let claimed = f.jobs.claim(garbage.id, "test-scheduler").await.unwrap().unwrap();
        assert!(matches!(
            f.scheduler.process_job(claimed, &tx).await.unwrap(),
            JobOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_hung_invocation_times_out_without_stalling_batch() {
        let mut invoker = ScriptedInvoker::default();
        invoker.hangs.insert("sleeper".into());
        let config = SchedulerConfig {
            invocation_timeout_secs: 1,
            ..test_config()
        };
        let f = setup_with_config(invoker, DispatchNotifier::disabled(), config).await;
        let (tx, _rx) = events();
        let goal = f.manager.create_goal("g").await.unwrap();

        let mut job_ids = HashMap::new();
        for worker in ["analyst", "sleeper", "scribe"] {
            let task = f
                .manager
                .create_task(goal.id, NewTask::new(format!("{worker} task")))
                .await
                .unwrap();
            let job = f
                .jobs
                .enqueue(Job::new(
                    JobKind::RunWorker,
                    json!({"worker_id": worker, "context": {"task_id": task.id, "goal_id": goal.id}}),
                ))
                .await
                .unwrap();
            job_ids.insert(worker, job.id);
        }

        let started = Instant::now();
        let report = f.scheduler.tick(&tx).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.claimed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retrying, 1);

        let hung = f.jobs.get(job_ids["sleeper"]).await.unwrap().unwrap();
        assert_eq!(hung.status, JobStatus::Pending);
        assert_eq!(hung.attempts, 1);
        assert_eq!(
            hung.last_error.as_deref(),
            Some(InvocationError::Timeout(1).to_string().as_str())
        );
        for worker in ["analyst", "scribe"] {
            let done = f.jobs.get(job_ids[worker]).await.unwrap().unwrap();
            assert_eq!(done.status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_unknown_worker_fails_permanently() {
        let mut invoker = ScriptedInvoker::default();
        invoker
            .errors
            .insert("analyst".into(), InvocationError::UnknownWorker("analyst".into()));
        let f = setup(invoker, DispatchNotifier::disabled()).await;
        let (tx, _rx) = events();
        let goal = f.manager.create_goal("g").await.unwrap();
        let task = f.manager.create_task(goal.id, NewTask::new("t")).await.unwrap();
        f.scheduler.tick(&tx).await.unwrap();

        let report = f.scheduler.tick(&tx).await.unwrap();
        assert_eq!(report.failed, 1);
        let task_now = f.items.get(task.id).await.unwrap().unwrap();
        assert_eq!(task_now.status(), Some(ItemStatus::Assigned));
    }

    #[tokio::test]
    async fn test_stuck_task_is_reassigned() {
        let f = setup(ScriptedInvoker::default(), DispatchNotifier::disabled()).await;
        let (tx, mut rx) = events();
        let goal = f.manager.create_goal("g").await.unwrap();
        let task = f.manager.create_task(goal.id, NewTask::new("t")).await.unwrap();
        f.items
            .update(
                task.id,
                ItemPatch::new().with_dimensions(Dimensions {
                    status: Some(ItemStatus::Assigned),
                    assigned_workers: Some(vec!["analyst".into()]),
                    assigned_at: Some(Utc::now() - chrono::Duration::hours(2)),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        let report = f.scheduler.tick(&tx).await.unwrap();
        assert_eq!(report.reassigned, 1);
        assert_eq!(
            f.jobs.count(&JobFilter::open().for_task(task.id)).await.unwrap(),
            1
        );

        let mut saw_reassign = false;
        while let Ok(event) = rx.try_recv() {
            if event == (SchedulerEvent::TaskAssigned { task_id: task.id, reassigned: true }) {
                saw_reassign = true;
            }
        }
        assert!(saw_reassign);

        // Fresh assignment is not stale.
        assert_eq!(f.scheduler.tick(&tx).await.unwrap().reassigned, 0);
    }

    #[tokio::test]
    async fn test_backstop_finalizes_missed_goal() {
        let f = setup(ScriptedInvoker::default(), DispatchNotifier::disabled()).await;
        let (tx, _rx) = events();
        let goal = f.manager.create_goal("g").await.unwrap();
        let task = f.manager.create_task(goal.id, NewTask::new("t")).await.unwrap();
        f.items
            .update(task.id, ItemPatch::new().with_status(ItemStatus::Completed))
            .await
            .unwrap();

        assert_eq!(f.scheduler.run_backstop(&tx).await.unwrap(), 1);
        assert_eq!(f.scheduler.run_backstop(&tx).await.unwrap(), 0);
        assert_eq!(f.jobs.count(&JobFilter::new().synthesis()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_dispatches_hints_and_stops() {
        let (notifier, hints) = DispatchNotifier::channel();
        let f = setup(ScriptedInvoker::default(), notifier).await;
        let (tx, mut rx) = events();
        let goal = f.manager.create_goal("g").await.unwrap();
        f.manager.create_task(goal.id, NewTask::new("t")).await.unwrap();

        let runner = f.scheduler.clone();
        let handle = tokio::spawn(async move { runner.run(Some(hints), tx).await });

        // The first tick admits the task; both the task job and the synthesis
        // job then arrive as hints long before the next poll.
        let mut succeeded = 0;
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                if matches!(event, SchedulerEvent::JobSucceeded { .. }) {
                    succeeded += 1;
                    if succeeded == 2 {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(f.scheduler.status().await, SchedulerStatus::Running);

        f.scheduler.pause().await;
        assert_eq!(f.scheduler.status().await, SchedulerStatus::Paused);
        f.scheduler.resume().await;

        f.scheduler.stop().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(f.scheduler.status().await, SchedulerStatus::Stopped);
    }

    #[test]
    fn test_rate_limiter_handles_degenerate_config() {
        let limiter = build_rate_limiter(&RateLimitConfig {
            requests_per_second: 0.0,
            burst_size: 0,
        });
        assert!(limiter.check().is_ok());
    }
}
