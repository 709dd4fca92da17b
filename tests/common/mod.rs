//! Common test utilities for integration tests
//!
//! Provides a wired set of services over a fresh database and a scripted
//! worker invoker.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use colony::adapters::catalog::StaticWorkerCatalog;
use colony::adapters::sqlite::{
    create_migrated_test_pool, database_url, initialize_database, PoolConfig,
    SqliteItemRepository, SqliteJobQueue,
};
use colony::domain::errors::InvocationError;
use colony::domain::models::{
    CascadeConfig, Interests, InvocationOptions, QueueConfig, RateLimitConfig, SchedulerConfig,
    WorkerContext, WorkerDefinition, WorkerResponse,
};
use colony::domain::ports::WorkerInvoker;
use colony::services::{
    CompletionCascade, DispatchNotifier, Scheduler, TaskManager, WorkerRegistry,
};

/// Invoker that answers from a script and records every call.
#[derive(Default)]
pub struct MockInvoker {
    errors: Mutex<HashMap<String, InvocationError>>,
    calls: Mutex<Vec<(String, WorkerContext)>>,
    count: AtomicUsize,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation of `worker_id` fail with `error`.
    pub fn fail_with(&self, worker_id: &str, error: InvocationError) {
        self.errors
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.errors.lock().unwrap().clear();
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Contexts `worker_id` was invoked with, oldest first.
    pub fn calls_for(&self, worker_id: &str) -> Vec<WorkerContext> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(w, _)| w == worker_id)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl WorkerInvoker for MockInvoker {
    async fn invoke(
        &self,
        worker_id: &str,
        context: &WorkerContext,
        _options: &InvocationOptions,
    ) -> Result<WorkerResponse, InvocationError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((worker_id.to_string(), context.clone()));
        if let Some(err) = self.errors.lock().unwrap().get(worker_id) {
            return Err(err.clone());
        }
        let summary = context.task_summary.as_deref().unwrap_or("goal");
        Ok(WorkerResponse::new(
            worker_id,
            format!("{worker_id} handled {summary}"),
        ))
    }
}

/// Two task workers and the synthesizer.
pub fn default_workers() -> Vec<WorkerDefinition> {
    vec![
        WorkerDefinition::new("analyst")
            .with_interests(Interests::default().with_item_type("task")),
        WorkerDefinition::new("writer")
            .with_task_type("writing")
            .with_interests(
                Interests::default()
                    .with_item_type("task")
                    .with_keyword("write"),
            ),
        WorkerDefinition::new("synthesizer"),
    ]
}

/// Services sharing one database.
pub struct Harness {
    pub pool: SqlitePool,
    pub items: Arc<SqliteItemRepository>,
    pub jobs: Arc<SqliteJobQueue>,
    pub registry: Arc<WorkerRegistry>,
    pub manager: Arc<TaskManager>,
    pub cascade: Arc<CompletionCascade>,
    pub invoker: Arc<MockInvoker>,
    _dir: Option<TempDir>,
}

impl Harness {
    /// In-memory database, default workers, no dispatch hints.
    pub async fn new() -> Self {
        let pool = create_migrated_test_pool().await.unwrap();
        Self::build(pool, None, default_workers(), DispatchNotifier::disabled())
    }

    /// File-backed database with a multi-connection pool.
    pub async fn on_disk() -> Self {
        let (dir, pool) = file_pool().await;
        Self::build(pool, Some(dir), default_workers(), DispatchNotifier::disabled())
    }

    pub async fn with_notifier(notifier: DispatchNotifier) -> Self {
        let pool = create_migrated_test_pool().await.unwrap();
        Self::build(pool, None, default_workers(), notifier)
    }

    fn build(
        pool: SqlitePool,
        dir: Option<TempDir>,
        workers: Vec<WorkerDefinition>,
        notifier: DispatchNotifier,
    ) -> Self {
        let items = Arc::new(SqliteItemRepository::new(pool.clone()));
        let jobs = Arc::new(SqliteJobQueue::with_config(
            pool.clone(),
            &QueueConfig {
                max_backoff_secs: 1,
                ..QueueConfig::default()
            },
        ));
        let registry = Arc::new(WorkerRegistry::new(
            Arc::new(StaticWorkerCatalog::new(workers)),
            Duration::from_secs(60),
        ));
        let manager = Arc::new(
            TaskManager::new(items.clone(), jobs.clone(), registry.clone())
                .with_notifier(notifier.clone()),
        );
        let cascade = Arc::new(
            CompletionCascade::new(
                items.clone(),
                jobs.clone(),
                manager.clone(),
                CascadeConfig::default(),
            )
            .with_notifier(notifier),
        );
        Self {
            pool,
            items,
            jobs,
            registry,
            manager,
            cascade,
            invoker: Arc::new(MockInvoker::new()),
            _dir: dir,
        }
    }

    /// A scheduler over this harness with a long poll interval.
    pub fn scheduler(&self, owner: &str) -> Scheduler {
        Scheduler::new(
            self.items.clone(),
            self.jobs.clone(),
            self.invoker.clone(),
            self.cascade.clone(),
            SchedulerConfig {
                poll_interval_ms: 3_600_000,
                owner_id: Some(owner.to_string()),
                ..SchedulerConfig::default()
            },
            &RateLimitConfig::default(),
        )
    }
}

/// A migrated database file in a fresh temp dir.
pub async fn file_pool() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("colony.db");
    let pool = initialize_database(
        &database_url(&path.to_string_lossy()),
        Some(PoolConfig {
            max_connections: 8,
            ..PoolConfig::default()
        }),
    )
    .await
    .expect("Failed to initialize database");
    (dir, pool)
}
