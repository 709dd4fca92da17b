//! Wiring of the store, registry and services shared by CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::adapters::catalog::YamlWorkerCatalog;
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteItemRepository, SqliteJobQueue,
};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{CompletionCascade, DispatchNotifier, TaskManager, WorkerRegistry};

/// Load configuration from an explicit file or the project directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Everything a command needs, built from one configuration.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub items: Arc<SqliteItemRepository>,
    pub jobs: Arc<SqliteJobQueue>,
    pub registry: Arc<WorkerRegistry>,
    pub task_manager: Arc<TaskManager>,
    pub cascade: Arc<CompletionCascade>,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_notifier(config, DispatchNotifier::disabled()).await
    }

    /// Build the context with services that hint new jobs to `notifier`.
    pub async fn open_with_notifier(config: Config, notifier: DispatchNotifier) -> Result<Self> {
        let pool = initialize_database(
            &database_url(&config.database.path),
            Some(PoolConfig::from(&config.database)),
        )
        .await
        .with_context(|| {
            format!(
                "Failed to open database at {}. Run 'colony init' first.",
                config.database.path
            )
        })?;

        let items = Arc::new(SqliteItemRepository::new(pool.clone()));
        let jobs = Arc::new(SqliteJobQueue::with_config(pool.clone(), &config.queue));
        let registry = Arc::new(WorkerRegistry::from_config(
            Arc::new(YamlWorkerCatalog::new(&config.registry.definitions_path)),
            &config.registry,
        ));
        let task_manager = Arc::new(
            TaskManager::new(items.clone(), jobs.clone(), registry.clone())
                .with_notifier(notifier.clone())
                .with_max_attempts(config.queue.default_max_attempts),
        );
        let cascade = Arc::new(
            CompletionCascade::new(
                items.clone(),
                jobs.clone(),
                task_manager.clone(),
                config.cascade.clone(),
            )
            .with_notifier(notifier)
            .with_max_attempts(config.queue.default_max_attempts),
        );

        Ok(Self {
            config,
            pool,
            items,
            jobs,
            registry,
            task_manager,
            cascade,
        })
    }
}
