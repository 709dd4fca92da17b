//! Colony - dependency-aware task orchestration for agent workers
//!
//! Colony keeps goals, tasks and worker outputs in a shared knowledge store,
//! assigns ready tasks to interested workers through a durable lease-based job
//! queue, and cascades completion from tasks to their dependents and goals.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): items, jobs, worker definitions and the ports
//! - **Adapters** (`adapters`): SQLite store and queue, worker catalogs, HTTP invoker
//! - **Service Layer** (`services`): matching, assignment, completion and scheduling
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use colony::cli::context::AppContext;
//! use colony::services::NewTask;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = AppContext::open(colony::Config::default()).await?;
//!     let goal = ctx.task_manager.create_goal("Ship the release notes").await?;
//!     let task = ctx
//!         .task_manager
//!         .create_task(goal.id, NewTask::new("Draft the notes").with_task_type("writing"))
//!         .await?;
//!     ctx.task_manager.assign(task.id).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult, InvocationError};
pub use domain::models::{
    Config, Item, ItemStatus, ItemType, Job, JobStatus, WorkerDefinition, WorkerResponse,
};
pub use domain::ports::{ItemRepository, JobQueue, WorkerCatalog, WorkerInvoker};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CompletionCascade, Scheduler, TaskManager, WorkerRegistry};
