//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters implement:
//! - ItemRepository: knowledge graph persistence
//! - JobQueue: durable lease-based job queue
//! - WorkerInvoker: runs a worker against a context
//! - WorkerCatalog: source of worker definitions

pub mod item_repository;
pub mod job_queue;
pub mod worker_catalog;
pub mod worker_invoker;

pub use item_repository::{DimensionFilter, ItemFilter, ItemOrder, ItemRepository};
pub use job_queue::{JobFilter, JobQueue};
pub use worker_catalog::WorkerCatalog;
pub use worker_invoker::WorkerInvoker;
