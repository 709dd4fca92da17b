//! Application services: matching, assignment, completion and scheduling.

pub mod completion_cascade;
pub mod dispatch;
pub mod interest_matcher;
pub mod scheduler;
pub mod task_manager;
pub mod worker_registry;

pub use completion_cascade::{CompletionCascade, CompletionOutcome};
pub use dispatch::DispatchNotifier;
pub use interest_matcher::ScoredWorker;
pub use scheduler::{
    JobOutcome, Scheduler, SchedulerEvent, SchedulerStats, SchedulerStatus, TickReport,
};
pub use task_manager::{AssignExpectation, NewTask, TaskManager};
pub use worker_registry::WorkerRegistry;
