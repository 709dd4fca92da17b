pub mod config;
pub mod item;
pub mod job;
pub mod worker;

pub use config::{
    CascadeConfig, Config, DatabaseConfig, InvokerConfig, LoggingConfig, QueueConfig,
    RateLimitConfig, RegistryConfig, SchedulerConfig,
};
pub use item::{
    Dimensions, Item, ItemPatch, ItemStatus, ItemType, LinkRelation, Links, UpdateGuard,
    UpdateOutcome,
};
pub use job::{
    backoff_delay, Job, JobKind, JobStatus, OutputDigest, RunWorkerPayload, SynthesisContext,
    TaskDigest, WorkerContext, DEFAULT_MAX_ATTEMPTS,
};
pub use worker::{InvocationOptions, Interests, WorkerDefinition, WorkerResponse};
