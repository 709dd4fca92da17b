//! Durable job model for the lease-based queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::worker::InvocationOptions;

/// Default retry budget for a new job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Kind tag of a job.
///
/// Any stored kind the scheduler does not know decodes to `Unknown` and is
/// failed permanently when claimed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    RunWorker,
    Unknown(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RunWorker => "run_worker",
            Self::Unknown(kind) => kind,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "run_worker" => Self::RunWorker,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Serialize for JobKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of deferred work with lease and retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time the job may be claimed.
    pub scheduled_for: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_for: now,
            lease_owner: None,
            lease_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A `run_worker` job for the given payload.
    pub fn run_worker(payload: &RunWorkerPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(JobKind::RunWorker, serde_json::to_value(payload)?))
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = at;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Decode the payload of a `run_worker` job.
    pub fn run_worker_payload(&self) -> Result<RunWorkerPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Retry delay in seconds after `attempts` failures: `min(2^attempts, max_backoff_secs)`.
pub fn backoff_delay(attempts: u32, max_backoff_secs: u64) -> u64 {
    1u64.checked_shl(attempts)
        .unwrap_or(u64::MAX)
        .min(max_backoff_secs)
}

/// Payload of a `run_worker` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWorkerPayload {
    pub worker_id: String,
    pub context: WorkerContext,
    #[serde(default)]
    pub options: InvocationOptions,
}

/// What a worker is told about the work it is doing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Present only on the synthesis job of a goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisContext>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkerContext {
    pub fn is_synthesis(&self) -> bool {
        self.synthesis.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisContext {
    pub goal_summary: String,
    pub tasks: Vec<TaskDigest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDigest {
    pub task_id: Uuid,
    pub summary: String,
    pub outputs: Vec<OutputDigest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDigest {
    pub worker_id: String,
    pub output: String,
}
