//! Serializable views of domain records for command output.

use serde::Serialize;
use serde_json::Value;

use crate::domain::models::{Item, Job};

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutput {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub summary: String,
    pub status: Option<String>,
    pub parent_id: Option<String>,
    pub assigned_workers: Vec<String>,
    pub dependencies: Vec<String>,
    pub dimensions: Value,
    pub detail: Option<Value>,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Item> for ItemOutput {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.to_string(),
            item_type: item.item_type.as_str().to_string(),
            summary: item.summary.clone(),
            status: item.status().map(|s| s.as_str().to_string()),
            parent_id: item.parent_id().map(|id| id.to_string()),
            assigned_workers: item.dimensions.assigned_workers().to_vec(),
            dependencies: item.dimensions.dependencies.clone().unwrap_or_default(),
            dimensions: Value::Object(item.dimensions.to_map()),
            detail: item.detail.clone(),
            version: item.version,
            created_at: item.created_at.to_rfc3339(),
            updated_at: item.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutput {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub worker_id: Option<String>,
    pub task_id: Option<String>,
    pub goal_id: Option<String>,
    pub synthesis: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_for: String,
    pub lease_owner: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
}

impl From<&Job> for JobOutput {
    fn from(job: &Job) -> Self {
        let payload = job.run_worker_payload().ok();
        Self {
            id: job.id.to_string(),
            kind: job.kind.as_str().to_string(),
            status: job.status.as_str().to_string(),
            worker_id: payload.as_ref().map(|p| p.worker_id.clone()),
            task_id: payload
                .as_ref()
                .and_then(|p| p.context.task_id)
                .map(|id| id.to_string()),
            goal_id: payload
                .as_ref()
                .and_then(|p| p.context.goal_id)
                .map(|id| id.to_string()),
            synthesis: payload.as_ref().is_some_and(|p| p.context.is_synthesis()),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            scheduled_for: job.scheduled_for.to_rfc3339(),
            lease_owner: job.lease_owner.clone(),
            last_error: job.last_error.clone(),
            created_at: job.created_at.to_rfc3339(),
        }
    }
}
