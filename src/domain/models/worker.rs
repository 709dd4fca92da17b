//! Worker definitions and invocation results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A registered worker and what it is interested in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Free-text topic, also matched against item summaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Task types this worker has an affinity for.
    #[serde(default)]
    pub task_types: Vec<String>,

    #[serde(default)]
    pub interests: Interests,

    /// Default options sent with every invocation.
    #[serde(default)]
    pub options: InvocationOptions,
}

const fn default_enabled() -> bool {
    true
}

impl WorkerDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            topic: None,
            task_types: Vec::new(),
            interests: Interests::default(),
            options: InvocationOptions::default(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_types.push(task_type.into());
        self
    }

    pub fn with_interests(mut self, interests: Interests) -> Self {
        self.interests = interests;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this worker declares an affinity for `task_type`, by id or list.
    pub fn has_affinity(&self, task_type: &str) -> bool {
        self.id == task_type || self.task_types.iter().any(|t| t == task_type)
    }
}

/// Declarative interest profile used by the matcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interests {
    /// Item type names, e.g. `task`.
    #[serde(default)]
    pub item_types: Vec<String>,

    /// Dimension key/value pairs the item should carry.
    #[serde(default)]
    pub dimensions: Map<String, Value>,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Status names, e.g. `pending`.
    #[serde(default)]
    pub statuses: Vec<String>,
}

impl Interests {
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_types.push(item_type.into());
        self
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.dimensions.insert(key.into(), value);
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.statuses.push(status.into());
        self
    }
}

/// Options forwarded to the invoker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// What a worker returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub worker_id: String,
    pub output: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WorkerResponse {
    pub fn new(worker_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            output: output.into(),
            metadata: Map::new(),
        }
    }
}
