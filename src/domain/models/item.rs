//! Knowledge graph item model.
//!
//! Items are the typed, linked records every other component reads and writes:
//! goals, tasks, worker outputs and the rest. Filterable attributes live in
//! [`Dimensions`]; large payloads go in `detail`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Fixed set of item type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Request,
    Goal,
    Task,
    WorkerOutput,
    Evaluation,
    QueryRequest,
    QueryResponse,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Goal => "goal",
            Self::Task => "task",
            Self::WorkerOutput => "worker_output",
            Self::Evaluation => "evaluation",
            Self::QueryRequest => "query_request",
            Self::QueryResponse => "query_response",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "request" => Some(Self::Request),
            "goal" => Some(Self::Goal),
            "task" => Some(Self::Task),
            "worker_output" => Some(Self::WorkerOutput),
            "evaluation" => Some(Self::Evaluation),
            "query_request" => Some(Self::QueryRequest),
            "query_response" => Some(Self::QueryResponse),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of the `status` dimension.
///
/// Tasks move `pending -> assigned -> completed`; `assigned` also covers work in
/// progress. Goals start `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Open,
    Pending,
    #[serde(alias = "working", alias = "in_progress")]
    Assigned,
    #[serde(alias = "complete")]
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "pending" => Some(Self::Pending),
            "assigned" | "working" | "in_progress" => Some(Self::Assigned),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named link set on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
    Parent,
    Child,
    Related,
}

impl LinkRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
            Self::Related => "related",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            "related" => Some(Self::Related),
            _ => None,
        }
    }

    /// The relation recorded on the other end of a paired edge.
    pub fn inverse(&self) -> Self {
        match self {
            Self::Parent => Self::Child,
            Self::Child => Self::Parent,
            Self::Related => Self::Related,
        }
    }
}

/// The three ordered link sets of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub parents: Vec<Uuid>,
    #[serde(default)]
    pub children: Vec<Uuid>,
    #[serde(default)]
    pub related: Vec<Uuid>,
}

impl Links {
    pub fn get(&self, relation: LinkRelation) -> &[Uuid] {
        match relation {
            LinkRelation::Parent => &self.parents,
            LinkRelation::Child => &self.children,
            LinkRelation::Related => &self.related,
        }
    }

    fn get_mut(&mut self, relation: LinkRelation) -> &mut Vec<Uuid> {
        match relation {
            LinkRelation::Parent => &mut self.parents,
            LinkRelation::Child => &mut self.children,
            LinkRelation::Related => &mut self.related,
        }
    }

    /// Add `id` to a set, keeping insertion order. Returns false if already present.
    pub fn insert(&mut self, relation: LinkRelation, id: Uuid) -> bool {
        let set = self.get_mut(relation);
        if set.contains(&id) {
            return false;
        }
        set.push(id);
        true
    }

    pub fn remove(&mut self, relation: LinkRelation, id: Uuid) -> bool {
        let set = self.get_mut(relation);
        let before = set.len();
        set.retain(|existing| *existing != id);
        set.len() != before
    }

    pub fn contains(&self, relation: LinkRelation, id: Uuid) -> bool {
        self.get(relation).contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty() && self.children.is_empty() && self.related.is_empty()
    }

    /// Iterate every `(relation, target)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (LinkRelation, Uuid)> + '_ {
        self.parents
            .iter()
            .map(|id| (LinkRelation::Parent, *id))
            .chain(self.children.iter().map(|id| (LinkRelation::Child, *id)))
            .chain(self.related.iter().map(|id| (LinkRelation::Related, *id)))
    }
}

/// Filterable attributes of an item.
///
/// Well-known keys are typed; anything else round-trips through `extra`.
/// A well-known key holding a value of the wrong shape (an unknown status,
/// a fractional `agent_count`) is kept verbatim in `extra` instead of failing
/// the whole item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dimensions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    /// Worker identifiers chosen to act on a task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_workers: Option<Vec<String>>,

    /// Task ids that must complete first. Non-string entries are dropped on read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,

    /// How many workers should act on a task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Producing worker of a `worker_output` item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Set once on a goal when its synthesis job has been claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for Dimensions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut extra = Map::<String, Value>::deserialize(deserializer)?;
        let dependencies = extra.remove("dependencies").and_then(lenient_string_list);
        Ok(Self {
            status: take_typed(&mut extra, "status"),
            priority: take_typed(&mut extra, "priority"),
            assigned_workers: take_typed(&mut extra, "assigned_workers"),
            dependencies,
            agent_count: take_typed(&mut extra, "agent_count"),
            task_type: take_typed(&mut extra, "task_type"),
            topic: take_typed(&mut extra, "topic"),
            worker_id: take_typed(&mut extra, "worker_id"),
            assigned_at: take_typed(&mut extra, "assigned_at"),
            completed_at: take_typed(&mut extra, "completed_at"),
            finalized_at: take_typed(&mut extra, "finalized_at"),
            extra,
        })
    }
}

/// Move `key` out of `extra` into its typed slot, or leave it there if it does not fit.
fn take_typed<T: DeserializeOwned>(extra: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = extra.remove(key)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(typed) => Some(typed),
        Err(e) => {
            tracing::warn!(dimension = key, value = %value, error = %e, "keeping malformed dimension untyped");
            extra.insert(key.to_string(), value);
            None
        }
    }
}

fn lenient_string_list(value: Value) -> Option<Vec<String>> {
    match value {
        Value::Null => None,
        Value::Array(entries) => Some(
            entries
                .into_iter()
                .filter_map(|entry| match entry {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        Value::String(single) => Some(vec![single]),
        _ => Some(Vec::new()),
    }
}

impl Dimensions {
    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Merge `patch` into `self`: every field set on the patch wins.
    ///
    /// A `null` value in `patch.extra` removes that key.
    pub fn merge(&mut self, patch: Dimensions) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if patch.$field.is_some() {
                    self.$field = patch.$field;
                    self.extra.remove(stringify!($field));
                })*
            };
        }
        take!(
            status,
            priority,
            assigned_workers,
            dependencies,
            agent_count,
            task_type,
            topic,
            worker_id,
            assigned_at,
            completed_at,
            finalized_at
        );
        for (key, value) in patch.extra {
            if value.is_null() {
                self.clear(&key);
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    /// A patch that removes `key` when merged, typed field or not.
    pub fn unset(key: impl Into<String>) -> Self {
        let mut patch = Self::default();
        patch.extra.insert(key.into(), Value::Null);
        patch
    }

    fn clear(&mut self, key: &str) {
        match key {
            "status" => self.status = None,
            "priority" => self.priority = None,
            "assigned_workers" => self.assigned_workers = None,
            "dependencies" => self.dependencies = None,
            "agent_count" => self.agent_count = None,
            "task_type" => self.task_type = None,
            "topic" => self.topic = None,
            "worker_id" => self.worker_id = None,
            "assigned_at" => self.assigned_at = None,
            "completed_at" => self.completed_at = None,
            "finalized_at" => self.finalized_at = None,
            _ => {}
        }
    }

    /// Well-formed dependency ids; malformed entries are ignored.
    pub fn dependency_ids(&self) -> Vec<Uuid> {
        self.dependencies
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|raw| match Uuid::parse_str(raw.trim()) {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::debug!(dependency = %raw, "ignoring malformed dependency entry");
                    None
                }
            })
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agent_count.map_or(1, |n| n.max(1) as usize)
    }

    pub fn assigned_workers(&self) -> &[String] {
        self.assigned_workers.as_deref().unwrap_or_default()
    }

    /// Flatten into a JSON object keyed by wire field names.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_map().is_empty()
    }
}

/// A node in the shared knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub summary: String,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub links: Links,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// Bumped on every mutation; drives conditional updates.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(item_type: ItemType, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            item_type,
            summary: summary.into(),
            dimensions: Dimensions::default(),
            links: Links::default(),
            detail: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A new goal, `status = open`.
    pub fn goal(summary: impl Into<String>) -> Self {
        Self::new(ItemType::Goal, summary).with_status(ItemStatus::Open)
    }

    /// A new task under `goal_id`, `status = pending`.
    pub fn task(goal_id: Uuid, summary: impl Into<String>) -> Self {
        Self::new(ItemType::Task, summary)
            .with_status(ItemStatus::Pending)
            .with_parent(goal_id)
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.dimensions.status = Some(status);
        self
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions.merge(dimensions);
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.links.insert(LinkRelation::Parent, parent_id);
        self
    }

    pub fn with_related(mut self, related_id: Uuid) -> Self {
        self.links.insert(LinkRelation::Related, related_id);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn status(&self) -> Option<ItemStatus> {
        self.dimensions.status
    }

    pub fn is_completed(&self) -> bool {
        self.dimensions.status == Some(ItemStatus::Completed)
    }

    /// The authoritative parent (first entry of `links.parents`).
    pub fn parent_id(&self) -> Option<Uuid> {
        self.links.parents.first().copied()
    }

    /// Merge a patch into this in-memory copy.
    pub fn apply_patch(&mut self, patch: &ItemPatch) {
        if let Some(summary) = &patch.summary {
            self.summary.clone_from(summary);
        }
        self.dimensions.merge(patch.dimensions.clone());
        if let Some(detail) = &patch.detail {
            self.detail = Some(detail.clone());
        }
        for (relation, target) in patch.add_links.iter() {
            self.links.insert(relation, target);
        }
    }
}

/// Partial update merged into an existing item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub summary: Option<String>,
    pub dimensions: Dimensions,
    pub detail: Option<Value>,
    /// Links to add (paired edges are maintained by the store).
    pub add_links: Links,
}

impl ItemPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.dimensions.status = Some(status);
        self
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions.merge(dimensions);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_link(mut self, relation: LinkRelation, target: Uuid) -> Self {
        self.add_links.insert(relation, target);
        self
    }
}

/// Precondition checked against the current item inside a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateGuard {
    Always,
    /// The item must still be at this version.
    Version(u64),
    /// The item's status must differ from this one.
    StatusNot(ItemStatus),
    /// The named dimension must be unset or null.
    DimensionAbsent(String),
}

impl UpdateGuard {
    pub fn allows(&self, item: &Item) -> bool {
        match self {
            Self::Always => true,
            Self::Version(version) => item.version == *version,
            Self::StatusNot(status) => item.dimensions.status != Some(*status),
            Self::DimensionAbsent(key) => item
                .dimensions
                .to_map()
                .get(key)
                .is_none_or(Value::is_null),
        }
    }
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The guard held and the patch was written.
    Applied(Item),
    /// The guard did not hold; carries the current item.
    Rejected(Item),
    NotFound,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The current item regardless of whether the patch applied.
    pub fn into_item(self) -> Option<Item> {
        match self {
            Self::Applied(item) | Self::Rejected(item) => Some(item),
            Self::NotFound => None,
        }
    }
}
