use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Item, ItemPatch, ItemStatus, ItemType, LinkRelation, UpdateGuard, UpdateOutcome,
};

/// Predicate on a single dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionFilter {
    /// The dimension equals the value.
    Equals(String, Value),
    /// The dimension is an array containing the value.
    Contains(String, Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemOrder {
    #[default]
    CreatedAsc,
    CreatedDesc,
    UpdatedAsc,
    UpdatedDesc,
}

/// Filters for querying items
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    pub item_type: Option<ItemType>,
    pub dimensions: Vec<DimensionFilter>,
    /// Items listing this id among their parents.
    pub parent: Option<Uuid>,
    /// Items listing this id among their children.
    pub child: Option<Uuid>,
    pub related: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub order: ItemOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, item_type: ItemType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_child(mut self, child: Uuid) -> Self {
        self.child = Some(child);
        self
    }

    pub fn with_related(mut self, related: Uuid) -> Self {
        self.related = Some(related);
        self
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.dimensions
            .push(DimensionFilter::Equals(key.into(), value));
        self
    }

    pub fn with_status(self, status: ItemStatus) -> Self {
        self.with_dimension("status", Value::String(status.as_str().to_string()))
    }

    pub fn contains(mut self, key: impl Into<String>, value: Value) -> Self {
        self.dimensions
            .push(DimensionFilter::Contains(key.into(), value));
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn order(mut self, order: ItemOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Repository port for the knowledge graph.
///
/// All link mutations maintain the paired edge on the target item.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Insert an item together with its links.
    async fn create(&self, item: Item) -> DomainResult<Item>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Item>>;

    async fn query(&self, filter: &ItemFilter) -> DomainResult<Vec<Item>>;

    async fn count(&self, filter: &ItemFilter) -> DomainResult<u64>;

    /// Merge a patch unconditionally. `None` when the item does not exist.
    async fn update(&self, id: Uuid, patch: ItemPatch) -> DomainResult<Option<Item>> {
        match self.update_where(id, patch, UpdateGuard::Always).await? {
            UpdateOutcome::Applied(item) => Ok(Some(item)),
            UpdateOutcome::NotFound => Ok(None),
            UpdateOutcome::Rejected(item) => Err(DomainError::ConcurrencyConflict {
                entity: "item".to_string(),
                id: item.id.to_string(),
            }),
        }
    }

    /// Merge a patch only if `guard` holds against the stored item.
    async fn update_where(
        &self,
        id: Uuid,
        patch: ItemPatch,
        guard: UpdateGuard,
    ) -> DomainResult<UpdateOutcome>;

    async fn delete(&self, id: Uuid) -> DomainResult<bool>;

    /// Add `to` to the `relation` set of `from` and the inverse edge to `to`.
    ///
    /// True only when the edge was newly added; false if either item is
    /// missing or the edge already existed.
    async fn link(&self, from: Uuid, to: Uuid, relation: LinkRelation) -> DomainResult<bool>;

    /// Remove both directions of an edge. False if it did not exist.
    async fn unlink(&self, from: Uuid, to: Uuid, relation: LinkRelation) -> DomainResult<bool>;
}
