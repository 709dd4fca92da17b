//! SQLite implementation of the ItemRepository.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Dimensions, Item, ItemPatch, ItemType, LinkRelation, Links, UpdateGuard, UpdateOutcome,
};
use crate::domain::ports::{DimensionFilter, ItemFilter, ItemOrder, ItemRepository};

/// Re-read attempts of a conditional update before reporting a conflict.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// SQLite-backed implementation of [`ItemRepository`].
///
/// Dimensions and detail are JSON columns; links live in `item_links` with
/// both directions of every edge stored.
#[derive(Clone)]
pub struct SqliteItemRepository {
    pool: SqlitePool,
}

impl SqliteItemRepository {
    /// Repository over an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_links(&self, item: &mut Item) -> DomainResult<()> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT relation, to_id FROM item_links WHERE from_id = ? ORDER BY rowid",
        )
        .bind(item.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut links = Links::default();
        for (relation, to_id) in rows {
            match LinkRelation::from_str(&relation) {
                Some(relation) => {
                    links.insert(relation, parse_uuid(&to_id)?);
                }
                None => tracing::warn!(item_id = %item.id, relation = %relation, "skipping unknown link relation"),
            }
        }
        item.links = links;
        Ok(())
    }

    async fn hydrate(&self, rows: Vec<ItemRow>) -> DomainResult<Vec<Item>> {
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let mut item: Item = row.try_into()?;
            self.load_links(&mut item).await?;
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait]
impl ItemRepository for SqliteItemRepository {
    async fn create(&self, mut item: Item) -> DomainResult<Item> {
        item.created_at = item.created_at.trunc_subsecs(6);
        item.updated_at = item.updated_at.trunc_subsecs(6);
        let dimensions = serde_json::to_string(&item.dimensions)?;
        let detail = item.detail.as_ref().map(serde_json::to_string).transpose()?;
        let now = format_datetime(Utc::now());

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO items (id, item_type, summary, dimensions, detail, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(item.id.to_string())
        .bind(item.item_type.as_str())
        .bind(&item.summary)
        .bind(&dimensions)
        .bind(&detail)
        .bind(item.version as i64)
        .bind(format_datetime(item.created_at))
        .bind(format_datetime(item.updated_at))
        .execute(&mut *tx)
        .await?;

        for (relation, target) in item.links.iter() {
            insert_link_pair(&mut tx, item.id, target, relation, &now).await?;
        }
        tx.commit().await?;

        tracing::debug!(item_id = %item.id, item_type = %item.item_type, "created item");
        Ok(item)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Item>> {
        let row: Option<ItemRow> = sqlx::query_as("SELECT * FROM items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let mut item: Item = r.try_into()?;
                self.load_links(&mut item).await?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn query(&self, filter: &ItemFilter) -> DomainResult<Vec<Item>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM items");
        push_conditions(&mut qb, filter);
        qb.push(match filter.order {
            ItemOrder::CreatedAsc => " ORDER BY created_at ASC, rowid ASC",
            ItemOrder::CreatedDesc => " ORDER BY created_at DESC, rowid DESC",
            ItemOrder::UpdatedAsc => " ORDER BY updated_at ASC, rowid ASC",
            ItemOrder::UpdatedDesc => " ORDER BY updated_at DESC, rowid DESC",
        });
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                qb.push(" LIMIT ").push_bind(limit);
                if let Some(offset) = offset {
                    qb.push(" OFFSET ").push_bind(offset);
                }
            }
            (None, Some(offset)) => {
                qb.push(" LIMIT -1 OFFSET ").push_bind(offset);
            }
            (None, None) => {}
        }

        let rows: Vec<ItemRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    async fn count(&self, filter: &ItemFilter) -> DomainResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM items");
        push_conditions(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn update_where(
        &self,
        id: Uuid,
        patch: ItemPatch,
        guard: UpdateGuard,
    ) -> DomainResult<UpdateOutcome> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.get(id).await? else {
                return Ok(UpdateOutcome::NotFound);
            };
            if !guard.allows(&current) {
                return Ok(UpdateOutcome::Rejected(current));
            }

            let mut next = current.clone();
            next.apply_patch(&patch);
            next.version = current.version + 1;
            next.updated_at = Utc::now().trunc_subsecs(6).max(current.updated_at);
            let now = format_datetime(next.updated_at);
            let dimensions = serde_json::to_string(&next.dimensions)?;
            let detail = next.detail.as_ref().map(serde_json::to_string).transpose()?;

            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"UPDATE items SET summary = ?, dimensions = ?, detail = ?, version = ?, updated_at = ?
                   WHERE id = ? AND version = ?"#,
            )
            .bind(&next.summary)
            .bind(&dimensions)
            .bind(&detail)
            .bind(next.version as i64)
            .bind(&now)
            .bind(id.to_string())
            .bind(current.version as i64)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                tracing::debug!(item_id = %id, attempt, "item changed underneath update, re-reading");
                tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt + 1))).await;
                continue;
            }

            for (relation, target) in patch.add_links.iter() {
                insert_link_pair(&mut tx, id, target, relation, &now).await?;
            }
            tx.commit().await?;
            return Ok(UpdateOutcome::Applied(next));
        }

        Err(DomainError::ConcurrencyConflict {
            entity: "item".to_string(),
            id: id.to_string(),
        })
    }

    async fn delete(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn link(&self, from: Uuid, to: Uuid, relation: LinkRelation) -> DomainResult<bool> {
        if from == to {
            return Err(DomainError::ValidationFailed(format!(
                "item {from} cannot link to itself"
            )));
        }
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        // Touch both ends first so the transaction holds the write lock before any read.
        let touched = sqlx::query(
            "UPDATE items SET version = version + 1, updated_at = ? WHERE id IN (?, ?)",
        )
        .bind(&now)
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() < 2 {
            tx.rollback().await?;
            return Ok(false);
        }

        let added = insert_edges(&mut tx, from, to, relation).await?;
        if added {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(added)
    }

    async fn unlink(&self, from: Uuid, to: Uuid, relation: LinkRelation) -> DomainResult<bool> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM item_links WHERE from_id = ? AND relation = ? AND to_id = ?",
        )
        .bind(from.to_string())
        .bind(relation.as_str())
        .bind(to.to_string())
        .execute(&mut *tx)
        .await?;
        if removed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM item_links WHERE from_id = ? AND relation = ? AND to_id = ?")
            .bind(to.to_string())
            .bind(relation.inverse().as_str())
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE items SET version = version + 1, updated_at = ? WHERE id IN (?, ?)")
            .bind(&now)
            .bind(from.to_string())
            .bind(to.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}

/// Add `from -relation-> to` and its inverse, bumping the target.
///
/// The source row must already be written in this transaction.
async fn insert_link_pair(
    conn: &mut SqliteConnection,
    from: Uuid,
    to: Uuid,
    relation: LinkRelation,
    now: &str,
) -> DomainResult<()> {
    if from == to {
        return Err(DomainError::ValidationFailed(format!(
            "item {from} cannot link to itself"
        )));
    }
    let touched = sqlx::query("UPDATE items SET version = version + 1, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(to.to_string())
        .execute(&mut *conn)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(DomainError::ItemNotFound(to));
    }
    insert_edges(conn, from, to, relation).await?;
    Ok(())
}

/// Insert both directions of an edge. Returns false if it already existed.
async fn insert_edges(
    conn: &mut SqliteConnection,
    from: Uuid,
    to: Uuid,
    relation: LinkRelation,
) -> DomainResult<bool> {
    let forward =
        sqlx::query("INSERT OR IGNORE INTO item_links (from_id, relation, to_id) VALUES (?, ?, ?)")
            .bind(from.to_string())
            .bind(relation.as_str())
            .bind(to.to_string())
            .execute(&mut *conn)
            .await?;
    sqlx::query("INSERT OR IGNORE INTO item_links (from_id, relation, to_id) VALUES (?, ?, ?)")
        .bind(to.to_string())
        .bind(relation.inverse().as_str())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(forward.rows_affected() > 0)
}

fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}

/// Bind a JSON value so it compares equal to what `json_extract`/`json_each` yield.
fn push_json_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        Value::Bool(b) => {
            qb.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                qb.push_bind(i);
            }
            None => {
                qb.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        Value::Null => {
            qb.push("NULL");
        }
        Value::Array(_) | Value::Object(_) => {
            qb.push("json(").push_bind(value.to_string()).push(")");
        }
    }
}

fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ItemFilter) {
    qb.push(" WHERE 1=1");

    if let Some(item_type) = filter.item_type {
        qb.push(" AND item_type = ").push_bind(item_type.as_str());
    }

    let memberships = [
        (LinkRelation::Parent, filter.parent),
        (LinkRelation::Child, filter.child),
        (LinkRelation::Related, filter.related),
    ];
    for (relation, target) in memberships {
        if let Some(target) = target {
            qb.push(
                " AND EXISTS (SELECT 1 FROM item_links l WHERE l.from_id = items.id AND l.relation = ",
            )
            .push_bind(relation.as_str())
            .push(" AND l.to_id = ")
            .push_bind(target.to_string())
            .push(")");
        }
    }

    for dimension in &filter.dimensions {
        match dimension {
            DimensionFilter::Equals(key, Value::Null) => {
                qb.push(" AND json_extract(items.dimensions, ")
                    .push_bind(json_path(key))
                    .push(") IS NULL");
            }
            DimensionFilter::Equals(key, value) => {
                qb.push(" AND json_extract(items.dimensions, ")
                    .push_bind(json_path(key))
                    .push(") = ");
                push_json_value(qb, value);
            }
            DimensionFilter::Contains(key, value) => {
                qb.push(" AND EXISTS (SELECT 1 FROM json_each(items.dimensions, ")
                    .push_bind(json_path(key))
                    .push(") je WHERE je.value = ");
                push_json_value(qb, value);
                qb.push(")");
            }
        }
    }

    if let Some(after) = filter.created_after {
        qb.push(" AND created_at > ").push_bind(format_datetime(after));
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND created_at < ").push_bind(format_datetime(before));
    }
    if let Some(before) = filter.updated_before {
        qb.push(" AND updated_at < ").push_bind(format_datetime(before));
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    item_type: String,
    summary: String,
    dimensions: String,
    detail: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ItemRow> for Item {
    type Error = DomainError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let item_type = ItemType::from_str(&row.item_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid item type: {}", row.item_type))
        })?;
        let dimensions: Dimensions = serde_json::from_str(&row.dimensions)?;
        let detail = row.detail.map(|s| serde_json::from_str(&s)).transpose()?;

        Ok(Item {
            id: parse_uuid(&row.id)?,
            item_type,
            summary: row.summary,
            dimensions,
            links: Links::default(), // Loaded separately
            detail,
            version: row.version as u64,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
