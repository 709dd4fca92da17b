//! Short ID prefix resolution for CLI commands.
//!
//! Any unique prefix of a UUID is accepted, similar to git short hashes.

use std::fmt::Write as _;

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::models::ItemType;

/// Resolve an item ID prefix, restricted to one item type.
pub async fn resolve_item_id(pool: &SqlitePool, prefix: &str, item_type: ItemType) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }
    validate_prefix(prefix)?;

    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM items WHERE item_type = ? AND id LIKE ? LIMIT 10")
            .bind(item_type.as_str())
            .bind(format!("{prefix}%"))
            .fetch_all(pool)
            .await?;
    pick(rows, prefix, item_type.as_str())
}

/// Resolve a job ID prefix.
pub async fn resolve_job_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }
    validate_prefix(prefix)?;

    let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM jobs WHERE id LIKE ? LIMIT 10")
        .bind(format!("{prefix}%"))
        .fetch_all(pool)
        .await?;
    pick(rows, prefix, "job")
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}

fn pick(rows: Vec<(String,)>, prefix: &str, entity: &str) -> Result<Uuid> {
    match rows.len() {
        0 => bail!("No {entity} found matching '{prefix}'"),
        1 => Ok(Uuid::parse_str(&rows[0].0)?),
        n => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {n} {entity}s:");
            for row in &rows {
                let _ = write!(msg, "\n  {}", row.0);
            }
            bail!("{msg}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteItemRepository};
    use crate::domain::models::Item;
    use crate::domain::ports::ItemRepository;

    #[tokio::test]
    async fn test_resolves_unique_prefix() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteItemRepository::new(pool.clone());
        let goal = repo.create(Item::goal("g")).await.unwrap();
        let prefix = &goal.id.to_string()[..8];

        let resolved = resolve_item_id(&pool, prefix, ItemType::Goal).await.unwrap();
        assert_eq!(resolved, goal.id);
        assert!(resolve_item_id(&pool, prefix, ItemType::Task).await.is_err());
        assert!(resolve_item_id(&pool, "xyz", ItemType::Goal).await.is_err());
        assert!(resolve_job_id(&pool, "abc").await.is_err());
    }
}
