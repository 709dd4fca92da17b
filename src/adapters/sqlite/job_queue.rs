//! SQLite implementation of the lease-based JobQueue.
//!
//! Claims are single conditional `UPDATE ... RETURNING` statements: the row is
//! re-checked for eligibility inside the statement that leases it, so two
//! schedulers racing for the same job cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_optional_datetime, parse_uuid, with_busy_retry};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{backoff_delay, Job, JobKind, JobStatus, QueueConfig};
use crate::domain::ports::{JobFilter, JobQueue};

const ELIGIBLE: &str =
    "status = 'pending' AND scheduled_for <= ? AND (lease_at IS NULL OR lease_at < ?)";

/// SQLite-backed implementation of [`JobQueue`].
///
/// Claims are single conditional `UPDATE ... RETURNING` statements, so any
/// number of queues over the same database never hand one job to two owners.
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
    lease_ttl: Duration,
    max_backoff_secs: u64,
}

impl SqliteJobQueue {
    /// Queue with the default lease TTL and backoff cap.
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_config(pool, &QueueConfig::default())
    }

    /// Queue using the lease TTL and backoff cap from `config`.
    pub fn with_config(pool: SqlitePool, config: &QueueConfig) -> Self {
        Self {
            pool,
            lease_ttl: Duration::seconds(config.lease_ttl_secs as i64),
            max_backoff_secs: config.max_backoff_secs,
        }
    }

    /// How long a claim stays valid before `claim_ready` may reap it.
    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    fn lease_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lease_ttl
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: Job) -> DomainResult<Job> {
        let payload = serde_json::to_string(&job.payload)?;
        sqlx::query(
            r#"INSERT INTO jobs (id, kind, payload, status, attempts, max_attempts, scheduled_for,
               lease_owner, lease_at, last_error, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(job.kind.as_str())
        .bind(&payload)
        .bind(job.status.as_str())
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_attempts))
        .bind(format_datetime(job.scheduled_for))
        .bind(&job.lease_owner)
        .bind(job.lease_at.map(format_datetime))
        .bind(&job.last_error)
        .bind(format_datetime(job.created_at))
        .bind(format_datetime(job.updated_at))
        .execute(&self.pool)
        .await?;

        tracing::debug!(job_id = %job.id, kind = %job.kind, "enqueued job");
        // Read back so timestamps carry the stored precision.
        self.get(job.id)
            .await?
            .ok_or(DomainError::JobNotFound(job.id))
    }

    async fn claim_ready(&self, owner: &str, limit: u32) -> DomainResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let (reaped, claimed) = with_busy_retry("claim_ready", || {
            let pool = self.pool.clone();
            let owner = owner.to_string();
            let now = Utc::now();
            let now_s = format_datetime(now);
            let cutoff_s = format_datetime(self.lease_cutoff(now));
            async move {
                let mut tx = pool.begin().await?;

                // Expired running leases go back to pending (or failed) first.
                let reaped: Vec<(String, String)> = sqlx::query_as(
                    r#"UPDATE jobs SET
                           attempts = attempts + 1,
                           status = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END,
                           lease_owner = NULL,
                           lease_at = NULL,
                           last_error = 'lease expired',
                           scheduled_for = ?,
                           updated_at = ?
                       WHERE status = 'running' AND lease_at < ?
                       RETURNING id, status"#,
                )
                .bind(&now_s)
                .bind(&now_s)
                .bind(&cutoff_s)
                .fetch_all(&mut *tx)
                .await?;

                let claimed: Vec<JobRow> = sqlx::query_as(&format!(
                    r#"UPDATE jobs SET status = 'running', lease_owner = ?, lease_at = ?, updated_at = ?
                       WHERE id IN (
                           SELECT id FROM jobs WHERE {ELIGIBLE}
                           ORDER BY scheduled_for ASC, created_at ASC
                           LIMIT ?
                       )
                       AND {ELIGIBLE}
                       RETURNING *"#
                ))
                .bind(&owner)
                .bind(&now_s)
                .bind(&now_s)
                .bind(&now_s)
                .bind(&cutoff_s)
                .bind(i64::from(limit))
                .bind(&now_s)
                .bind(&cutoff_s)
                .fetch_all(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok((reaped, claimed))
            }
        })
        .await?;

        for (id, status) in &reaped {
            tracing::warn!(job_id = %id, status = %status, "reaped job with expired lease");
        }

        let mut jobs = claimed
            .into_iter()
            .map(Job::try_from)
            .collect::<DomainResult<Vec<_>>>()?;
        jobs.sort_by(|a, b| {
            a.scheduled_for
                .cmp(&b.scheduled_for)
                .then(a.created_at.cmp(&b.created_at))
        });
        if !jobs.is_empty() {
            tracing::debug!(owner, count = jobs.len(), "claimed jobs");
        }
        Ok(jobs)
    }

    async fn claim(&self, id: Uuid, owner: &str) -> DomainResult<Option<Job>> {
        let row: Option<JobRow> = with_busy_retry("claim", || {
            let pool = self.pool.clone();
            let owner = owner.to_string();
            let now = Utc::now();
            let now_s = format_datetime(now);
            let cutoff_s = format_datetime(self.lease_cutoff(now));
            async move {
                sqlx::query_as::<_, JobRow>(&format!(
                    r#"UPDATE jobs SET status = 'running', lease_owner = ?, lease_at = ?, updated_at = ?
                       WHERE id = ? AND {ELIGIBLE}
                       RETURNING *"#
                ))
                .bind(&owner)
                .bind(&now_s)
                .bind(&now_s)
                .bind(id.to_string())
                .bind(&now_s)
                .bind(&cutoff_s)
                .fetch_optional(&pool)
                .await
            }
        })
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn complete(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', updated_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(format_datetime(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail(&self, id: Uuid, error: &str, permanent: bool) -> DomainResult<Option<Job>> {
        let Some(job) = self.get(id).await? else {
            return Ok(None);
        };
        if job.status != JobStatus::Running {
            tracing::debug!(job_id = %id, status = %job.status, "ignoring failure of job that is not running");
            return Ok(None);
        }

        let now = Utc::now();
        let attempts = job.attempts + 1;
        let (status, scheduled_for) = if permanent || attempts >= job.max_attempts {
            (JobStatus::Failed, job.scheduled_for)
        } else {
            let delay = backoff_delay(attempts, self.max_backoff_secs);
            (
                JobStatus::Pending,
                now + Duration::seconds(i64::try_from(delay).unwrap_or(i64::MAX / 1000)),
            )
        };

        let row: Option<JobRow> = sqlx::query_as(
            r#"UPDATE jobs SET status = ?, attempts = ?, scheduled_for = ?, lease_owner = NULL,
               lease_at = NULL, last_error = ?, updated_at = ?
               WHERE id = ? AND status = 'running' AND attempts = ?
               RETURNING *"#,
        )
        .bind(status.as_str())
        .bind(i64::from(attempts))
        .bind(format_datetime(scheduled_for))
        .bind(error)
        .bind(format_datetime(now))
        .bind(id.to_string())
        .bind(i64::from(job.attempts))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let job = Job::try_from(row)?;
                if job.status == JobStatus::Failed {
                    tracing::warn!(job_id = %id, attempts = job.attempts, error, "job failed permanently");
                } else {
                    tracing::info!(job_id = %id, attempts = job.attempts, retry_at = %job.scheduled_for, "job scheduled for retry");
                }
                Ok(Some(job))
            }
            None => {
                tracing::debug!(job_id = %id, "job changed before failure was recorded");
                Ok(None)
            }
        }
    }

    async fn release_lease(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE jobs SET status = 'pending', lease_owner = NULL, lease_at = NULL, updated_at = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(format_datetime(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> DomainResult<Vec<Job>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM jobs");
        push_conditions(&mut qb, filter);
        qb.push(" ORDER BY created_at ASC, rowid ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        let rows: Vec<JobRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count(&self, filter: &JobFilter) -> DomainResult<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs");
        push_conditions(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
    qb.push(" WHERE 1=1");
    if !filter.statuses.is_empty() {
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for status in &filter.statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
    }
    if let Some(worker_id) = &filter.worker_id {
        qb.push(" AND json_extract(payload, '$.worker_id') = ")
            .push_bind(worker_id.clone());
    }
    if let Some(task_id) = filter.task_id {
        qb.push(" AND json_extract(payload, '$.context.task_id') = ")
            .push_bind(task_id.to_string());
    }
    if let Some(goal_id) = filter.goal_id {
        qb.push(" AND json_extract(payload, '$.context.goal_id') = ")
            .push_bind(goal_id.to_string());
    }
    if filter.synthesis_only {
        qb.push(" AND json_extract(payload, '$.context.synthesis') IS NOT NULL");
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    kind: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    scheduled_for: String,
    lease_owner: Option<String>,
    lease_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobRow> for Job {
    type Error = DomainError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid job status: {}", row.status))
        })?;
        // An undecodable payload is kept raw; the scheduler fails such jobs permanently.
        let payload = match serde_json::from_str::<Value>(&row.payload) {
            Ok(value) => value,
            Err(_) => Value::String(row.payload),
        };

        Ok(Job {
            id: parse_uuid(&row.id)?,
            kind: JobKind::parse(&row.kind),
            payload,
            status,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or_default(),
            scheduled_for: parse_datetime(&row.scheduled_for)?,
            lease_owner: row.lease_owner,
            lease_at: parse_optional_datetime(row.lease_at)?,
            last_error: row.last_error,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
