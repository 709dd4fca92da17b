//! Retry of transient SQLite lock contention.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;

use crate::domain::errors::{DomainError, DomainResult};

/// SQLite primary and extended result codes for BUSY/LOCKED conditions.
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// Whether an error is lock contention that is worth retrying.
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code()
                .as_deref()
                .is_some_and(|code| BUSY_CODES.contains(&code))
                || db.message().contains("database is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Run `op`, retrying with exponential backoff while the store reports contention.
pub async fn with_busy_retry<T, F, Fut>(operation: &str, mut op: F) -> DomainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(20))
        .with_max_interval(Duration::from_millis(500))
        .with_max_elapsed_time(Some(Duration::from_secs(10)))
        .build();

    backoff::future::retry(policy, || {
        let attempt = op();
        async move {
            attempt.await.map_err(|err| {
                if is_busy(&err) {
                    tracing::debug!(operation, error = %err, "store busy, retrying");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    })
    .await
    .map_err(DomainError::from)
}
