//! Lease exclusivity of the SQLite job queue across competing claimers.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;

use colony::adapters::sqlite::SqliteJobQueue;
use colony::domain::models::{Job, JobKind, JobStatus, QueueConfig};
use colony::domain::ports::{JobFilter, JobQueue};

fn job(n: usize) -> Job {
    Job::new(
        JobKind::RunWorker,
        json!({"worker_id": "analyst", "context": {"task_summary": format!("job {n}")}}),
    )
}

#[tokio::test]
async fn test_competing_claimers_never_share_a_job() {
    let (_dir, pool) = common::file_pool().await;
    let seed = SqliteJobQueue::new(pool.clone());
    for n in 0..40 {
        seed.enqueue(job(n)).await.unwrap();
    }

    let claimers: Vec<(String, SqliteJobQueue)> = (0..4)
        .map(|i| (format!("owner-{i}"), SqliteJobQueue::new(pool.clone())))
        .collect();

    let batches = join_all(claimers.iter().map(|(owner, queue)| async move {
        let mut mine = Vec::new();
        loop {
            let claimed = queue.claim_ready(owner, 3).await.unwrap();
            if claimed.is_empty() {
                break;
            }
            for job in claimed {
                assert_eq!(job.lease_owner.as_deref(), Some(owner.as_str()));
                mine.push(job.id);
            }
            tokio::task::yield_now().await;
        }
        mine
    }))
    .await;

    let total: usize = batches.iter().map(Vec::len).sum();
    let unique: HashSet<_> = batches.iter().flatten().collect();
    assert_eq!(total, 40);
    assert_eq!(unique.len(), 40);
    assert_eq!(
        seed.count(&JobFilter::new().with_status(JobStatus::Running))
            .await
            .unwrap(),
        40
    );
}

#[tokio::test]
async fn test_expired_lease_has_a_single_new_owner() {
    let (_dir, pool) = common::file_pool().await;
    let config = QueueConfig {
        lease_ttl_secs: 1,
        ..QueueConfig::default()
    };
    let original = SqliteJobQueue::with_config(pool.clone(), &config);
    let enqueued = original.enqueue(job(0)).await.unwrap();
    let first = original.claim_ready("crashed-owner", 1).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let rivals: Vec<SqliteJobQueue> = (0..5)
        .map(|_| SqliteJobQueue::with_config(pool.clone(), &config))
        .collect();
    let results = join_all(
        rivals
            .iter()
            .enumerate()
            .map(|(i, q)| async move { q.claim_ready(&format!("rival-{i}"), 1).await.unwrap() }),
    )
    .await;

    let winners: Vec<&Job> = results.iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, enqueued.id);
    // The expired lease cost an attempt.
    assert_eq!(winners[0].attempts, 1);
    assert_eq!(winners[0].last_error.as_deref(), Some("lease expired"));
}

#[tokio::test]
async fn test_targeted_claims_race_to_one_owner() {
    let (_dir, pool) = common::file_pool().await;
    let queue = SqliteJobQueue::new(pool.clone());
    let enqueued = queue.enqueue(job(0)).await.unwrap();

    let results = join_all((0..6).map(|i| {
        let queue = SqliteJobQueue::new(pool.clone());
        async move { queue.claim(enqueued.id, &format!("owner-{i}")).await.unwrap() }
    }))
    .await;

    assert_eq!(results.iter().flatten().count(), 1);
    assert!(queue.claim_ready("late", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_valid_lease_blocks_rivals_until_it_expires() {
    let (_dir, pool) = common::file_pool().await;
    let config = QueueConfig {
        lease_ttl_secs: 2,
        ..QueueConfig::default()
    };
    let a = SqliteJobQueue::with_config(pool.clone(), &config);
    let b = SqliteJobQueue::with_config(pool.clone(), &config);
    let enqueued = a.enqueue(job(0)).await.unwrap();
    assert_eq!(a.claim_ready("owner-a", 1).await.unwrap().len(), 1);

    // Well inside the lease, and again just before it runs out.
    for wait_ms in [500, 1200] {
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        assert!(b.claim_ready("owner-b", 1).await.unwrap().is_empty());
        assert!(b.claim(enqueued.id, "owner-b").await.unwrap().is_none());
        let held = b.get(enqueued.id).await.unwrap().unwrap();
        assert_eq!(held.lease_owner.as_deref(), Some("owner-a"));
        assert_eq!(held.status, JobStatus::Running);
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    let taken = b.claim_ready("owner-b", 1).await.unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].id, enqueued.id);
    assert_eq!(taken[0].lease_owner.as_deref(), Some("owner-b"));
    assert!(a.claim_ready("owner-a", 1).await.unwrap().is_empty());
}
