//! End-to-end orchestration scenarios over the SQLite store.

mod common;

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;

use colony::domain::models::{ItemStatus, ItemType, JobStatus, WorkerResponse};
use colony::domain::ports::{ItemFilter, ItemRepository, JobFilter, JobQueue};
use colony::services::{DispatchNotifier, NewTask, SchedulerEvent, SchedulerStatus};

use common::Harness;

fn events() -> (mpsc::Sender<SchedulerEvent>, mpsc::Receiver<SchedulerEvent>) {
    mpsc::channel(1024)
}

async fn synthesis_jobs(h: &Harness, goal_id: uuid::Uuid) -> u64 {
    h.jobs
        .count(&JobFilter::new().for_goal(goal_id).synthesis())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_dependency_chain_runs_in_order_and_synthesizes_once() {
    let h = Harness::new().await;
    let scheduler = h.scheduler("scheduler-a");
    let (tx, _rx) = events();

    let goal = h.manager.create_goal("Publish the quarterly report").await.unwrap();
    let t1 = h
        .manager
        .create_task(goal.id, NewTask::new("collect figures"))
        .await
        .unwrap();
    let t2 = h
        .manager
        .create_task(goal.id, NewTask::new("chart figures").depends_on(t1.id))
        .await
        .unwrap();

    // Only T1 is admitted while T2 waits on it.
    let first = scheduler.tick(&tx).await.unwrap();
    assert_eq!(first.admitted, 1);
    let t2_now = h.items.get(t2.id).await.unwrap().unwrap();
    assert_eq!(t2_now.status(), Some(ItemStatus::Pending));

    // T1 runs; its completion assigns T2.
    let second = scheduler.tick(&tx).await.unwrap();
    assert_eq!(second.claimed, 1);
    assert_eq!(second.succeeded, 1);
    let t1_now = h.items.get(t1.id).await.unwrap().unwrap();
    assert!(t1_now.is_completed());
    let t2_now = h.items.get(t2.id).await.unwrap().unwrap();
    assert_eq!(t2_now.status(), Some(ItemStatus::Assigned));
    assert_eq!(synthesis_jobs(&h, goal.id).await, 0);

    // T2 runs; the goal is ready for synthesis.
    let third = scheduler.tick(&tx).await.unwrap();
    assert_eq!(third.succeeded, 1);
    assert_eq!(synthesis_jobs(&h, goal.id).await, 1);
    let goal_now = h.items.get(goal.id).await.unwrap().unwrap();
    assert!(goal_now.dimensions.finalized_at.is_some());

    // Synthesis runs and lands under the goal.
    let fourth = scheduler.tick(&tx).await.unwrap();
    assert_eq!(fourth.succeeded, 1);
    let synth_outputs = h
        .items
        .query(
            &ItemFilter::new()
                .of_type(ItemType::WorkerOutput)
                .with_parent(goal.id),
        )
        .await
        .unwrap();
    assert_eq!(synth_outputs.len(), 1);

    let calls = h.invoker.calls_for("synthesizer");
    assert_eq!(calls.len(), 1);
    let digest = calls[0].synthesis.as_ref().unwrap();
    assert_eq!(digest.goal_summary, "Publish the quarterly report");
    assert_eq!(digest.tasks.len(), 2);
    assert!(digest.tasks.iter().all(|t| t.outputs.len() == 1));

    // Nothing left to do.
    let idle = scheduler.tick(&tx).await.unwrap();
    assert_eq!(idle.claimed, 0);
    assert_eq!(h.invoker.call_count(), 3);
}

#[tokio::test]
async fn test_multi_agent_task_completes_once_under_concurrent_checks() {
    let h = Harness::on_disk().await;
    let goal = h.manager.create_goal("Document the API").await.unwrap();
    let task = h
        .manager
        .create_task(goal.id, NewTask::new("write endpoint docs").with_agent_count(2))
        .await
        .unwrap();
    assert!(h.manager.assign(task.id).await.unwrap());

    let assigned = h.items.get(task.id).await.unwrap().unwrap();
    let mut workers = assigned.dimensions.assigned_workers().to_vec();
    workers.sort();
    assert_eq!(workers, vec!["analyst".to_string(), "writer".to_string()]);

    let jobs = h.jobs.claim_ready("test", 10).await.unwrap();
    assert_eq!(jobs.len(), 2);

    // One output is not enough.
    let first = &jobs[0];
    let worker = first.run_worker_payload().unwrap().worker_id;
    h.cascade
        .record_output(first, &WorkerResponse::new(&worker, "half of it"))
        .await
        .unwrap();
    assert!(!h.cascade.check_completion(task.id).await.unwrap());

    let second = &jobs[1];
    let worker = second.run_worker_payload().unwrap().worker_id;
    h.cascade
        .record_output(second, &WorkerResponse::new(&worker, "the rest"))
        .await
        .unwrap();

    let results = join_all((0..8).map(|_| h.cascade.check_completion(task.id))).await;
    assert!(results.into_iter().all(|r| r.unwrap()));

    let done = h.items.get(task.id).await.unwrap().unwrap();
    assert!(done.is_completed());
    assert_eq!(synthesis_jobs(&h, goal.id).await, 1);
}

#[tokio::test]
async fn test_backstop_and_completion_paths_race_to_one_synthesis() {
    let h = Harness::on_disk().await;
    let goal = h.manager.create_goal("Summarize incidents").await.unwrap();
    let task = h
        .manager
        .create_task(goal.id, NewTask::new("read incident log"))
        .await
        .unwrap();
    assert!(h.manager.assign(task.id).await.unwrap());

    let job = h.jobs.claim_ready("test", 1).await.unwrap().remove(0);
    h.cascade
        .record_output(&job, &WorkerResponse::new("analyst", "three incidents"))
        .await
        .unwrap();
    assert!(h.jobs.complete(job.id).await.unwrap());

    let a = h.scheduler("scheduler-a");
    let b = h.scheduler("scheduler-b");
    let (tx, _rx) = events();

    let (backstops, completions, goal_checks) = tokio::join!(
        join_all([a.run_backstop(&tx), b.run_backstop(&tx)]),
        join_all((0..3).map(|_| h.cascade.check_completion(task.id))),
        join_all((0..3).map(|_| h.cascade.check_goal(goal.id))),
    );

    let finalized_by_backstop: usize = backstops.into_iter().map(|r| r.unwrap()).sum();
    assert!(completions.into_iter().all(|r| r.unwrap()));
    let finalized_by_check = goal_checks
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    // Whoever won, exactly one synthesis job exists and at most one caller claimed it.
    assert_eq!(synthesis_jobs(&h, goal.id).await, 1);
    assert!(finalized_by_backstop + finalized_by_check <= 1);
}

#[tokio::test]
async fn test_failed_worker_leaves_task_assigned() {
    let h = Harness::new().await;
    h.invoker.fail_with(
        "analyst",
        colony::InvocationError::UnknownWorker("analyst".to_string()),
    );
    let scheduler = h.scheduler("scheduler-a");
    let (tx, _rx) = events();

    let goal = h.manager.create_goal("g").await.unwrap();
    let task = h
        .manager
        .create_task(goal.id, NewTask::new("inspect"))
        .await
        .unwrap();

    scheduler.tick(&tx).await.unwrap();
    let report = scheduler.tick(&tx).await.unwrap();
    assert_eq!(report.failed, 1);

    let failed = h
        .jobs
        .list(&JobFilter::new().for_task(task.id))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, JobStatus::Failed);
    assert!(failed[0].last_error.as_deref().unwrap().contains("Unknown worker"));

    let still = h.items.get(task.id).await.unwrap().unwrap();
    assert_eq!(still.status(), Some(ItemStatus::Assigned));
    assert_eq!(synthesis_jobs(&h, goal.id).await, 0);
}

#[tokio::test]
async fn test_run_loop_dispatches_hinted_jobs_immediately() {
    let (notifier, hints) = DispatchNotifier::channel();
    let h = Harness::with_notifier(notifier).await;
    let scheduler = h.scheduler("scheduler-run");
    let (tx, mut rx) = events();

    let goal = h.manager.create_goal("Triage the inbox").await.unwrap();
    h.manager
        .create_task(goal.id, NewTask::new("sort messages"))
        .await
        .unwrap();

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run(Some(hints), tx).await });

    // The first tick admits the task; hints carry the rest without another tick.
    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let outputs = h
                .items
                .count(
                    &ItemFilter::new()
                        .of_type(ItemType::WorkerOutput)
                        .with_parent(goal.id),
                )
                .await
                .unwrap();
            if outputs == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(finished.is_ok(), "synthesis output never appeared");

    scheduler.stop().await;
    handle.await.unwrap().unwrap();
    assert_eq!(scheduler.status().await, SchedulerStatus::Stopped);
    assert_eq!(h.invoker.call_count(), 2);

    let mut seen_stop = false;
    let mut ticks = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            SchedulerEvent::TickCompleted(_) => ticks += 1,
            SchedulerEvent::Stopped => seen_stop = true,
            _ => {}
        }
    }
    assert_eq!(ticks, 1);
    assert!(seen_stop);
}

#[tokio::test]
async fn test_competing_schedulers_assign_each_task_once() {
    let h = Harness::on_disk().await;
    let goal = h.manager.create_goal("Audit the services").await.unwrap();
    let mut expected = Vec::new();
    for n in 0..24 {
        let agents = if n % 3 == 0 { 2 } else { 1 };
        let task = h
            .manager
            .create_task(
                goal.id,
                NewTask::new(format!("audit service {n}")).with_agent_count(agents),
            )
            .await
            .unwrap();
        expected.push((task.id, u64::from(agents)));
    }

    let a = h.scheduler("scheduler-a");
    let b = h.scheduler("scheduler-b");
    let (tx, _rx) = events();

    let (ra, rb) = tokio::join!(a.tick(&tx), b.tick(&tx));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.admitted + rb.admitted, expected.len());

    for (task_id, agents) in &expected {
        let jobs = h.jobs.count(&JobFilter::new().for_task(*task_id)).await.unwrap();
        assert_eq!(jobs, *agents, "task {task_id} has {jobs} jobs");
    }

    // Drain the queue with both schedulers; every worker job runs exactly once.
    for _ in 0..20 {
        let (ra, rb) = tokio::join!(a.tick(&tx), b.tick(&tx));
        if ra.unwrap().claimed + rb.unwrap().claimed == 0 {
            break;
        }
    }
    let total: u64 = expected.iter().map(|(_, agents)| agents).sum();
    let task_calls = h.invoker.calls_for("analyst").len() + h.invoker.calls_for("writer").len();
    assert_eq!(task_calls as u64, total);
    for (task_id, agents) in &expected {
        assert_eq!(h.jobs.count(&JobFilter::new().for_task(*task_id)).await.unwrap(), *agents);
    }
    assert_eq!(synthesis_jobs(&h, goal.id).await, 1);
}

#[tokio::test]
async fn test_competing_schedulers_revive_stuck_task_once() {
    let h = Harness::on_disk().await;
    let goal = h.manager.create_goal("g").await.unwrap();
    let task = h
        .manager
        .create_task(goal.id, NewTask::new("lost work"))
        .await
        .unwrap();
    h.items
        .update(
            task.id,
            colony::domain::models::ItemPatch::new().with_dimensions(
                colony::domain::models::Dimensions {
                    status: Some(ItemStatus::Assigned),
                    assigned_workers: Some(vec!["analyst".to_string()]),
                    assigned_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();

    let a = h.scheduler("scheduler-a");
    let b = h.scheduler("scheduler-b");
    let (tx, _rx) = events();
    let (ra, rb) = tokio::join!(a.tick(&tx), b.tick(&tx));

    assert_eq!(ra.unwrap().reassigned + rb.unwrap().reassigned, 1);
    assert_eq!(
        h.jobs.count(&JobFilter::open().for_task(task.id)).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_malformed_task_dimensions_do_not_block_the_goal() {
    let h = Harness::new().await;
    let scheduler = h.scheduler("scheduler-a");
    let (tx, _rx) = events();

    let goal = h.manager.create_goal("Close the quarter").await.unwrap();
    let cancelled = h
        .manager
        .create_task(goal.id, NewTask::new("abandoned idea"))
        .await
        .unwrap();
    let odd = h
        .manager
        .create_task(goal.id, NewTask::new("reconcile ledgers"))
        .await
        .unwrap();

    // Written by another tool, outside the typed model.
    sqlx::query("UPDATE items SET dimensions = json_set(dimensions, '$.status', 'cancelled') WHERE id = ?")
        .bind(cancelled.id.to_string())
        .execute(&h.pool)
        .await
        .unwrap();
    sqlx::query("UPDATE items SET dimensions = json_set(dimensions, '$.agent_count', 'several') WHERE id = ?")
        .bind(odd.id.to_string())
        .execute(&h.pool)
        .await
        .unwrap();

    let tasks = h.manager.tasks_for_goal(goal.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    let stored = tasks.iter().find(|t| t.id == cancelled.id).unwrap();
    assert_eq!(stored.status(), None);
    assert_eq!(
        stored.dimensions.to_map().get("status"),
        Some(&serde_json::json!("cancelled"))
    );

    assert!(!h.cascade.check_goal(goal.id).await.unwrap());
    let report = scheduler.tick(&tx).await.unwrap();
    assert!(report.backstop_ran);
    // The task with the bad agent count still runs with one worker.
    assert_eq!(report.admitted, 1);
    assert_eq!(h.jobs.count(&JobFilter::new().for_task(odd.id)).await.unwrap(), 1);
    assert_eq!(h.jobs.count(&JobFilter::new().for_task(cancelled.id)).await.unwrap(), 0);

    let untouched = h.items.get(cancelled.id).await.unwrap().unwrap();
    assert_eq!(
        untouched.dimensions.to_map().get("status"),
        Some(&serde_json::json!("cancelled"))
    );
}
