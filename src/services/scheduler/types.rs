//! Status, event and statistics types for the scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Scheduler lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    /// Not running.
    Idle,
    /// Running its polling loop.
    Running,
    /// Loop alive but skipping ticks.
    Paused,
    /// Finishing the current tick before exit.
    ShuttingDown,
    Stopped,
}

/// Event emitted by the scheduler.
///
/// Events are delivered best effort; a full channel drops them.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Started {
        owner_id: String,
    },
    JobClaimed {
        job_id: Uuid,
        worker_id: Option<String>,
    },
    JobSucceeded {
        job_id: Uuid,
        worker_id: String,
        output_id: Uuid,
    },
    JobRetrying {
        job_id: Uuid,
        attempts: u32,
        error: String,
    },
    JobFailed {
        job_id: Uuid,
        error: String,
    },
    TaskCompleted {
        task_id: Uuid,
    },
    /// A pending task was admitted, or a stuck one re-admitted.
    TaskAssigned {
        task_id: Uuid,
        reassigned: bool,
    },
    BackstopCompleted {
        goals_checked: usize,
        goals_finalized: usize,
    },
    TickCompleted(TickReport),
    Stopped,
}

/// Outcome of processing one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Output recorded and job completed.
    Succeeded { output_id: Uuid, task_completed: bool },
    /// Failed, back to pending with backoff.
    Retrying { error: String },
    /// Failed permanently or out of attempts.
    Failed { error: String },
    /// The lease was lost before the job could be settled.
    LeaseLost,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub retrying: usize,
    pub failed: usize,
    pub admitted: usize,
    pub reassigned: usize,
    pub backstop_ran: bool,
    pub goals_finalized: usize,
}

/// Running totals since the scheduler was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub jobs_claimed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub tasks_admitted: u64,
    pub tasks_reassigned: u64,
    pub backstop_runs: u64,
    pub goals_finalized: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    pub(super) fn record_tick(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.tasks_admitted += report.admitted as u64;
        self.tasks_reassigned += report.reassigned as u64;
        if report.backstop_ran {
            self.backstop_runs += 1;
        }
        self.goals_finalized += report.goals_finalized as u64;
        self.last_tick_at = Some(Utc::now());
    }

    pub(super) fn record_job(&mut self, outcome: &JobOutcome) {
        self.jobs_claimed += 1;
        match outcome {
            JobOutcome::Succeeded { .. } => self.jobs_succeeded += 1,
            JobOutcome::Retrying { .. } => self.jobs_retried += 1,
            JobOutcome::Failed { .. } => self.jobs_failed += 1,
            JobOutcome::LeaseLost => {}
        }
    }
}

impl TickReport {
    pub(super) fn record_job(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Succeeded { .. } => self.succeeded += 1,
            JobOutcome::Retrying { .. } => self.retrying += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::LeaseLost => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate() {
        let mut stats = SchedulerStats::default();
        let report = TickReport {
            admitted: 2,
            reassigned: 1,
            backstop_ran: true,
            goals_finalized: 1,
            ..Default::default()
        };
        stats.record_tick(&report);
        stats.record_job(&JobOutcome::Failed { error: "x".into() });
        stats.record_job(&JobOutcome::LeaseLost);
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.tasks_admitted, 2);
        assert_eq!(stats.backstop_runs, 1);
        assert_eq!(stats.jobs_claimed, 2);
        assert_eq!(stats.jobs_failed, 1);
        assert!(stats.last_tick_at.is_some());
    }
}
