//! `colony run`: drive the scheduler against the HTTP worker host.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adapters::invokers::{HttpInvokerConfig, HttpWorkerInvoker};
use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::{DispatchNotifier, Scheduler, SchedulerEvent, SchedulerStats, TickReport};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run a single tick and exit
    #[arg(long)]
    pub once: bool,

    /// Override the poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Override the maximum jobs claimed per tick
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Override the worker host base URL
    #[arg(long)]
    pub base_url: Option<String>,
}

impl CommandOutput for TickReport {
    fn to_human(&self) -> String {
        [
            "Tick completed:".to_string(),
            format!("  Jobs claimed:     {}", self.claimed),
            format!("  Succeeded:        {}", self.succeeded),
            format!("  Retrying:         {}", self.retrying),
            format!("  Failed:           {}", self.failed),
            format!("  Tasks admitted:   {}", self.admitted),
            format!("  Tasks reassigned: {}", self.reassigned),
            format!(
                "  Backstop:         {}",
                if self.backstop_ran { "ran" } else { "skipped" }
            ),
            format!("  Goals finalized:  {}", self.goals_finalized),
        ]
        .join("\n")
    }
}

impl CommandOutput for SchedulerStats {
    fn to_human(&self) -> String {
        format!(
            "Scheduler stopped after {} ticks: {} jobs claimed, {} succeeded, {} retried, {} failed, {} goals finalized",
            self.ticks,
            self.jobs_claimed,
            self.jobs_succeeded,
            self.jobs_retried,
            self.jobs_failed,
            self.goals_finalized
        )
    }
}

fn describe(event: &SchedulerEvent) -> Option<String> {
    match event {
        SchedulerEvent::Started { owner_id } => Some(format!("Scheduler started as {owner_id}")),
        SchedulerEvent::JobSucceeded {
            job_id, worker_id, ..
        } => Some(format!("  Job {job_id} succeeded ({worker_id})")),
        SchedulerEvent::JobRetrying {
            job_id,
            attempts,
            error,
        } => Some(format!("  Job {job_id} retrying after attempt {attempts}: {error}")),
        SchedulerEvent::JobFailed { job_id, error } => {
            Some(format!("  Job {job_id} failed: {error}"))
        }
        SchedulerEvent::TaskCompleted { task_id } => Some(format!("Task completed: {task_id}")),
        SchedulerEvent::TaskAssigned {
            task_id,
            reassigned,
        } => Some(if *reassigned {
            format!("Task reassigned: {task_id}")
        } else {
            format!("Task assigned: {task_id}")
        }),
        SchedulerEvent::BackstopCompleted {
            goals_finalized, ..
        } if *goals_finalized > 0 => Some(format!(
            "Backstop enqueued synthesis for {goals_finalized} goal(s)"
        )),
        SchedulerEvent::Stopped => Some("Scheduler stopped".to_string()),
        _ => None,
    }
}

pub async fn execute(args: RunArgs, mut config: Config, json_mode: bool) -> Result<()> {
    if let Some(poll) = args.poll_interval_ms {
        config.scheduler.poll_interval_ms = poll;
    }
    if let Some(batch) = args.batch_size {
        config.scheduler.batch_size = batch;
    }
    if let Some(base_url) = args.base_url {
        config.invoker.base_url = base_url;
    }

    let (notifier, hints) = if args.once {
        (DispatchNotifier::disabled(), None)
    } else {
        let (notifier, rx) = DispatchNotifier::channel();
        (notifier, Some(rx))
    };
    let ctx = AppContext::open_with_notifier(config, notifier).await?;

    let invoker = HttpWorkerInvoker::new(HttpInvokerConfig::from(&ctx.config.invoker))
        .context("Failed to build worker invoker")?;
    let scheduler = Scheduler::new(
        ctx.items.clone(),
        ctx.jobs.clone(),
        Arc::new(invoker),
        ctx.cascade.clone(),
        ctx.config.scheduler.clone(),
        &ctx.config.rate_limit,
    );

    let (event_tx, mut event_rx) = mpsc::channel::<SchedulerEvent>(256);

    if args.once {
        let report = scheduler.tick(&event_tx).await?;
        output(&report, json_mode);
        return Ok(());
    }

    if !json_mode {
        println!("Starting scheduler");
        println!("   Worker host: {}", ctx.config.invoker.base_url);
        println!("   Poll interval: {}ms", ctx.config.scheduler.poll_interval_ms);
        println!("   Batch size: {}", ctx.config.scheduler.batch_size);
        println!();
    }

    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if !json_mode {
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
            }
            if event == SchedulerEvent::Stopped {
                break;
            }
        }
    });

    let stopper = scheduler.clone();
    let signal_watcher = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping scheduler");
                stopper.stop().await;
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });

    let run_result = scheduler.run(hints, event_tx).await;
    signal_watcher.abort();
    let _ = event_handler.await;

    run_result?;
    output(&scheduler.stats().await, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_describe_skips_noise() {
        assert!(describe(&SchedulerEvent::JobClaimed {
            job_id: Uuid::new_v4(),
            worker_id: None
        })
        .is_none());
        assert!(describe(&SchedulerEvent::BackstopCompleted {
            goals_checked: 3,
            goals_finalized: 0
        })
        .is_none());
        assert_eq!(
            describe(&SchedulerEvent::Stopped).as_deref(),
            Some("Scheduler stopped")
        );
    }

    #[test]
    fn test_tick_report_human() {
        let report = TickReport {
            claimed: 2,
            succeeded: 1,
            failed: 1,
            ..Default::default()
        };
        let text = report.to_human();
        assert!(text.contains("Jobs claimed:     2"));
        assert!(text.contains("skipped"));
    }
}
