//! Job queue inspection commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::id_resolver::{resolve_item_id, resolve_job_id};
use crate::cli::models::JobOutput;
use crate::cli::output::{list_table, output, render_list, short_id, truncate, CommandOutput};
use crate::domain::models::{Config, ItemType, JobStatus};
use crate::domain::ports::{JobFilter, JobQueue};

#[derive(Args, Debug)]
pub struct JobArgs {
    #[command(subcommand)]
    pub command: JobCommands,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// List jobs
    List {
        /// Filter by status (pending, running, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Only jobs of this task
        #[arg(short, long)]
        task: Option<String>,
        /// Only synthesis jobs
        #[arg(long)]
        synthesis: bool,
        /// Maximum number of jobs
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one job with its payload
    Show {
        /// Job ID or unique prefix
        id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct JobListOutput {
    pub jobs: Vec<JobOutput>,
    pub total: usize,
}

impl CommandOutput for JobListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "worker", "status", "attempts", "task", "scheduled"]);
        for job in &self.jobs {
            let target = match (&job.task_id, &job.goal_id) {
                (Some(task), _) => short_id(task).to_string(),
                (None, Some(goal)) if job.synthesis => format!("goal {}", short_id(goal)),
                _ => "-".to_string(),
            };
            table.add_row(vec![
                short_id(&job.id).to_string(),
                job.worker_id.clone().unwrap_or_else(|| job.kind.clone()),
                job.status.clone(),
                format!("{}/{}", job.attempts, job.max_attempts),
                target,
                job.scheduled_for.clone(),
            ]);
        }
        render_list("job", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct JobDetailOutput {
    #[serde(flatten)]
    pub job: JobOutput,
    pub payload: serde_json::Value,
}

impl CommandOutput for JobDetailOutput {
    fn to_human(&self) -> String {
        let job = &self.job;
        let mut lines = vec![
            format!("Job: {}", job.id),
            format!("Kind: {}", job.kind),
            format!("Status: {}", job.status),
            format!("Attempts: {}/{}", job.attempts, job.max_attempts),
            format!("Scheduled for: {}", job.scheduled_for),
        ];
        if let Some(worker) = &job.worker_id {
            lines.push(format!("Worker: {worker}"));
        }
        if let Some(owner) = &job.lease_owner {
            lines.push(format!("Lease owner: {owner}"));
        }
        if let Some(error) = &job.last_error {
            lines.push(format!("Last error: {}", truncate(error, 200)));
        }
        lines.push(format!(
            "Payload:\n{}",
            serde_json::to_string_pretty(&self.payload).unwrap_or_default()
        ));
        lines.join("\n")
    }
}

pub async fn execute(args: JobArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    match args.command {
        JobCommands::List {
            status,
            task,
            synthesis,
            limit,
        } => {
            let mut filter = JobFilter::new().limit(limit);
            if let Some(status) = status {
                let status = JobStatus::from_str(&status)
                    .ok_or_else(|| anyhow!("Invalid status: {status}"))?;
                filter = filter.with_status(status);
            }
            if let Some(task) = task {
                let task_id = resolve_item_id(&ctx.pool, &task, ItemType::Task).await?;
                filter = filter.for_task(task_id);
            }
            if synthesis {
                filter = filter.synthesis();
            }
            let jobs = ctx.jobs.list(&filter).await?;
            output(
                &JobListOutput {
                    total: jobs.len(),
                    jobs: jobs.iter().map(JobOutput::from).collect(),
                },
                json_mode,
            );
        }

        JobCommands::Show { id } => {
            let job_id = resolve_job_id(&ctx.pool, &id).await?;
            let job = ctx
                .jobs
                .get(job_id)
                .await?
                .ok_or_else(|| anyhow!("Job {job_id} not found"))?;
            output(
                &JobDetailOutput {
                    job: JobOutput::from(&job),
                    payload: job.payload.clone(),
                },
                json_mode,
            );
        }
    }

    Ok(())
}
