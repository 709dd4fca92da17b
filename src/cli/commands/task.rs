//! Task CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_item_id;
use crate::cli::models::{ItemOutput, JobOutput};
use crate::cli::output::{list_table, output, render_list, short_id, truncate, CommandOutput};
use crate::domain::models::{Config, ItemStatus, ItemType};
use crate::domain::ports::{ItemFilter, ItemRepository, JobFilter, JobQueue};
use crate::services::NewTask;

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommands,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Add a task to a goal
    Add {
        /// Goal ID or unique prefix
        goal: String,
        /// What the task should do
        summary: String,
        /// Task that must complete first (repeatable)
        #[arg(short = 'd', long = "depends-on")]
        depends_on: Vec<String>,
        /// Number of workers to assign
        #[arg(short = 'n', long = "agents", default_value_t = 1)]
        agents: u32,
        /// Task type, narrows assignment to workers with that affinity
        #[arg(short = 't', long = "type")]
        task_type: Option<String>,
        /// Topic matched against worker interests
        #[arg(long)]
        topic: Option<String>,
        /// Priority (higher first)
        #[arg(short, long)]
        priority: Option<i64>,
        /// Free-form JSON detail attached to the task
        #[arg(long)]
        detail: Option<String>,
        /// Assign right away if dependencies allow
        #[arg(long)]
        assign: bool,
    },
    /// List tasks
    List {
        /// Only tasks of this goal
        #[arg(short, long)]
        goal: Option<String>,
        /// Filter by status (pending, assigned, completed)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show a task with its outputs and jobs
    Show {
        /// Task ID or unique prefix
        id: String,
    },
    /// Assign workers to a pending task
    Assign {
        /// Task ID or unique prefix
        id: String,
    },
    /// Complete the task if every required worker produced output
    Check {
        /// Task ID or unique prefix
        id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<ItemOutput>,
    pub total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "status", "goal", "deps", "workers", "summary"]);
        for task in &self.tasks {
            table.add_row(vec![
                short_id(&task.id).to_string(),
                task.status.clone().unwrap_or_default(),
                task.parent_id
                    .as_deref()
                    .map(|id| short_id(id).to_string())
                    .unwrap_or_else(|| "-".to_string()),
                task.dependencies.len().to_string(),
                task.assigned_workers.join(","),
                truncate(&task.summary, 50),
            ]);
        }
        render_list("task", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TaskDetailOutput {
    pub task: ItemOutput,
    pub outputs: Vec<ItemOutput>,
    pub jobs: Vec<JobOutput>,
}

impl CommandOutput for TaskDetailOutput {
    fn to_human(&self) -> String {
        let task = &self.task;
        let mut lines = vec![
            format!("Task: {}", task.summary),
            format!("ID: {}", task.id),
            format!("Status: {}", task.status.as_deref().unwrap_or("-")),
        ];
        if let Some(goal) = &task.parent_id {
            lines.push(format!("Goal: {goal}"));
        }
        if !task.dependencies.is_empty() {
            lines.push(format!("Depends on: {}", task.dependencies.join(", ")));
        }
        if !task.assigned_workers.is_empty() {
            lines.push(format!("Workers: {}", task.assigned_workers.join(", ")));
        }
        if let Some(required) = task.dimensions.get("required_workers").and_then(|v| v.as_array())
        {
            let names: Vec<&str> = required.iter().filter_map(|v| v.as_str()).collect();
            lines.push(format!("Required: {}", names.join(", ")));
        }

        if !self.jobs.is_empty() {
            let mut table = list_table(&["id", "worker", "status", "attempts", "error"]);
            for job in &self.jobs {
                table.add_row(vec![
                    short_id(&job.id).to_string(),
                    job.worker_id.clone().unwrap_or_default(),
                    job.status.clone(),
                    format!("{}/{}", job.attempts, job.max_attempts),
                    job.last_error
                        .as_deref()
                        .map(|e| truncate(e, 40))
                        .unwrap_or_default(),
                ]);
            }
            lines.push(String::new());
            lines.push(render_list("job", &table, self.jobs.len()));
        }

        if !self.outputs.is_empty() {
            lines.push("\nOutputs:".to_string());
            for out in &self.outputs {
                lines.push(format!("  - [{}] {}", short_id(&out.id), truncate(&out.summary, 90)));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TaskActionOutput {
    pub success: bool,
    pub message: String,
    pub task: Option<ItemOutput>,
}

impl CommandOutput for TaskActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

fn parse_status(status: &str) -> Result<ItemStatus> {
    ItemStatus::from_str(status).ok_or_else(|| anyhow!("Invalid status: {status}"))
}

pub async fn execute(args: TaskArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    match args.command {
        TaskCommands::Add {
            goal,
            summary,
            depends_on,
            agents,
            task_type,
            topic,
            priority,
            detail,
            assign,
        } => {
            let goal_id = resolve_item_id(&ctx.pool, &goal, ItemType::Goal).await?;
            let mut new_task = NewTask::new(summary).with_agent_count(agents);
            for dep in &depends_on {
                let dep_id = resolve_item_id(&ctx.pool, dep, ItemType::Task).await?;
                new_task = new_task.depends_on(dep_id);
            }
            if let Some(task_type) = task_type {
                new_task = new_task.with_task_type(task_type);
            }
            if let Some(topic) = topic {
                new_task = new_task.with_topic(topic);
            }
            if let Some(priority) = priority {
                new_task = new_task.with_priority(priority);
            }
            if let Some(detail) = detail {
                let value = serde_json::from_str(&detail)
                    .unwrap_or_else(|_| json!({ "text": detail }));
                new_task = new_task.with_detail(value);
            }

            let task = ctx.task_manager.create_task(goal_id, new_task).await?;
            let assigned = if assign {
                ctx.task_manager.assign(task.id).await?
            } else {
                false
            };
            let task = ctx.items.get(task.id).await?.unwrap_or(task);

            output(
                &TaskActionOutput {
                    success: true,
                    message: if assigned {
                        format!(
                            "Task created and assigned: {} ({})",
                            task.id,
                            task.dimensions.assigned_workers().join(", ")
                        )
                    } else {
                        format!("Task created: {}", task.id)
                    },
                    task: Some(ItemOutput::from(&task)),
                },
                json_mode,
            );
        }

        TaskCommands::List { goal, status } => {
            let tasks = if let Some(goal) = goal {
                let goal_id = resolve_item_id(&ctx.pool, &goal, ItemType::Goal).await?;
                let mut tasks = ctx.task_manager.tasks_for_goal(goal_id).await?;
                if let Some(status) = status {
                    let status = parse_status(&status)?;
                    tasks.retain(|t| t.status() == Some(status));
                }
                tasks
            } else {
                let mut filter = ItemFilter::new().of_type(ItemType::Task);
                if let Some(status) = status {
                    filter = filter.with_status(parse_status(&status)?);
                }
                ctx.items.query(&filter).await?
            };
            output(
                &TaskListOutput {
                    total: tasks.len(),
                    tasks: tasks.iter().map(ItemOutput::from).collect(),
                },
                json_mode,
            );
        }

        TaskCommands::Show { id } => {
            let task_id = resolve_item_id(&ctx.pool, &id, ItemType::Task).await?;
            let task = ctx
                .items
                .get(task_id)
                .await?
                .ok_or_else(|| anyhow!("Task {task_id} not found"))?;
            let outputs = ctx
                .items
                .query(
                    &ItemFilter::new()
                        .of_type(ItemType::WorkerOutput)
                        .with_parent(task_id),
                )
                .await?;
            let jobs = ctx.jobs.list(&JobFilter::new().for_task(task_id)).await?;
            output(
                &TaskDetailOutput {
                    task: ItemOutput::from(&task),
                    outputs: outputs.iter().map(ItemOutput::from).collect(),
                    jobs: jobs.iter().map(JobOutput::from).collect(),
                },
                json_mode,
            );
        }

        TaskCommands::Assign { id } => {
            let task_id = resolve_item_id(&ctx.pool, &id, ItemType::Task).await?;
            let assigned = ctx.task_manager.assign(task_id).await?;
            let task = ctx.items.get(task_id).await?;
            output(
                &TaskActionOutput {
                    success: assigned,
                    message: if assigned {
                        format!("Task {task_id} assigned")
                    } else {
                        format!(
                            "Task {task_id} was not assigned: not pending, dependencies unmet, or no eligible workers"
                        )
                    },
                    task: task.as_ref().map(ItemOutput::from),
                },
                json_mode,
            );
        }

        TaskCommands::Check { id } => {
            let task_id = resolve_item_id(&ctx.pool, &id, ItemType::Task).await?;
            let completed = ctx.cascade.check_completion(task_id).await?;
            let task = ctx.items.get(task_id).await?;
            output(
                &TaskActionOutput {
                    success: completed,
                    message: if completed {
                        format!("Task {task_id} is completed")
                    } else {
                        format!("Task {task_id} is still waiting for worker output")
                    },
                    task: task.as_ref().map(ItemOutput::from),
                },
                json_mode,
            );
        }
    }

    Ok(())
}
