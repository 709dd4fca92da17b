//! Goal CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_item_id;
use crate::cli::models::ItemOutput;
use crate::cli::output::{list_table, output, render_list, short_id, truncate, CommandOutput};
use crate::domain::models::{Config, ItemStatus, ItemType};
use crate::domain::ports::{ItemFilter, ItemOrder, ItemRepository};

#[derive(Args, Debug)]
pub struct GoalArgs {
    #[command(subcommand)]
    pub command: GoalCommands,
}

#[derive(Subcommand, Debug)]
pub enum GoalCommands {
    /// Create a new goal
    Create {
        /// What the goal should achieve
        summary: String,
    },
    /// List goals
    List {
        /// Filter by status (open, completed)
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number of goals
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Show a goal with its tasks
    Show {
        /// Goal ID or unique prefix
        id: String,
    },
    /// Enqueue synthesis if every task of the goal is completed
    Check {
        /// Goal ID or unique prefix
        id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct GoalListOutput {
    pub goals: Vec<ItemOutput>,
    pub total: usize,
}

impl CommandOutput for GoalListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "status", "finalized", "summary"]);
        for goal in &self.goals {
            let finalized = goal.dimensions.get("finalized_at").is_some();
            table.add_row(vec![
                short_id(&goal.id).to_string(),
                goal.status.clone().unwrap_or_default(),
                if finalized { "yes" } else { "no" }.to_string(),
                truncate(&goal.summary, 60),
            ]);
        }
        render_list("goal", &table, self.total)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct GoalDetailOutput {
    pub goal: ItemOutput,
    pub tasks: Vec<ItemOutput>,
    pub outputs: Vec<ItemOutput>,
}

impl CommandOutput for GoalDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Goal: {}", self.goal.summary),
            format!("ID: {}", self.goal.id),
            format!("Status: {}", self.goal.status.as_deref().unwrap_or("-")),
        ];
        if let Some(finalized) = self.goal.dimensions.get("finalized_at") {
            lines.push(format!("Finalized: {finalized}"));
        }

        let mut table = list_table(&["id", "status", "workers", "summary"]);
        for task in &self.tasks {
            table.add_row(vec![
                short_id(&task.id).to_string(),
                task.status.clone().unwrap_or_default(),
                task.assigned_workers.join(","),
                truncate(&task.summary, 50),
            ]);
        }
        lines.push(String::new());
        lines.push(render_list("task", &table, self.tasks.len()));

        if !self.outputs.is_empty() {
            lines.push("\nSynthesis:".to_string());
            for output in &self.outputs {
                lines.push(format!("  - {}", truncate(&output.summary, 100)));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct GoalActionOutput {
    pub success: bool,
    pub message: String,
    pub goal: Option<ItemOutput>,
}

impl CommandOutput for GoalActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn execute(args: GoalArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    match args.command {
        GoalCommands::Create { summary } => {
            let goal = ctx.task_manager.create_goal(summary).await?;
            output(
                &GoalActionOutput {
                    success: true,
                    message: format!("Goal created: {}", goal.id),
                    goal: Some(ItemOutput::from(&goal)),
                },
                json_mode,
            );
        }

        GoalCommands::List { status, limit } => {
            let mut filter = ItemFilter::new()
                .of_type(ItemType::Goal)
                .order(ItemOrder::CreatedDesc)
                .limit(limit);
            if let Some(status) = status {
                let status = ItemStatus::from_str(&status)
                    .ok_or_else(|| anyhow!("Invalid status: {status}"))?;
                filter = filter.with_status(status);
            }
            let goals = ctx.items.query(&filter).await?;
            output(
                &GoalListOutput {
                    total: goals.len(),
                    goals: goals.iter().map(ItemOutput::from).collect(),
                },
                json_mode,
            );
        }

        GoalCommands::Show { id } => {
            let goal_id = resolve_item_id(&ctx.pool, &id, ItemType::Goal).await?;
            let goal = ctx
                .items
                .get(goal_id)
                .await?
                .ok_or_else(|| anyhow!("Goal {goal_id} not found"))?;
            let tasks = ctx.task_manager.tasks_for_goal(goal_id).await?;
            let outputs = ctx
                .items
                .query(
                    &ItemFilter::new()
                        .of_type(ItemType::WorkerOutput)
                        .with_parent(goal_id),
                )
                .await?;
            output(
                &GoalDetailOutput {
                    goal: ItemOutput::from(&goal),
                    tasks: tasks.iter().map(ItemOutput::from).collect(),
                    outputs: outputs.iter().map(ItemOutput::from).collect(),
                },
                json_mode,
            );
        }

        GoalCommands::Check { id } => {
            let goal_id = resolve_item_id(&ctx.pool, &id, ItemType::Goal).await?;
            let enqueued = ctx.cascade.check_goal(goal_id).await?;
            let goal = ctx.items.get(goal_id).await?;
            output(
                &GoalActionOutput {
                    success: enqueued,
                    message: if enqueued {
                        format!("Synthesis enqueued for goal {goal_id}")
                    } else {
                        format!("Goal {goal_id} is not ready for synthesis or already finalized")
                    },
                    goal: goal.as_ref().map(ItemOutput::from),
                },
                json_mode,
            );
        }
    }

    Ok(())
}
