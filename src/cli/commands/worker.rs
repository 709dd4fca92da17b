//! Worker registry commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, WorkerDefinition};

#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// List registered workers
    List {
        /// Include disabled workers
        #[arg(short, long)]
        all: bool,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct WorkerListOutput {
    pub workers: Vec<WorkerDefinition>,
    pub total: usize,
}

impl CommandOutput for WorkerListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "name", "enabled", "topic", "task types", "keywords"]);
        for worker in &self.workers {
            table.add_row(vec![
                worker.id.clone(),
                worker.name.clone(),
                if worker.enabled { "yes" } else { "no" }.to_string(),
                worker.topic.clone().unwrap_or_else(|| "-".to_string()),
                worker.task_types.join(","),
                worker.interests.keywords.join(","),
            ]);
        }
        render_list("worker", &table, self.total)
    }
}

pub async fn execute(args: WorkerArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    match args.command {
        WorkerCommands::List { all } => {
            let workers = if all {
                ctx.registry.all().await?.as_ref().clone()
            } else {
                ctx.registry.enabled_workers().await?
            };
            output(
                &WorkerListOutput {
                    total: workers.len(),
                    workers,
                },
                json_mode,
            );
        }
    }

    Ok(())
}
