//! Command-line interface.

pub mod commands;
pub mod context;
pub mod id_resolver;
pub mod models;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::goal::GoalArgs;
use commands::init::InitArgs;
use commands::job::JobArgs;
use commands::run::RunArgs;
use commands::task::TaskArgs;
use commands::worker::WorkerArgs;

#[derive(Parser, Debug)]
#[command(name = "colony")]
#[command(about = "Colony - dependency-aware task orchestration for agent workers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .colony/config.yaml)
    #[arg(short, long, global = true, env = "COLONY_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize configuration, worker definitions and database
    Init(InitArgs),
    /// Goal management commands
    Goal(GoalArgs),
    /// Task management commands
    Task(TaskArgs),
    /// Job queue inspection
    Job(JobArgs),
    /// Worker registry commands
    Worker(WorkerArgs),
    /// Run the scheduler
    Run(RunArgs),
}

/// Print an error in the selected output mode and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_task_add() {
        let cli = Cli::try_parse_from([
            "colony", "--json", "task", "add", "1234", "write docs", "-d", "abcd", "-n", "2",
            "--type", "writing",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Task(args) => match args.command {
                commands::task::TaskCommands::Add {
                    depends_on,
                    agents,
                    task_type,
                    ..
                } => {
                    assert_eq!(depends_on, vec!["abcd".to_string()]);
                    assert_eq!(agents, 2);
                    assert_eq!(task_type.as_deref(), Some("writing"));
                }
                other => panic!("unexpected command: {other:?}"),
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_once_flag() {
        let cli = Cli::try_parse_from(["colony", "run", "--once"]).unwrap();
        assert!(matches!(cli.command, Commands::Run(RunArgs { once: true, .. })));
    }
}
