//! Implementation of the `colony init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::{database_url, initialize_database};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::PROJECT_DIR;

const SAMPLE_WORKERS: &str = r#"# Worker definitions served by the worker host.
workers:
  - id: researcher
    name: Researcher
    topic: research
    interests:
      item_types: [task]
      keywords: [investigate, research, analyze]
  - id: writer
    name: Writer
    task_types: [writing]
    interests:
      item_types: [task]
      keywords: [write, draft, document]
  - id: synthesizer
    name: Synthesizer
    options:
      temperature: 0.2
"#;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force reinitialization even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub files_written: Vec<String>,
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.files_written.is_empty() {
            lines.push("\nWrote:".to_string());
            for file in &self.files_written {
                lines.push(format!("  - {file}"));
            }
        }
        if self.database_initialized {
            lines.push(format!("\nDatabase initialized at {PROJECT_DIR}/colony.db"));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };
    let project_dir = target_path.join(PROJECT_DIR);

    if project_dir.exists() && !args.force {
        output(
            &InitOutput {
                success: false,
                message: "Project already initialized. Use --force to reinitialize.".to_string(),
                initialized_path: target_path,
                files_written: vec![],
                database_initialized: false,
            },
            json_mode,
        );
        return Ok(());
    }

    if args.force && project_dir.exists() {
        fs::remove_dir_all(&project_dir)
            .await
            .with_context(|| format!("Failed to remove existing {PROJECT_DIR} directory"))?;
    }
    fs::create_dir_all(project_dir.join("logs"))
        .await
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    let config = Config::default();
    let mut files_written = Vec::new();

    let config_yaml =
        serde_yaml::to_string(&config).context("Failed to serialize default configuration")?;
    fs::write(project_dir.join("config.yaml"), config_yaml)
        .await
        .context("Failed to write config.yaml")?;
    files_written.push(format!("{PROJECT_DIR}/config.yaml"));

    fs::write(project_dir.join("workers.yaml"), SAMPLE_WORKERS)
        .await
        .context("Failed to write workers.yaml")?;
    files_written.push(format!("{PROJECT_DIR}/workers.yaml"));

    let db_path = project_dir.join("colony.db");
    let pool = initialize_database(&database_url(&db_path.to_string_lossy()), None)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    output(
        &InitOutput {
            success: true,
            message: if args.force {
                "Project reinitialized successfully.".to_string()
            } else {
                "Project initialized successfully.".to_string()
            },
            initialized_path: target_path,
            files_written,
            database_initialized: true,
        },
        json_mode,
    );
    Ok(())
}
