//! Colony CLI entry point.

use clap::Parser;

use colony::cli::{commands, context::load_config, handle_error, Cli, Commands};
use colony::domain::models::Config;
use colony::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        // init runs before a project exists.
        Err(_) if matches!(cli.command, Commands::Init(_)) => Config::default(),
        Err(err) => handle_error(err, cli.json),
    };

    let mut log_config = LogConfig::from(&config.logging);
    if matches!(cli.command, Commands::Init(_)) {
        log_config.log_dir = None;
    }
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Goal(args) => commands::goal::execute(args, config, cli.json).await,
        Commands::Task(args) => commands::task::execute(args, config, cli.json).await,
        Commands::Job(args) => commands::job::execute(args, config, cli.json).await,
        Commands::Worker(args) => commands::worker::execute(args, config, cli.json).await,
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
