use anyhow::{Context, Result};
use clap::Parser;
use forkpool_config::ConfigLoader;
use forkpool_logging::{init_logging_from_config, init_simple_tracing};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

mod cli;
mod commands;

use cli::{Cli, Commands, ConfigCommands};
use commands::{handle_config_generate, handle_config_validate, handle_run, run_worker, RunOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // stdout carries the protocol, so worker logs go to stderr and no
        // configuration is read
        Commands::Worker { mode, delay_ms } => {
            init_simple_tracing(cli.log_level.as_deref().unwrap_or("info"))?;
            run_worker(mode, Duration::from_millis(delay_ms)).await
        }
        command => run_coordinator(command, cli.config, cli.log_level).await,
    }
}

async fn run_coordinator(
    command: Commands,
    config_path: Option<PathBuf>,
    log_level: Option<String>,
) -> Result<()> {
    let config = ConfigLoader::new()
        .read(config_path.as_ref())
        .context("Failed to load configuration")?;
    init_logging_from_config(&config.logging, log_level.as_deref())?;
    debug!("forkpool {} starting", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Run {
            input,
            size,
            program,
            args,
            mode,
            retries,
            restarts,
            silent,
            status,
        } => {
            let options = RunOptions {
                input,
                size,
                program,
                args,
                mode,
                retries,
                restarts,
                silent,
                status,
                log_level,
            };
            handle_run(config, options).await
        }
        Commands::Config { config_cmd } => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(&config_file),
            ConfigCommands::Generate { output, force } => handle_config_generate(&output, force),
        },
        Commands::Worker { mode, delay_ms } => {
            run_worker(mode, Duration::from_millis(delay_ms)).await
        }
    }
}
