//! CLI argument parsing definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run newline-delimited JSON payloads through a worker pool
    Run {
        /// File with one JSON payload per line (stdin if omitted)
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Number of worker processes
        #[arg(long, value_name = "N")]
        size: Option<usize>,

        /// Worker executable (overrides the configured program)
        #[arg(long, value_name = "PATH")]
        program: Option<PathBuf>,

        /// Argument for the worker executable, repeatable
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Built-in worker used when no program is configured
        #[arg(long, value_enum, default_value_t = WorkerMode::Echo)]
        mode: WorkerMode,

        /// Requeue a failing job up to this many times
        #[arg(long, value_name = "N", default_value_t = 0)]
        retries: u32,

        /// Respawn lost workers up to this many times in total
        #[arg(long, value_name = "N", default_value_t = 3)]
        restarts: usize,

        /// Discard worker stderr
        #[arg(long)]
        silent: bool,

        /// Print the final pool status as JSON
        #[arg(long)]
        status: bool,
    },

    /// Run as a worker process (spawned by `run`)
    Worker {
        /// Processing behaviour
        #[arg(long, value_enum, default_value_t = WorkerMode::Echo)]
        mode: WorkerMode,

        /// Delay used by the `slow` mode, in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 200)]
        delay_ms: u64,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Write a sample configuration file
    Generate {
        /// Output path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Built-in worker behaviours
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkerMode {
    /// Reply `{"echoOf": <input>}`
    Echo,
    /// Always fail with "Fails Processing"
    Fail,
    /// Fail the first job, then echo
    FailOnce,
    /// Fail the first two jobs, then echo
    FailTwice,
    /// Fail the first job, then exit with code 1
    Fatal,
    /// Exit with code 1 on the first job without replying
    Crash,
    /// Echo, with readiness and every reply delayed
    Slow,
}

impl WorkerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerMode::Echo => "echo",
            WorkerMode::Fail => "fail",
            WorkerMode::FailOnce => "fail-once",
            WorkerMode::FailTwice => "fail-twice",
            WorkerMode::Fatal => "fatal",
            WorkerMode::Crash => "crash",
            WorkerMode::Slow => "slow",
        }
    }
}
