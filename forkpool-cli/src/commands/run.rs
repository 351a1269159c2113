//! `forkpool run`: feed JSON lines through a pool

use anyhow::{bail, Context, Result};
use forkpool_config::ForkpoolConfig;
use forkpool_execution::{Job, Pool, PoolEvent, PoolEvents};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::WorkerMode;

/// How long to wait for released workers to exit
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options of the `run` command
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: Option<PathBuf>,
    pub size: Option<usize>,
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub mode: WorkerMode,
    pub retries: u32,
    pub restarts: usize,
    pub silent: bool,
    pub status: bool,
    pub log_level: Option<String>,
}

/// Final outcome of one submitted payload
#[derive(Debug)]
enum Outcome {
    Output { input: JsonValue, output: JsonValue },
    Failure { input: JsonValue, error: JsonValue },
}

/// Fill the pool section from command line options
///
/// Without a configured program the pool runs this executable in worker
/// mode.
pub fn apply_run_options(config: &mut ForkpoolConfig, options: &RunOptions) -> Result<()> {
    let worker = &mut config.pool.worker;

    if let Some(program) = &options.program {
        worker.program = program.clone();
        worker.args = options.args.clone();
    } else if worker.program.as_os_str().is_empty() {
        worker.program =
            std::env::current_exe().context("Failed to locate the forkpool executable")?;
        worker.args = vec![
            "worker".to_string(),
            "--mode".to_string(),
            options.mode.as_str().to_string(),
        ];
        if let Some(level) = &options.log_level {
            worker.args.push("--log-level".to_string());
            worker.args.push(level.clone());
        }
    }

    if let Some(size) = options.size {
        config.pool.size = size;
    }
    if options.silent {
        worker.silent = true;
    }

    config.validate_all().context("Invalid pool configuration")?;
    Ok(())
}

/// Parse newline-delimited JSON, skipping blank lines
pub fn parse_payloads(text: &str) -> Result<Vec<JsonValue>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid JSON on input line {}", index + 1))
        })
        .collect()
}

async fn read_payloads(input: Option<&Path>) -> Result<Vec<JsonValue>> {
    let text = match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read input file: {:?}", path))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read payloads from stdin")?;
            text
        }
    };
    parse_payloads(&text)
}

/// Build a job that reports its final outcome on `outcomes`
fn tracked_job(
    payload: JsonValue,
    retries: u32,
    outcomes: mpsc::UnboundedSender<Outcome>,
) -> Job {
    let on_output = outcomes.clone();
    Job::new(payload)
        .on_success(move |_, input, output| {
            let _ = on_output.send(Outcome::Output {
                input: input.clone(),
                output: output.clone(),
            });
        })
        .on_failure(move |_, error, input, mut requeue| {
            let attempts = requeue.attempts().unwrap_or(0);
            if attempts <= retries && requeue.requeue() {
                debug!("Retrying {} after attempt {}", input, attempts);
                return;
            }
            let _ = outcomes.send(Outcome::Failure {
                input: input.clone(),
                error: error.clone(),
            });
        })
}

pub async fn handle_run(mut config: ForkpoolConfig, options: RunOptions) -> Result<()> {
    apply_run_options(&mut config, &options)?;
    let payloads = read_payloads(options.input.as_deref()).await?;
    let total = payloads.len();

    info!(
        "Running {} payloads on {} workers ({})",
        total,
        config.pool.size,
        config.pool.worker.program.display()
    );

    let (pool, mut events) =
        Pool::from_config(&config.pool).context("Failed to create worker pool")?;

    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
    for payload in payloads {
        pool.submit_job(tracked_job(payload, options.retries, outcome_tx.clone()))?;
    }
    drop(outcome_tx);

    pool.start().await.context("Failed to start workers")?;

    let mut remaining = total;
    let mut failed = 0;
    let mut restarts = 0;

    while remaining > 0 {
        tokio::select! {
            Some(outcome) = outcomes.recv() => {
                remaining -= 1;
                match outcome {
                    Outcome::Output { input, output } => {
                        println!("{}", json!({ "input": input, "output": output }));
                    }
                    Outcome::Failure { input, error } => {
                        failed += 1;
                        eprintln!("{}", json!({ "input": input, "error": error }));
                    }
                }
            }
            Some(event) = events.recv() => {
                if let PoolEvent::Exit { worker, code } = &event {
                    debug!("{} exited with code {:?}", worker, code);
                    let status = pool.status().await?;
                    if status.outstanding() == 0 {
                        continue;
                    }
                    if restarts < options.restarts {
                        let spawned = pool.start().await?;
                        restarts += spawned;
                        if spawned > 0 {
                            warn!(
                                "Respawned {} workers ({} of {} restarts used)",
                                spawned, restarts, options.restarts
                            );
                        }
                    } else if status.workers.created == 0 {
                        bail!(
                            "All workers exited with {} jobs outstanding",
                            status.outstanding()
                        );
                    }
                } else {
                    debug!("Pool event: {:?}", event);
                }
            }
            else => bail!("Pool stopped with {} jobs outstanding", remaining),
        }
    }

    if options.status {
        let status = pool.status().await?;
        println!("{}", serde_json::to_string(&status)?);
    }

    pool.release_all().await?;
    drain(&pool, &mut events).await;
    pool.shutdown().await?;

    if failed > 0 {
        bail!("{} of {} jobs failed", failed, total);
    }
    info!("All {} jobs completed", total);
    Ok(())
}

/// Wait until every released worker has exited
async fn drain(pool: &Pool, events: &mut PoolEvents) {
    let wait = async {
        loop {
            match pool.workers().await {
                Ok(workers) if !workers.is_empty() => {}
                _ => break,
            }
            if events.recv().await.is_none() {
                break;
            }
        }
    };

    if tokio::time::timeout(DRAIN_TIMEOUT, wait).await.is_err() {
        warn!("Timed out waiting for workers to exit");
    }
}
