//! Built-in worker processors

use anyhow::{Context, Result};
use async_trait::async_trait;
use forkpool_runtime::{worker_main, Processor, WorkerRuntime, WorkerStats};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::WorkerMode;

const FAILURE_MESSAGE: &str = "Fails Processing";

/// Replies `{"echoOf": input}`, optionally after a delay
pub struct EchoProcessor {
    delay: Option<Duration>,
}

#[async_trait]
impl Processor for EchoProcessor {
    async fn process(&self, input: JsonValue) -> Result<JsonValue, JsonValue> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({ "echoOf": input }))
    }
}

/// Fails the first `failures` jobs, then echoes
///
/// `None` fails every job.
pub struct FailingProcessor {
    failures: Option<u32>,
    calls: AtomicU32,
}

impl FailingProcessor {
    pub fn always() -> Self {
        Self {
            failures: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn times(failures: u32) -> Self {
        Self {
            failures: Some(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Processor for FailingProcessor {
    async fn process(&self, input: JsonValue) -> Result<JsonValue, JsonValue> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures {
            Some(failures) if call >= failures => Ok(json!({ "echoOf": input })),
            _ => Err(json!(FAILURE_MESSAGE)),
        }
    }
}

/// Terminates the process instead of replying
pub struct CrashProcessor;

#[async_trait]
impl Processor for CrashProcessor {
    async fn process(&self, _input: JsonValue) -> Result<JsonValue, JsonValue> {
        warn!("Crashing on purpose");
        std::process::exit(1)
    }
}

/// Run this process as a pool worker
pub async fn run_worker(mode: WorkerMode, delay: Duration) -> Result<()> {
    let stats = match mode {
        WorkerMode::Echo => worker_main(EchoProcessor { delay: None }).await?,
        WorkerMode::Fail => worker_main(FailingProcessor::always()).await?,
        WorkerMode::FailOnce => worker_main(FailingProcessor::times(1)).await?,
        WorkerMode::FailTwice => worker_main(FailingProcessor::times(2)).await?,
        WorkerMode::Crash => worker_main(CrashProcessor).await?,
        WorkerMode::Slow => {
            tokio::time::sleep(delay).await;
            worker_main(EchoProcessor { delay: Some(delay) }).await?
        }
        WorkerMode::Fatal => run_fatal().await?,
    };

    info!(
        "Worker finished: {} processed, {} failed",
        stats.jobs_processed, stats.jobs_failed
    );
    Ok(())
}

/// Answer the first job with an error, then exit with code 1
async fn run_fatal() -> Result<WorkerStats> {
    let mut runtime = WorkerRuntime::new(FailingProcessor::always());
    runtime
        .announce_ready()
        .await
        .context("Failed to announce readiness")?;

    if runtime.process_next().await? {
        warn!("Exiting after the first job");
        std::process::exit(1);
    }
    Ok(runtime.stats())
}
