//! Worker process main loop
//!
//! The runtime owns the worker's end of the channel. It sends `ready` once,
//! then answers every job message with exactly one `data` or `error` message.

use forkpool_ipc::{CoordinatorMessage, IpcError, IpcTransport, StdioTransport, WorkerMessage};
use log::{debug, error, info, warn};

use crate::error::RuntimeError;
use crate::processor::Processor;

/// Worker process main entry point
///
/// Runs `processor` over this process's stdin/stdout until the coordinator
/// disconnects.
pub async fn worker_main<P: Processor>(processor: P) -> Result<WorkerStats, RuntimeError> {
    let pid = std::process::id();
    info!("Starting worker process {}", pid);

    let stats = WorkerRuntime::new(processor).run().await?;

    info!(
        "Worker process {} shutting down after {} jobs ({} failed)",
        pid,
        stats.jobs_processed + stats.jobs_failed,
        stats.jobs_failed
    );
    Ok(stats)
}

/// Per-process job counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
}

/// Worker runtime over an arbitrary transport
pub struct WorkerRuntime<P, T = StdioTransport> {
    processor: P,
    transport: T,
    pid: u32,
    ready_sent: bool,
    stats: WorkerStats,
}

impl<P: Processor> WorkerRuntime<P, StdioTransport> {
    /// Runtime bound to stdin/stdout of the current process
    pub fn new(processor: P) -> Self {
        Self::with_transport(processor, StdioTransport::stdio(), std::process::id())
    }
}

impl<P, T> WorkerRuntime<P, T>
where
    P: Processor,
    T: IpcTransport,
{
    pub fn with_transport(processor: P, transport: T, pid: u32) -> Self {
        Self {
            processor,
            transport,
            pid,
            ready_sent: false,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Tell the coordinator this worker can take work
    ///
    /// Only the first call sends anything. Returns whether the message was
    /// written; a closed channel is not an error since the process is
    /// expected to be exiting.
    pub async fn announce_ready(&mut self) -> Result<bool, RuntimeError> {
        if self.ready_sent {
            return Ok(false);
        }
        self.ready_sent = true;

        self.send_message(CoordinatorMessage::ready(self.pid)).await
    }

    /// Main worker loop
    pub async fn run(mut self) -> Result<WorkerStats, RuntimeError> {
        self.announce_ready().await?;
        while self.process_next().await? {}
        Ok(self.stats)
    }

    /// Wait for one job and answer it
    ///
    /// Returns `false` once the coordinator has closed the channel, after
    /// the processor's disconnect hook has run. Unparsable lines are logged
    /// and skipped.
    pub async fn process_next(&mut self) -> Result<bool, RuntimeError> {
        loop {
            match self.transport.receive::<WorkerMessage>().await {
                Ok(message) => {
                    self.handle_message(message).await?;
                    return Ok(true);
                }
                Err(IpcError::ConnectionClosed) => {
                    debug!("Worker {} channel closed by coordinator", self.pid);
                    self.processor.on_disconnect().await;
                    return Ok(false);
                }
                Err(e @ (IpcError::DeserializationError(_) | IpcError::InvalidMessage(_))) => {
                    error!("Worker {} failed to parse message: {}", self.pid, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn handle_message(&mut self, message: WorkerMessage) -> Result<(), RuntimeError> {
        match message {
            WorkerMessage::Data { payload } => {
                let reply = match self.processor.process(payload).await {
                    Ok(output) => {
                        self.stats.jobs_processed += 1;
                        CoordinatorMessage::data(self.pid, output)
                    }
                    Err(failure) => {
                        self.stats.jobs_failed += 1;
                        CoordinatorMessage::error(self.pid, failure)
                    }
                };
                self.send_message(reply).await?;
            }
        }
        Ok(())
    }

    /// Send to the coordinator, dropping the message if the channel is gone
    async fn send_message(&mut self, message: CoordinatorMessage) -> Result<bool, RuntimeError> {
        match self.transport.send(&message).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_fatal() => {
                warn!(
                    "Worker {} dropped {} message: channel closed",
                    self.pid,
                    message.kind()
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
