//! Pool handle and orchestrator task
//!
//! [`Pool`] is a cheap, cloneable handle. Every operation is a command sent
//! to one orchestrator task which owns all pool state, so callers never wait
//! on a lock and job callbacks can use the pool they are handed freely.

use forkpool_config::{PoolConfig, Validatable};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dispatch::PoolCore;
use crate::error::{ExecutionError, ExecutionResult};
use crate::job::{Job, JobId};
use crate::process::{ProcessSpawner, SpawnSpec, TokioProcessSpawner, WorkerSignal};
use crate::status::PoolStatus;
use crate::worker::{WorkerId, WorkerInfo};

/// Something the application may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A worker announced it is ready for work
    Started { worker: WorkerId },
    /// A job without a success callback completed
    Data { input: JsonValue, output: JsonValue },
    /// A job without a failure callback failed
    Error { error: JsonValue, input: JsonValue },
    /// A worker's channel closed
    Disconnected { worker: WorkerId },
    /// A worker process terminated
    Exit { worker: WorkerId, code: Option<i32> },
}

/// Receiving end of a pool's event stream
pub type PoolEvents = mpsc::UnboundedReceiver<PoolEvent>;

pub(crate) enum PoolCommand {
    Submit(Job),
    Requeue(Job),
    Start(Option<oneshot::Sender<ExecutionResult<usize>>>),
    ReleaseIdle(Option<usize>, oneshot::Sender<usize>),
    ReleaseAll(Option<oneshot::Sender<()>>),
    Status(oneshot::Sender<PoolStatus>),
    Workers(oneshot::Sender<Vec<WorkerInfo>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a pool of worker processes
#[derive(Clone)]
pub struct Pool {
    commands: mpsc::UnboundedSender<PoolCommand>,
}

impl Pool {
    /// Create a pool and spawn its orchestrator task
    ///
    /// Must be called from within a tokio runtime. Workers are only spawned
    /// here when `auto_start` is set; otherwise call [`Pool::start`].
    pub fn new(
        config: &PoolConfig,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> ExecutionResult<(Self, PoolEvents)> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let core = PoolCore::new(
            config.size,
            SpawnSpec::from(&config.worker),
            spawner,
            command_tx.downgrade(),
            event_tx,
            signal_tx,
        );

        info!(
            "Creating pool of {} workers running {}",
            config.size,
            config.worker.program.display()
        );
        tokio::spawn(run_orchestrator(core, command_rx, signal_rx, config.auto_start));

        Ok((Self::from_sender(command_tx), event_rx))
    }

    /// Pool backed by real child processes
    pub fn from_config(config: &PoolConfig) -> ExecutionResult<(Self, PoolEvents)> {
        Self::new(config, Arc::new(TokioProcessSpawner))
    }

    pub(crate) fn from_sender(commands: mpsc::UnboundedSender<PoolCommand>) -> Self {
        Self { commands }
    }

    /// Queue a payload as a job without callbacks
    pub fn submit(&self, payload: JsonValue) -> ExecutionResult<JobId> {
        self.submit_job(Job::new(payload))
    }

    /// Queue a job; it is dispatched as soon as a worker is idle
    pub fn submit_job(&self, job: Job) -> ExecutionResult<JobId> {
        let id = job.id();
        self.send(PoolCommand::Submit(job))?;
        Ok(id)
    }

    pub(crate) fn requeue(&self, job: Job) -> bool {
        let id = job.id();
        let accepted = self.commands.send(PoolCommand::Requeue(job)).is_ok();
        if !accepted {
            warn!("Dropped requeued job {}: pool is shut down", id);
        }
        accepted
    }

    /// Spawn workers until the pool is at its configured size
    ///
    /// Returns the number of processes spawned by this call.
    pub async fn start(&self) -> ExecutionResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::Start(Some(tx)))?;
        rx.await.map_err(|_| ExecutionError::PoolClosed)?
    }

    /// Like [`Pool::start`] without waiting, for use inside job callbacks
    pub fn request_start(&self) -> ExecutionResult<()> {
        self.send(PoolCommand::Start(None))
    }

    /// Release up to `count` idle workers (all idle workers for `None`)
    pub async fn release_idle(&self, count: Option<usize>) -> ExecutionResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::ReleaseIdle(count, tx))?;
        rx.await.map_err(|_| ExecutionError::PoolClosed)
    }

    /// Release every worker and close its channel
    ///
    /// A job held by a busy worker resolves if its result is already on the
    /// way and is requeued otherwise.
    pub async fn release_all(&self) -> ExecutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::ReleaseAll(Some(tx)))?;
        rx.await.map_err(|_| ExecutionError::PoolClosed)
    }

    /// Like [`Pool::release_all`] without waiting, for use inside job callbacks
    pub fn request_release_all(&self) -> ExecutionResult<()> {
        self.send(PoolCommand::ReleaseAll(None))
    }

    pub async fn status(&self) -> ExecutionResult<PoolStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::Status(tx))?;
        rx.await.map_err(|_| ExecutionError::PoolClosed)
    }

    /// Diagnostic view of every live worker process, released ones included
    pub async fn workers(&self) -> ExecutionResult<Vec<WorkerInfo>> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::Workers(tx))?;
        rx.await.map_err(|_| ExecutionError::PoolClosed)
    }

    /// Release all workers and stop the orchestrator
    ///
    /// Jobs still pending are dropped. Every later call on any clone of this
    /// handle fails with [`ExecutionError::PoolClosed`].
    pub async fn shutdown(&self) -> ExecutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::Shutdown(tx))?;
        rx.await.map_err(|_| ExecutionError::PoolClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: PoolCommand) -> ExecutionResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ExecutionError::PoolClosed)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Orchestrator loop
///
/// Worker signals are drained before commands so that a command always sees
/// every process event that happened before it was sent. The loop also ends
/// when the last [`Pool`] handle is dropped.
async fn run_orchestrator(
    mut core: PoolCore,
    mut commands: mpsc::UnboundedReceiver<PoolCommand>,
    mut signals: mpsc::UnboundedReceiver<WorkerSignal>,
    auto_start: bool,
) {
    if auto_start {
        if let Err(e) = core.start() {
            error!("Failed to auto-start workers: {}", e);
        }
    }

    loop {
        tokio::select! {
            biased;

            Some(signal) = signals.recv() => core.handle_signal(signal),

            command = commands.recv() => match command {
                Some(PoolCommand::Shutdown(reply)) => {
                    core.release_all();
                    let _ = reply.send(());
                    break;
                }
                Some(command) => core.handle_command(command),
                None => {
                    debug!("Every pool handle dropped, releasing workers");
                    core.release_all();
                    break;
                }
            },
        }
    }

    info!("Pool orchestrator stopped");
}
