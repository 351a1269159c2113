//! Process spawn boundary
//!
//! The orchestrator never touches `tokio::process` directly. It asks a
//! [`ProcessSpawner`] for a [`ProcessChannel`] and receives everything the
//! child does as [`WorkerSignal`]s on a single queue.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use forkpool_config::WorkerEntryConfig;
use forkpool_ipc::{decode_line, encode_line, CoordinatorMessage, IpcError, WorkerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::worker::WorkerId;

/// Something that happened on a worker's channel or process
///
/// For one worker, every `Message` read before end-of-stream precedes
/// `Closed`, and `Closed` precedes `Exited`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A message arrived from the worker
    Message(CoordinatorMessage),
    /// The channel is closed; nothing more can be sent or received
    Closed,
    /// The process terminated with the given exit code (`None` if killed by a signal)
    Exited(Option<i32>),
}

/// A [`ChannelEvent`] tagged with the worker it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSignal {
    pub worker: WorkerId,
    pub event: ChannelEvent,
}

impl WorkerSignal {
    pub fn new(worker: WorkerId, event: ChannelEvent) -> Self {
        Self { worker, event }
    }
}

/// Resolved launch parameters for a worker process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
    /// Discard the child's stderr
    pub silent: bool,
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl From<&WorkerEntryConfig> for SpawnSpec {
    fn from(config: &WorkerEntryConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            current_dir: config.current_dir.clone(),
            silent: config.silent,
        }
    }
}

/// Coordinator's end of one worker's channel
pub trait ProcessChannel: Send {
    /// OS process id, for diagnostics
    fn pid(&self) -> Option<u32>;

    /// Queue a message for the worker
    fn send(&mut self, message: WorkerMessage) -> Result<(), IpcError>;

    /// Ask for the channel to be closed once queued messages are flushed
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Creates worker processes
pub trait ProcessSpawner: Send + Sync {
    /// Start a worker process. Everything the process does afterwards is
    /// reported on `signals` under `worker`.
    fn spawn(
        &self,
        worker: WorkerId,
        spec: &SpawnSpec,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> ExecutionResult<Box<dyn ProcessChannel>>;
}

/// Spawns workers as child processes talking JSON lines over stdin/stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessSpawner;

impl ProcessSpawner for TokioProcessSpawner {
    fn spawn(
        &self,
        worker: WorkerId,
        spec: &SpawnSpec,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> ExecutionResult<Box<dyn ProcessChannel>> {
        debug!("Spawning {}: {} {:?}", worker, spec.program.display(), spec.args);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if spec.silent {
                Stdio::null()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true);

        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ExecutionError::SpawnError(format!("{}: {}", spec.program.display(), e))
        })?;

        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::SpawnError("Failed to get stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::SpawnError("Failed to get stdout".to_string()))?;

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(stdin_writer_task(worker, stdin, stdin_rx));
        tokio::spawn(supervisor_task(worker, child, stdout, signals, open.clone()));

        Ok(Box::new(ChildChannel {
            pid,
            stdin_tx: Some(stdin_tx),
            open,
        }))
    }
}

/// [`ProcessChannel`] over a child's piped stdin
struct ChildChannel {
    pid: Option<u32>,
    stdin_tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
    open: Arc<AtomicBool>,
}

impl ProcessChannel for ChildChannel {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send(&mut self, message: WorkerMessage) -> Result<(), IpcError> {
        if !self.is_open() {
            return Err(IpcError::NotConnected);
        }
        let stdin_tx = self.stdin_tx.as_ref().ok_or(IpcError::NotConnected)?;
        stdin_tx
            .send(message)
            .map_err(|_| IpcError::ConnectionClosed)
    }

    fn close(&mut self) {
        // Dropping the queue lets the writer flush what is already queued,
        // then close stdin so the worker sees end-of-stream.
        if self.stdin_tx.take().is_some() {
            debug!("Closing channel to process {:?}", self.pid);
        }
    }

    fn is_open(&self) -> bool {
        self.stdin_tx.is_some() && self.open.load(Ordering::SeqCst)
    }
}

/// Drain queued messages into the child's stdin
async fn stdin_writer_task(
    worker: WorkerId,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
) {
    while let Some(message) = rx.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode message for {}: {}", worker, e);
                continue;
            }
        };

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            // Broken pipes are expected while a worker is going away
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                debug!("{} stdin closed (worker likely terminated)", worker);
            } else {
                error!("Failed to write to {} stdin: {}", worker, e);
            }
            break;
        }
    }

    debug!("{} stdin writer finished", worker);
}

/// Forward the child's stdout as signals, then wait for it to exit
async fn supervisor_task(
    worker: WorkerId,
    mut child: Child,
    stdout: ChildStdout,
    signals: mpsc::UnboundedSender<WorkerSignal>,
    open: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line::<CoordinatorMessage>(&line) {
                    Ok(message) => {
                        let _ = signals.send(WorkerSignal::new(worker, ChannelEvent::Message(message)));
                    }
                    Err(e) => {
                        warn!("Failed to parse message from {}: {} - line: {}", worker, e, line);
                    }
                }
            }
            Ok(None) => {
                debug!("{} stdout closed", worker);
                break;
            }
            Err(e) => {
                error!("Failed to read from {} stdout: {}", worker, e);
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    let _ = signals.send(WorkerSignal::new(worker, ChannelEvent::Closed));

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait for {}: {}", worker, e);
            None
        }
    };
    debug!("{} exited with code {:?}", worker, code);
    let _ = signals.send(WorkerSignal::new(worker, ChannelEvent::Exited(code)));
}
