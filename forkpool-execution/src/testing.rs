//! In-memory process doubles for unit tests

use forkpool_ipc::{CoordinatorMessage, IpcError, WorkerMessage};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::{ExecutionError, ExecutionResult};
use crate::process::{ChannelEvent, ProcessChannel, ProcessSpawner, SpawnSpec, WorkerSignal};
use crate::worker::WorkerId;

/// Channel that records what the coordinator sends
#[derive(Clone)]
pub(crate) struct FakeChannel {
    pid: u32,
    sent: Arc<Mutex<Vec<WorkerMessage>>>,
    open: Arc<AtomicBool>,
    close_requested: Arc<AtomicBool>,
}

impl FakeChannel {
    pub(crate) fn new(pid: u32) -> Self {
        Self {
            pid,
            sent: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicBool::new(true)),
            close_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn sent(&self) -> Vec<WorkerMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

impl ProcessChannel for FakeChannel {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn send(&mut self, message: WorkerMessage) -> Result<(), IpcError> {
        if !self.is_open() {
            return Err(IpcError::NotConnected);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&mut self) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// A process started by [`FakeSpawner`]
///
/// Builds the signals its real counterpart would produce, and can push them
/// straight into the pool's signal queue.
#[derive(Clone)]
pub(crate) struct FakeProcess {
    pub(crate) worker: WorkerId,
    pub(crate) channel: FakeChannel,
    signals: mpsc::UnboundedSender<WorkerSignal>,
}

impl FakeProcess {
    pub(crate) fn pid(&self) -> u32 {
        self.channel.pid
    }

    pub(crate) fn ready(&self) -> WorkerSignal {
        self.message(CoordinatorMessage::ready(self.pid()))
    }

    pub(crate) fn reply(&self, payload: JsonValue) -> WorkerSignal {
        self.message(CoordinatorMessage::data(self.pid(), payload))
    }

    pub(crate) fn fail(&self, payload: JsonValue) -> WorkerSignal {
        self.message(CoordinatorMessage::error(self.pid(), payload))
    }

    pub(crate) fn closed(&self) -> WorkerSignal {
        WorkerSignal::new(self.worker, ChannelEvent::Closed)
    }

    pub(crate) fn exited(&self, code: Option<i32>) -> WorkerSignal {
        WorkerSignal::new(self.worker, ChannelEvent::Exited(code))
    }

    /// Deliver a signal through the pool's own queue
    pub(crate) fn emit(&self, signal: WorkerSignal) {
        self.signals.send(signal).unwrap();
    }

    /// Payloads the coordinator has sent to this process
    pub(crate) fn payloads(&self) -> Vec<JsonValue> {
        self.channel
            .sent()
            .into_iter()
            .map(|WorkerMessage::Data { payload }| payload)
            .collect()
    }

    fn message(&self, message: CoordinatorMessage) -> WorkerSignal {
        WorkerSignal::new(self.worker, ChannelEvent::Message(message))
    }
}

/// Spawner that starts nothing and remembers every spawn request
#[derive(Default)]
pub(crate) struct FakeSpawner {
    processes: Mutex<Vec<FakeProcess>>,
    next_pid: AtomicU32,
    fail: AtomicBool,
}

impl FakeSpawner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        })
    }

    /// Make subsequent spawns fail
    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn processes(&self) -> Vec<FakeProcess> {
        self.processes.lock().unwrap().clone()
    }

    pub(crate) fn process(&self, index: usize) -> FakeProcess {
        self.processes.lock().unwrap()[index].clone()
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(
        &self,
        worker: WorkerId,
        _spec: &SpawnSpec,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> ExecutionResult<Box<dyn ProcessChannel>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExecutionError::SpawnError("spawn disabled".to_string()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let channel = FakeChannel::new(pid);
        self.processes.lock().unwrap().push(FakeProcess {
            worker,
            channel: channel.clone(),
            signals,
        });
        Ok(Box::new(channel))
    }
}
