//! Coordinator-side view of one worker process
//!
//! A [`WorkerHandle`] owns the channel to its process and tracks where the
//! worker is in its lifecycle:
//!
//! ```text
//! Spawned --ready--> Idle <--result-- Busy
//!    |                 |  --send-->    |
//!    | disconnect      | disconnect    | disconnect
//!    v                 v               v
//! DisconnectRequested  Disconnecting { in_flight }
//!    \--ready--------->/
//!
//! any --closed--> Disconnected --exited--> Exited
//! ```
//!
//! Channel events are turned into at most one [`WorkerNotification`] each.
//! Duplicates and out-of-order messages are dropped here so the pool never
//! sees them.

use chrono::{DateTime, Utc};
use forkpool_ipc::{CoordinatorMessage, WorkerMessage};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ExecutionResult;
use crate::process::{ChannelEvent, ProcessChannel, ProcessSpawner, SpawnSpec, WorkerSignal};

/// Identity of a worker within one pool, assigned in spawn order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Process started, `ready` not yet received
    Spawned,
    /// Released before it announced `ready`; the channel closes once it does
    DisconnectRequested,
    /// Ready and waiting for a job
    Idle,
    /// Processing exactly one job
    Busy,
    /// Channel closing; `in_flight` while a job result is still expected
    Disconnecting { in_flight: bool },
    /// Channel closed, process may still be running
    Disconnected,
    /// Process terminated
    Exited(Option<i32>),
}

impl WorkerState {
    /// Whether the worker has announced `ready` and its channel is not yet gone
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            WorkerState::Idle | WorkerState::Busy | WorkerState::Disconnecting { .. }
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Spawned => write!(f, "spawned"),
            WorkerState::DisconnectRequested => write!(f, "disconnect_requested"),
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Busy => write!(f, "busy"),
            WorkerState::Disconnecting { in_flight: true } => write!(f, "disconnecting (in flight)"),
            WorkerState::Disconnecting { in_flight: false } => write!(f, "disconnecting"),
            WorkerState::Disconnected => write!(f, "disconnected"),
            WorkerState::Exited(Some(code)) => write!(f, "exited ({})", code),
            WorkerState::Exited(None) => write!(f, "exited (signal)"),
        }
    }
}

/// What the pool needs to hear about after a channel event
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerNotification {
    Ready,
    Result(JsonValue),
    Error(JsonValue),
    Disconnected,
    Exited(Option<i32>),
}

/// Diagnostic snapshot of a worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub spawned_at: DateTime<Utc>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// Handle to one worker process
pub struct WorkerHandle {
    id: WorkerId,
    pid: Option<u32>,
    state: WorkerState,
    channel: Option<Box<dyn ProcessChannel>>,
    spawned_at: DateTime<Utc>,
    jobs_completed: u64,
    jobs_failed: u64,
}

impl WorkerHandle {
    /// Launch a worker process through `spawner`
    pub fn spawn(
        id: WorkerId,
        spec: &SpawnSpec,
        spawner: &dyn ProcessSpawner,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> ExecutionResult<Self> {
        let channel = spawner.spawn(id, spec, signals)?;
        Ok(Self::new(id, channel))
    }

    /// Wrap an already started process
    pub fn new(id: WorkerId, channel: Box<dyn ProcessChannel>) -> Self {
        Self {
            id,
            pid: channel.pid(),
            state: WorkerState::Spawned,
            channel: Some(channel),
            spawned_at: Utc::now(),
            jobs_completed: 0,
            jobs_failed: 0,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            WorkerState::Busy | WorkerState::Disconnecting { in_flight: true }
        )
    }

    /// Channel open and `ready` received
    pub fn is_connected(&self) -> bool {
        self.state.is_ready() && self.channel.as_ref().map_or(false, |c| c.is_open())
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            pid: self.pid,
            state: self.state,
            spawned_at: self.spawned_at,
            jobs_completed: self.jobs_completed,
            jobs_failed: self.jobs_failed,
        }
    }

    /// Hand a job payload to an idle worker
    ///
    /// Returns `false` without side effects unless the worker is idle and its
    /// channel accepted the message.
    pub fn send(&mut self, payload: JsonValue) -> bool {
        if self.state != WorkerState::Idle {
            debug!("Not sending to {} in state {}", self.id, self.state);
            return false;
        }

        let Some(channel) = self.channel.as_mut().filter(|c| c.is_open()) else {
            debug!("Not sending to {}: channel closed", self.id);
            return false;
        };

        match channel.send(WorkerMessage::data(payload)) {
            Ok(()) => {
                self.state = WorkerState::Busy;
                true
            }
            Err(e) => {
                warn!("Failed to send job to {}: {}", self.id, e);
                false
            }
        }
    }

    /// Ask the worker to go away
    ///
    /// A connected worker's channel is closed at once. A busy worker's reply
    /// may still arrive before the channel reports closed and resolves its
    /// job as usual. A worker that has not announced `ready` yet is closed as
    /// soon as it does. Returns whether anything changed.
    pub fn disconnect(&mut self) -> bool {
        match self.state {
            WorkerState::Spawned => {
                self.state = WorkerState::DisconnectRequested;
                true
            }
            WorkerState::Idle => {
                self.state = WorkerState::Disconnecting { in_flight: false };
                self.close_channel();
                true
            }
            WorkerState::Busy => {
                self.state = WorkerState::Disconnecting { in_flight: true };
                self.close_channel();
                true
            }
            _ => false,
        }
    }

    /// Apply a channel event, returning what the pool should be told
    pub fn on_event(&mut self, event: ChannelEvent) -> Option<WorkerNotification> {
        match event {
            ChannelEvent::Message(message) => self.on_message(message),
            ChannelEvent::Closed => match self.state {
                WorkerState::Disconnected | WorkerState::Exited(_) => None,
                _ => {
                    self.state = WorkerState::Disconnected;
                    self.close_channel();
                    Some(WorkerNotification::Disconnected)
                }
            },
            ChannelEvent::Exited(code) => match self.state {
                WorkerState::Exited(_) => None,
                _ => {
                    self.state = WorkerState::Exited(code);
                    self.channel = None;
                    Some(WorkerNotification::Exited(code))
                }
            },
        }
    }

    fn on_message(&mut self, message: CoordinatorMessage) -> Option<WorkerNotification> {
        if let Some(pid) = self.pid {
            if pid != message.worker_id() {
                warn!(
                    "{} (pid {}) sent {} claiming pid {}",
                    self.id,
                    pid,
                    message.kind(),
                    message.worker_id()
                );
            }
        }

        match message {
            CoordinatorMessage::Ready { .. } => match self.state {
                WorkerState::Spawned => {
                    self.state = WorkerState::Idle;
                    Some(WorkerNotification::Ready)
                }
                WorkerState::DisconnectRequested => {
                    debug!("{} became ready after release, closing", self.id);
                    self.state = WorkerState::Disconnecting { in_flight: false };
                    self.close_channel();
                    None
                }
                _ => {
                    debug!("Ignoring duplicate ready from {}", self.id);
                    None
                }
            },
            CoordinatorMessage::Data { payload, .. } => {
                if self.finish_job() {
                    self.jobs_completed += 1;
                    Some(WorkerNotification::Result(payload))
                } else {
                    warn!("Ignoring result from {} in state {}", self.id, self.state);
                    None
                }
            }
            CoordinatorMessage::Error { payload, .. } => {
                if self.finish_job() {
                    self.jobs_failed += 1;
                    Some(WorkerNotification::Error(payload))
                } else {
                    warn!("Ignoring error from {} in state {}", self.id, self.state);
                    None
                }
            }
        }
    }

    /// Leave the busy state after a reply
    fn finish_job(&mut self) -> bool {
        match self.state {
            WorkerState::Busy => {
                self.state = WorkerState::Idle;
                true
            }
            WorkerState::Disconnecting { in_flight: true } => {
                self.state = WorkerState::Disconnecting { in_flight: false };
                self.close_channel();
                true
            }
            _ => false,
        }
    }

    fn close_channel(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .finish()
    }
}
