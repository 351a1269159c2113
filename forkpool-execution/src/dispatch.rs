//! Job dispatch and resolution
//!
//! [`PoolCore`] is the orchestrator's state. It is owned by a single task
//! (see [`crate::pool`]) and every method runs to completion before the next
//! command or signal is looked at, so the bookkeeping below never observes a
//! half-applied change.
//!
//! Workers live in two collections. `handles` holds every process that has
//! not exited yet. `members` is the pool's worker set; a worker leaves it as
//! soon as it is released or lost. A released worker that still holds a job
//! stays in `assigned` until its result arrives or its channel closes.
//!
//! The core only holds a weak reference to the command queue. Once every
//! [`Pool`] handle is gone the orchestrator stops.

use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ExecutionResult;
use crate::job::{Job, Requeue};
use crate::pool::{Pool, PoolCommand, PoolEvent};
use crate::process::{ProcessSpawner, SpawnSpec, WorkerSignal};
use crate::status::{snapshot, PoolStatus};
use crate::worker::{WorkerHandle, WorkerId, WorkerInfo, WorkerNotification};

pub(crate) struct PoolCore {
    size: usize,
    spec: SpawnSpec,
    spawner: Arc<dyn ProcessSpawner>,
    /// Upgraded into the handle passed to job callbacks
    commands: mpsc::WeakUnboundedSender<PoolCommand>,
    events: mpsc::UnboundedSender<PoolEvent>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
    next_worker: u64,

    pub(crate) handles: HashMap<WorkerId, WorkerHandle>,
    pub(crate) members: BTreeSet<WorkerId>,
    pub(crate) idle: VecDeque<WorkerId>,
    pub(crate) assigned: HashMap<WorkerId, Job>,
    pub(crate) pending: VecDeque<Job>,
    pub(crate) processed: u64,
    pub(crate) failed: u64,
}

impl PoolCore {
    pub(crate) fn new(
        size: usize,
        spec: SpawnSpec,
        spawner: Arc<dyn ProcessSpawner>,
        commands: mpsc::WeakUnboundedSender<PoolCommand>,
        events: mpsc::UnboundedSender<PoolEvent>,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> Self {
        Self {
            size,
            spec,
            spawner,
            commands,
            events,
            signals,
            next_worker: 1,
            handles: HashMap::new(),
            members: BTreeSet::new(),
            idle: VecDeque::new(),
            assigned: HashMap::new(),
            pending: VecDeque::new(),
            processed: 0,
            failed: 0,
        }
    }

    pub(crate) fn handle_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Submit(job) => self.submit(job),
            PoolCommand::Requeue(job) => self.requeue(job),
            PoolCommand::Start(reply) => {
                let result = self.start();
                if let Err(e) = &result {
                    error!("Failed to start workers: {}", e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            PoolCommand::ReleaseIdle(count, reply) => {
                let released = self.release_idle(count);
                let _ = reply.send(released);
            }
            PoolCommand::ReleaseAll(reply) => {
                self.release_all();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            PoolCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            PoolCommand::Workers(reply) => {
                let _ = reply.send(self.workers());
            }
            PoolCommand::Shutdown(reply) => {
                self.release_all();
                let _ = reply.send(());
            }
        }
    }

    /// Grow the worker set to the configured size
    ///
    /// Returns how many workers were spawned. Calling it on a full pool does
    /// nothing; after releases it tops the set back up.
    pub(crate) fn start(&mut self) -> ExecutionResult<usize> {
        let mut spawned = 0;

        while self.members.len() < self.size {
            let id = WorkerId::new(self.next_worker);
            self.next_worker += 1;

            let handle =
                WorkerHandle::spawn(id, &self.spec, self.spawner.as_ref(), self.signals.clone())?;
            info!("Spawned {} (pid {:?})", id, handle.pid());

            self.handles.insert(id, handle);
            self.members.insert(id);
            spawned += 1;
        }

        if spawned > 0 {
            debug!("Pool started {} workers, {} in set", spawned, self.members.len());
        }
        Ok(spawned)
    }

    pub(crate) fn submit(&mut self, job: Job) {
        debug!("Queued job {}", job.id());
        self.pending.push_back(job);
        self.dispatch();
    }

    pub(crate) fn requeue(&mut self, job: Job) {
        debug!("Requeued job {} after {} attempts", job.id(), job.attempts());
        self.pending.push_back(job);
        self.dispatch();
    }

    /// Release up to `count` idle workers, all of them if `None`
    pub(crate) fn release_idle(&mut self, count: Option<usize>) -> usize {
        let count = count.map_or(self.idle.len(), |n| n.min(self.idle.len()));

        for _ in 0..count {
            if let Some(id) = self.idle.pop_front() {
                self.members.remove(&id);
                if let Some(handle) = self.handles.get_mut(&id) {
                    handle.disconnect();
                }
                info!("Released idle {}", id);
            }
        }

        count
    }

    /// Release every worker in the set
    ///
    /// Every channel is closed. A busy worker's job resolves if its result
    /// was already on the way, otherwise it is requeued once the channel
    /// reports closed. Pending jobs stay queued until workers are started
    /// again.
    pub(crate) fn release_all(&mut self) {
        for id in std::mem::take(&mut self.members) {
            if let Some(handle) = self.handles.get_mut(&id) {
                handle.disconnect();
            }
        }
        self.idle.clear();
        info!("Released all workers");
    }

    pub(crate) fn status(&self) -> PoolStatus {
        snapshot(self)
    }

    pub(crate) fn workers(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<_> = self.handles.values().map(WorkerHandle::info).collect();
        workers.sort_by_key(|info| info.id);
        workers
    }

    pub(crate) fn handle_signal(&mut self, signal: WorkerSignal) {
        let id = signal.worker;
        let Some(handle) = self.handles.get_mut(&id) else {
            debug!("Signal for unknown {}: {:?}", id, signal.event);
            return;
        };

        let Some(notification) = handle.on_event(signal.event) else {
            return;
        };

        match notification {
            WorkerNotification::Ready => self.on_ready(id),
            WorkerNotification::Result(output) => self.on_result(id, output),
            WorkerNotification::Error(error) => self.on_error(id, error),
            WorkerNotification::Disconnected => {
                debug!("{} disconnected", id);
                self.lose_worker(id);
                self.emit(PoolEvent::Disconnected { worker: id });
            }
            WorkerNotification::Exited(code) => {
                if code.unwrap_or(0) != 0 {
                    warn!("{} exited with code {:?}", id, code);
                } else {
                    debug!("{} exited with code {:?}", id, code);
                }
                self.lose_worker(id);
                self.handles.remove(&id);
                self.emit(PoolEvent::Exit { worker: id, code });
            }
        }
    }

    fn on_ready(&mut self, id: WorkerId) {
        if !self.members.contains(&id) {
            // Released workers never report ready, but be safe about it
            if let Some(handle) = self.handles.get_mut(&id) {
                handle.disconnect();
            }
            return;
        }

        debug!("{} is ready", id);
        self.idle.push_back(id);
        self.emit(PoolEvent::Started { worker: id });
        self.dispatch();
    }

    fn on_result(&mut self, id: WorkerId, output: JsonValue) {
        self.processed += 1;
        let job = self.assigned.remove(&id);
        self.return_to_idle(id);

        match job {
            Some(job) => {
                debug!("Job {} completed on {}", job.id(), id);
                match (&job.on_success, self.callback_pool()) {
                    (Some(callback), Some(pool)) => callback(&pool, job.payload(), &output),
                    _ => self.emit(PoolEvent::Data {
                        input: job.payload().clone(),
                        output,
                    }),
                }
            }
            None => warn!("{} returned a result without an assigned job", id),
        }

        self.dispatch();
    }

    fn on_error(&mut self, id: WorkerId, error: JsonValue) {
        self.failed += 1;
        let job = self.assigned.remove(&id);
        self.return_to_idle(id);

        match job {
            Some(job) => {
                debug!("Job {} failed on {}: {}", job.id(), id, error);
                match (job.on_failure.clone(), self.callback_pool()) {
                    (Some(callback), Some(pool)) => {
                        let input = job.payload().clone();
                        let requeue = Requeue::new(job, pool.clone());
                        callback(&pool, &error, &input, requeue);
                    }
                    _ => self.emit(PoolEvent::Error {
                        error,
                        input: job.payload().clone(),
                    }),
                }
            }
            None => warn!("{} returned an error without an assigned job", id),
        }

        self.dispatch();
    }

    /// Put a worker that just answered back in the idle queue
    fn return_to_idle(&mut self, id: WorkerId) {
        let idle = self.handles.get(&id).map_or(false, WorkerHandle::is_idle);
        if idle && self.members.contains(&id) && !self.idle.contains(&id) {
            self.idle.push_back(id);
        }
    }

    /// Forget a worker whose channel or process is gone
    ///
    /// A job it was holding goes back to the end of the pending queue.
    fn lose_worker(&mut self, id: WorkerId) {
        self.members.remove(&id);
        self.idle.retain(|idle| *idle != id);

        if let Some(job) = self.assigned.remove(&id) {
            info!("Requeueing job {} from lost {}", job.id(), id);
            self.pending.push_back(job);
        }

        self.dispatch();
    }

    /// Pair pending jobs with idle workers, oldest first on both sides
    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let Some(id) = self.idle.pop_front() else {
                break;
            };
            let Some(handle) = self.handles.get_mut(&id) else {
                continue;
            };
            let Some(mut job) = self.pending.pop_front() else {
                break;
            };

            if handle.send(job.payload().clone()) {
                job.record_attempt();
                debug!("Assigned job {} to {}", job.id(), id);
                self.assigned.insert(id, job);
            } else {
                warn!("Could not hand job {} to {}, dropping it from the pool", job.id(), id);
                self.members.remove(&id);
                handle.disconnect();
                self.pending.push_front(job);
            }
        }
    }

    /// Handle for callbacks, `None` once every user handle is gone
    fn callback_pool(&self) -> Option<Pool> {
        self.commands.upgrade().map(Pool::from_sender)
    }

    fn emit(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }
}
