//! forkpool execution engine
//!
//! Coordinator side of a pool of worker processes:
//!
//! - [`process`]: the spawn boundary ([`ProcessSpawner`], [`ProcessChannel`]) and
//!   its tokio implementation
//! - [`worker`]: the per-process [`WorkerHandle`] state machine
//! - [`dispatch`]: job queue, dispatch and resolution logic
//! - [`pool`]: the [`Pool`] handle applications talk to
//! - [`status`]: point-in-time counters

pub mod dispatch;
pub mod error;
pub mod job;
pub mod pool;
pub mod process;
pub mod status;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use error::{ExecutionError, ExecutionResult};
pub use job::{FailureCallback, Job, JobId, Requeue, SuccessCallback};
pub use pool::{Pool, PoolEvent, PoolEvents};
pub use process::{
    ChannelEvent, ProcessChannel, ProcessSpawner, SpawnSpec, TokioProcessSpawner, WorkerSignal,
};
pub use status::{JobCounts, PoolStatus, WorkerCounts};
pub use worker::{WorkerHandle, WorkerId, WorkerInfo, WorkerNotification, WorkerState};
