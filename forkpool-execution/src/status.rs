//! Pool status snapshot

use serde::{Deserialize, Serialize};

use crate::dispatch::PoolCore;

/// Point-in-time counters for a pool
///
/// Spawned workers count towards `workers.created` before they are ready,
/// so `created == starting + idle + busy` rather than `idle + busy`. The two
/// agree once every worker has announced `ready`. Released workers, and
/// workers whose channel failed, are no longer counted even while their
/// process is still exiting. `jobs.assigned + jobs.pending` is the number of
/// unresolved jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub workers: WorkerCounts,
    pub jobs: JobCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    /// Workers in the pool's set
    pub created: usize,
    /// Spawned but not yet ready
    pub starting: usize,
    pub idle: usize,
    pub busy: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Results received over the pool's lifetime
    pub processed: u64,
    /// Errors received over the pool's lifetime
    pub failed: u64,
    /// Jobs currently held by a worker
    pub assigned: usize,
    /// Jobs waiting for a worker
    pub pending: usize,
}

impl PoolStatus {
    /// Jobs submitted but not yet resolved
    pub fn outstanding(&self) -> usize {
        self.jobs.assigned + self.jobs.pending
    }

    /// No jobs left and no worker busy
    pub fn is_drained(&self) -> bool {
        self.outstanding() == 0 && self.workers.busy == 0
    }
}

/// Derive a status snapshot from the orchestrator's state
pub(crate) fn snapshot(core: &PoolCore) -> PoolStatus {
    let busy = core
        .members
        .iter()
        .filter(|id| core.assigned.contains_key(id))
        .count();
    let idle = core.idle.len();
    let created = core.members.len();

    PoolStatus {
        workers: WorkerCounts {
            created,
            starting: created.saturating_sub(idle + busy),
            idle,
            busy,
        },
        jobs: JobCounts {
            processed: core.processed,
            failed: core.failed,
            assigned: core.assigned.len(),
            pending: core.pending.len(),
        },
    }
}
