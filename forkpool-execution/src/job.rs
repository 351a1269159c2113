//! Jobs and their completion callbacks

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::pool::Pool;

/// Unique identifier of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Called with `(pool, input, output)` when a worker returns a result
pub type SuccessCallback = Arc<dyn Fn(&Pool, &JsonValue, &JsonValue) + Send + Sync>;

/// Called with `(pool, error, input, requeue)` when a worker reports an error
pub type FailureCallback = Arc<dyn Fn(&Pool, &JsonValue, &JsonValue, Requeue) + Send + Sync>;

/// A unit of work: one input payload plus optional callbacks
///
/// Without callbacks, outcomes are reported as [`crate::PoolEvent`]s.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    payload: JsonValue,
    attempts: u32,
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_failure: Option<FailureCallback>,
}

impl Job {
    pub fn new(payload: JsonValue) -> Self {
        Self {
            id: JobId::new(),
            payload,
            attempts: 0,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Pool, &JsonValue, &JsonValue) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Pool, &JsonValue, &JsonValue, Requeue) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Number of times this job has been handed to a worker
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("attempts", &self.attempts)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// One-shot permission to put a failed job back in the queue
///
/// Handed to failure callbacks. Dropping it without calling
/// [`Requeue::requeue`] abandons the job.
pub struct Requeue {
    job: Option<Job>,
    pool: Pool,
}

impl Requeue {
    pub(crate) fn new(job: Job, pool: Pool) -> Self {
        Self {
            job: Some(job),
            pool,
        }
    }

    /// Append the job to the pending queue with its callbacks intact
    ///
    /// Only the first call does anything; it returns `true` if the pool
    /// accepted the job.
    pub fn requeue(&mut self) -> bool {
        match self.job.take() {
            Some(job) => self.pool.requeue(job),
            None => false,
        }
    }

    /// Attempts made so far for the failed job
    pub fn attempts(&self) -> Option<u32> {
        self.job.as_ref().map(Job::attempts)
    }

    pub fn is_spent(&self) -> bool {
        self.job.is_none()
    }
}

impl fmt::Debug for Requeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requeue").field("job", &self.job).finish()
    }
}
