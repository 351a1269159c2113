//! Error types for pool execution

use thiserror::Error;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Pool execution errors
///
/// Only synchronous failures surface here. Job and worker outcomes are
/// delivered through callbacks and [`crate::PoolEvent`]s instead.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to spawn worker process: {0}")]
    SpawnError(String),

    #[error("Pool orchestrator is no longer running")]
    PoolClosed,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IPC error: {0}")]
    IpcError(#[from] forkpool_ipc::IpcError),
}

impl From<forkpool_config::ConfigError> for ExecutionError {
    fn from(err: forkpool_config::ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}
