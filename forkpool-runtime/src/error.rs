//! Runtime error types

use forkpool_ipc::IpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}
