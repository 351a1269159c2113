//! Inter-process communication for forkpool
//!
//! This crate provides the message protocol and line-delimited JSON transport
//! used between the pool coordinator and its worker processes.

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{CoordinatorMessage, MessageKind, WorkerMessage};
pub use transport::{decode_line, encode_line, IpcTransport, LineTransport, StdioTransport};
