//! Worker runtime for forkpool
//!
//! Runs inside each worker process: announces readiness to the coordinator,
//! turns incoming job messages into calls to a user supplied [`Processor`]
//! and sends each outcome back as a result or error message.

pub mod error;
pub mod processor;
pub mod worker;

pub use error::RuntimeError;
pub use processor::{processor_fn, FnProcessor, Processor};
pub use worker::{worker_main, WorkerRuntime, WorkerStats};
