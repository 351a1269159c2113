//! Logging initialisation for forkpool
//!
//! Both coordinator and worker processes write logs to stderr. Inside a
//! worker, stdout carries the IPC channel and must never see log lines.
//! `log` records from the library crates are bridged into `tracing`.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
