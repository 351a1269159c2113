//! CLI command implementations

pub mod config;
pub mod run;
pub mod worker;

pub use config::*;
pub use run::*;
pub use worker::*;
