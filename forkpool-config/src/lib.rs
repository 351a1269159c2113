//! Configuration management for forkpool
//!
//! Configuration is split by domain (`pool`, `logging`), loaded from YAML
//! with environment variable overrides, and validated before it reaches the
//! pool orchestrator.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    pool::{PoolConfig, WorkerEntryConfig},
    ForkpoolConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;
