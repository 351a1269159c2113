//! Worker pool configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How each worker process is launched
    #[serde(default)]
    pub worker: WorkerEntryConfig,

    /// Number of worker processes the pool grows to on start
    #[serde(default = "default_size")]
    pub size: usize,

    /// Start the workers as soon as the pool is created
    #[serde(default = "crate::domains::default_false")]
    pub auto_start: bool,
}

/// Launch parameters for a worker process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerEntryConfig {
    /// Worker executable
    pub program: PathBuf,

    /// Arguments passed to the worker executable
    pub args: Vec<String>,

    /// Extra environment variables for the worker
    pub env: BTreeMap<String, String>,

    /// Working directory of the worker
    pub current_dir: Option<PathBuf>,

    /// Discard the worker's stderr instead of inheriting it
    #[serde(default = "crate::domains::default_false")]
    pub silent: bool,
}

impl PoolConfig {
    /// Pool of `size` workers running `program`
    pub fn new(program: impl Into<PathBuf>, size: usize) -> Self {
        Self {
            worker: WorkerEntryConfig {
                program: program.into(),
                ..Default::default()
            },
            size,
            auto_start: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.worker.silent = silent;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker: WorkerEntryConfig::default(),
            size: default_size(),
            auto_start: false,
        }
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        // The path is only checked for presence; the worker program is
        // resolved by the OS at spawn time.
        if self.worker.program.as_os_str().is_empty() {
            return Err(self.validation_error("Expecting a path for the workers module"));
        }

        if self.size == 0 {
            return Err(self.validation_error(
                "Expecting an integer>0 for the number of workers to be associated with this pool",
            ));
        }

        for name in self.worker.env.keys() {
            validate_required_string(name, "worker.env variable name", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool"
    }
}

fn default_size() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert!(config.size >= 1);
        assert!(!config.auto_start);
        assert!(!config.worker.silent);
        assert!(config.worker.args.is_empty());
    }

    #[test]
    fn test_missing_program_is_rejected() {
        let config = PoolConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("Expecting a path for the workers module"));
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let config = PoolConfig::new("worker-bin", 0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Expecting an integer>0"));
    }

    #[test]
    fn test_builder_helpers() {
        let config = PoolConfig::new("worker-bin", 3)
            .with_args(["worker", "--mode", "echo"])
            .with_auto_start(true)
            .with_silent(true);

        assert!(config.validate().is_ok());
        assert_eq!(config.size, 3);
        assert_eq!(config.worker.args, vec!["worker", "--mode", "echo"]);
        assert!(config.auto_start);
        assert!(config.worker.silent);
    }

    #[test]
    fn test_blank_env_name_is_rejected() {
        let mut config = PoolConfig::new("worker-bin", 1);
        config.worker.env.insert(" ".to_string(), "x".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker.env variable name cannot be empty"));
    }
}
