//! Configuration loading and environment variable handling

use std::path::Path;
use std::str::FromStr;

use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::pool::PoolConfig;
use crate::domains::ForkpoolConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "FORKPOOL".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ForkpoolConfig> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let mut config: ForkpoolConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ForkpoolConfig> {
        let mut config = ForkpoolConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ForkpoolConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Like [`ConfigLoader::load`] but without validation
    ///
    /// For callers that fill in defaults of their own before validating.
    pub fn read(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ForkpoolConfig> {
        let mut config = match config_path {
            Some(path) => {
                let path = path.as_ref();
                log::debug!("Reading configuration from {}", path.display());
                serde_yaml::from_str(&std::fs::read_to_string(path)?)?
            }
            None => ForkpoolConfig::default(),
        };
        self.apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ForkpoolConfig) -> ConfigResult<()> {
        self.apply_pool_overrides(&mut config.pool)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_pool_overrides(&self, config: &mut PoolConfig) -> ConfigResult<()> {
        if let Ok(size) = self.get_env_var("POOL_SIZE") {
            config.size = self.parse_var("POOL_SIZE", &size)?;
        }

        if let Ok(auto_start) = self.get_env_var("AUTO_START") {
            config.auto_start = self.parse_var("AUTO_START", &auto_start)?;
        }

        if let Ok(program) = self.get_env_var("WORKER_PROGRAM") {
            config.worker.program = program.into();
        }

        if let Ok(silent) = self.get_env_var("WORKER_SILENT") {
            config.worker.silent = self.parse_var("WORKER_SILENT", &silent)?;
        }

        Ok(())
    }

    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn parse_var<T>(&self, name: &str, value: &str) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        value
            .trim()
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {}_{}: {}", self.prefix, name, e)))
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
