use anyhow::Result;
use forkpool_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Build an env filter from an explicit level, falling back to `RUST_LOG`, then `info`
pub fn build_env_filter(log_level: Option<&str>) -> EnvFilter {
    log_level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialize simple tracing for basic stderr output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_env_filter(Some(log_level));

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize logging from configuration
///
/// `override_level` takes precedence over the configured level (used for the
/// `--log-level` command line flag).
pub fn init_logging_from_config(
    config: &LoggingConfig,
    override_level: Option<&str>,
) -> Result<()> {
    let level = override_level
        .map(str::to_string)
        .unwrap_or_else(|| config.level.to_string());
    let env_filter = build_env_filter(Some(&level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_wins() {
        let filter = build_env_filter(Some("debug"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_invalid_level_falls_back() {
        // An unparsable directive never panics; it falls back to RUST_LOG or info.
        let filter = build_env_filter(Some("[[not a filter"));
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_double_init_is_harmless() {
        let config = LoggingConfig::default();
        assert!(init_logging_from_config(&config, Some("warn")).is_ok());
        assert!(init_simple_tracing("info").is_ok());
    }
}
