//! Structured logging infrastructure for RustyStats
//!
//! Sets up the tracing subscriber from the logging section of the
//! configuration: level filtering, json/pretty/compact output, console
//! or file writer.

use crate::config::{Config, LogFormat};
use crate::error::{Result, RustyStatsError};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Logging system manager
#[derive(Debug)]
pub struct LoggingSystem {
    config: Config,
}

impl LoggingSystem {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Install the tracing subscriber
    pub fn initialize(&self) -> Result<()> {
        let level = parse_log_level(&self.config.logging.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let file = match &self.config.logging.file_path {
            Some(path) => Some(open_log_file(path)?),
            None => None,
        };

        let try_init_result = match (&self.config.logging.format, file) {
            (LogFormat::Json, Some(file)) => Registry::default()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(file)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .try_init(),
            (LogFormat::Json, None) => Registry::default()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .try_init(),
            (LogFormat::Pretty, Some(file)) => Registry::default()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_writer(file)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(true),
                )
                .try_init(),
            (LogFormat::Pretty, None) => Registry::default()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(true),
                )
                .try_init(),
            (LogFormat::Compact, Some(file)) => Registry::default()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_writer(file)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(false),
                )
                .try_init(),
            (LogFormat::Compact, None) => Registry::default()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_target(false),
                )
                .try_init(),
        };

        if let Err(e) = try_init_result {
            warn!(
                "Failed to initialize tracing subscriber (may already be set): {}",
                e
            );
        }

        info!(
            level = %self.config.logging.level,
            "logging initialized"
        );
        Ok(())
    }
}

fn open_log_file(path: &Path) -> Result<Arc<std::fs::File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RustyStatsError::InternalError {
            message: format!("Failed to create log directory: {}", e),
            component: Some("logging".to_string()),
        })?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RustyStatsError::InternalError {
            message: format!("Failed to open log file: {}", e),
            component: Some("logging".to_string()),
        })?;
    Ok(Arc::new(file))
}

/// Parse a log level string to a tracing Level
pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(RustyStatsError::ConfigError {
            message: format!("Invalid log level: {}", level_str),
            config_key: Some("logging.level".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("server.log");
        assert!(open_log_file(&path).is_ok());
        assert!(path.exists());
    }
}
