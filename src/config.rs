//! Configuration management for RustyStats
//!
//! This module handles loading and validating configuration from a JSON
//! file and `RUSTYSTATS_*` environment variable overrides.

use crate::error::{Result, RustyStatsError};
use crate::metrics::HistogramRule;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Main configuration structure for the RustyStats daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub flush: FlushConfig,
    pub metrics: MetricsConfig,
    pub sink: SinkConfig,
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    pub max_connections: usize,
    pub tcp_nodelay: bool,
}

/// Flush scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Seconds between rotations of the metrics table
    pub interval_secs: u64,
}

/// Aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Target rank error for the timer quantile sketch, in (0, 1)
    pub timer_eps: f64,
    /// HyperLogLog precision (number of index bits), 4..=18
    pub set_precision: u8,
    /// If set, every accepted sample increments this counter in the current table
    pub input_counter: Option<String>,
    /// Histogram rules matched against metric names by longest prefix
    pub histograms: Vec<HistogramRule>,
}

/// Downstream sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Shell command receiving serialized flushes on stdin
    pub stream_cmd: String,
    /// Emit the packed binary format instead of text lines
    pub binary_stream: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file_path: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8125,
            bind_address: "127.0.0.1".to_string(),
            max_connections: 10000,
            tcp_nodelay: true,
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            timer_eps: 0.01,
            set_precision: 12,
            input_counter: None,
            histograms: Vec::new(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            stream_cmd: "cat".to_string(),
            binary_stream: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the file named by
    /// `RUSTYSTATS_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match env::var("RUSTYSTATS_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Config::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit JSON file, then environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RustyStatsError::ConfigError {
            message: format!("Failed to read config file {}: {}", path.display(), e),
            config_key: None,
        })?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(port) = parse_env("RUSTYSTATS_SERVER_PORT")? {
            self.server.port = port;
        }
        if let Ok(addr) = env::var("RUSTYSTATS_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(max) = parse_env("RUSTYSTATS_SERVER_MAX_CONNECTIONS")? {
            self.server.max_connections = max;
        }
        if let Some(interval) = parse_env("RUSTYSTATS_FLUSH_INTERVAL_SECS")? {
            self.flush.interval_secs = interval;
        }
        if let Some(eps) = parse_env("RUSTYSTATS_METRICS_TIMER_EPS")? {
            self.metrics.timer_eps = eps;
        }
        if let Some(precision) = parse_env("RUSTYSTATS_METRICS_SET_PRECISION")? {
            self.metrics.set_precision = precision;
        }
        if let Ok(counter) = env::var("RUSTYSTATS_METRICS_INPUT_COUNTER") {
            self.metrics.input_counter = Some(counter);
        }
        if let Ok(cmd) = env::var("RUSTYSTATS_SINK_STREAM_CMD") {
            self.sink.stream_cmd = cmd;
        }
        if let Some(binary) = parse_env("RUSTYSTATS_SINK_BINARY_STREAM")? {
            self.sink.binary_stream = binary;
        }
        if let Ok(level) = env::var("RUSTYSTATS_LOGGING_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate the configuration, rejecting values the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.is_empty() {
            return Err(config_error("bind address must not be empty", "server.bind_address"));
        }
        if self.flush.interval_secs == 0 {
            return Err(config_error(
                "flush interval must be at least one second",
                "flush.interval_secs",
            ));
        }
        if !(self.metrics.timer_eps > 0.0 && self.metrics.timer_eps < 1.0) {
            return Err(config_error(
                "timer_eps must be in (0, 1)",
                "metrics.timer_eps",
            ));
        }
        if !(4..=18).contains(&self.metrics.set_precision) {
            return Err(config_error(
                "set_precision must be in 4..=18",
                "metrics.set_precision",
            ));
        }
        if let Some(counter) = &self.metrics.input_counter {
            if counter.is_empty() {
                return Err(config_error(
                    "input_counter must not be empty when set",
                    "metrics.input_counter",
                ));
            }
        }
        for rule in &self.metrics.histograms {
            rule.validate()?;
        }
        if self.sink.stream_cmd.is_empty() {
            return Err(config_error("stream_cmd must not be empty", "sink.stream_cmd"));
        }
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(RustyStatsError::ConfigError {
                    message: format!("Invalid log level: {}", other),
                    config_key: Some("logging.level".to_string()),
                });
            }
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> RustyStatsError {
    RustyStatsError::ConfigError {
        message: message.to_string(),
        config_key: Some(key.to_string()),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| RustyStatsError::ConfigError {
                message: format!("Invalid value for {}: {}", name, raw),
                config_key: Some(name.to_string()),
            }),
        Err(_) => Ok(None),
    }
}
