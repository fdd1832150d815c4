//! Error types and handling for RustyStats
//!
//! This module defines all error types used throughout the daemon and
//! provides severity/category metadata used to pick log levels and to
//! decide whether an error should close the offending connection.

use thiserror::Error;
use tracing::{debug, error, warn};

/// Error severity levels for logging decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The daemon itself is in a bad state (internal invariants broken)
    Critical,
    /// Flush output was lost or the listener could not be set up; ingest
    /// on healthy connections keeps running
    High,
    /// Scoped to a single connection, which is closed and re-established
    /// by the client
    Medium,
    /// Expected in normal operation, such as a malformed sample from a
    /// misbehaving client
    Low,
}

/// Error categories for routing and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Wire-protocol errors (malformed lines, bad frames)
    Protocol,
    /// Network-related errors (bind failures, connection issues)
    Network,
    /// Configuration-related errors
    Configuration,
    /// Errors on the downstream flush sink
    Sink,
    /// Internal system errors
    System,
}

/// Main error type for RustyStats operations
#[derive(Debug, Error)]
pub enum RustyStatsError {
    #[error("Parse error: {message}")]
    ParseError {
        message: String,
        input: Option<String>,
    },

    #[error("Framing error: {message}")]
    FramingError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
        config_key: Option<String>,
    },

    #[error("Sink error: {message}")]
    SinkError {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        connection_id: Option<String>,
    },

    #[error("Connection error: {message}")]
    ConnectionError {
        message: String,
        connection_id: Option<String>,
    },

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        component: Option<String>,
    },
}

pub type Result<T> = std::result::Result<T, RustyStatsError>;

impl RustyStatsError {
    /// Get the error severity level for logging decisions
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RustyStatsError::ParseError { .. } | RustyStatsError::FramingError { .. } => {
                ErrorSeverity::Low
            }

            RustyStatsError::ConnectionError { .. } => ErrorSeverity::Medium,

            RustyStatsError::NetworkError { .. }
            | RustyStatsError::ConfigError { .. }
            | RustyStatsError::SinkError { .. } => ErrorSeverity::High,

            RustyStatsError::InternalError { .. } => ErrorSeverity::Critical,
        }
    }

    /// Get the error category for routing and handling
    pub fn category(&self) -> ErrorCategory {
        match self {
            RustyStatsError::ParseError { .. } | RustyStatsError::FramingError { .. } => {
                ErrorCategory::Protocol
            }

            RustyStatsError::NetworkError { .. } | RustyStatsError::ConnectionError { .. } => {
                ErrorCategory::Network
            }

            RustyStatsError::ConfigError { .. } => ErrorCategory::Configuration,

            RustyStatsError::SinkError { .. } => ErrorCategory::Sink,

            RustyStatsError::InternalError { .. } => ErrorCategory::System,
        }
    }

    /// Protocol errors are raised on bytes a client sent; the connection
    /// driver closes the connection and the client is expected to reconnect.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Protocol)
    }

    /// Log the error at a level matching its severity
    pub fn log(&self) {
        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(error = %self, category = ?self.category(), "error occurred");
            }
            ErrorSeverity::Medium => {
                warn!(error = %self, category = ?self.category(), "error occurred");
            }
            ErrorSeverity::Low => {
                debug!(error = %self, category = ?self.category(), "error occurred");
            }
        }
    }
}

// Standard error conversions for common system errors
impl From<std::io::Error> for RustyStatsError {
    fn from(error: std::io::Error) -> Self {
        RustyStatsError::SinkError {
            message: error.to_string(),
            source: Some(error),
        }
    }
}

impl From<serde_json::Error> for RustyStatsError {
    fn from(error: serde_json::Error) -> Self {
        RustyStatsError::ConfigError {
            message: format!("Invalid configuration file: {}", error),
            config_key: None,
        }
    }
}

impl From<std::str::Utf8Error> for RustyStatsError {
    fn from(error: std::str::Utf8Error) -> Self {
        RustyStatsError::ParseError {
            message: format!("Invalid UTF-8 sequence: {}", error),
            input: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_low_severity() {
        let err = RustyStatsError::ParseError {
            message: "bad line".to_string(),
            input: Some("a:b".to_string()),
        };
        assert_eq!(err.severity(), ErrorSeverity::Low);
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert!(err.is_protocol_error());

        let err = RustyStatsError::FramingError {
            message: "bad magic".to_string(),
        };
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_sink_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: RustyStatsError = io_err.into();
        assert_eq!(err.category(), ErrorCategory::Sink);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(!err.is_protocol_error());
    }

    #[test]
    fn test_error_display() {
        let err = RustyStatsError::ConfigError {
            message: "timer_eps must be in (0, 1)".to_string(),
            config_key: Some("metrics.timer_eps".to_string()),
        };
        assert!(err.to_string().contains("timer_eps"));
    }
}
