//! # GymKit Common
//!
//! Common error types and logging configuration shared by the GymKit offline
//! workers and their tooling.
//!
//! ## Features
//!
//! - Unified error type with categories for reports
//! - Logging configuration and setup

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for GymKit tooling.
#[derive(Error, Debug)]
pub enum GymKitError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Offline worker errors (install, activation, cache).
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A remote check returned something other than what was expected.
    #[error("Check failed: {0}")]
    CheckFailed(String),

    /// URL errors.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl GymKitError {
    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a worker error with source.
    pub fn worker_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Worker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for reports.
    pub fn category(&self) -> &'static str {
        match self {
            GymKitError::Config { .. } => "config",
            GymKitError::Network { .. } => "network",
            GymKitError::Worker { .. } => "worker",
            GymKitError::CheckFailed(_) => "check_failed",
            GymKitError::Url(_) => "url",
            GymKitError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for GymKit operations.
pub type Result<T> = std::result::Result<T, GymKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let io = || std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(
            GymKitError::config_with_source("bad file", io()).category(),
            "config"
        );
        assert_eq!(
            GymKitError::worker_with_source("install failed", io()).category(),
            "worker"
        );
        assert_eq!(
            GymKitError::CheckFailed("status".into()).category(),
            "check_failed"
        );
    }

    #[test]
    fn test_error_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = GymKitError::network_with_source("fetch failed", io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Network error: fetch failed");
    }
}
