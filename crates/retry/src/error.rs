//! Error types for the retry executor
//!
//! Operation failures never escape [`crate::RetryExecutor`] as `Err`; they are
//! captured inside [`crate::RetryResult`]. The types here describe the
//! failures the executor itself produces, plus the configuration and
//! reporting errors surfaced by the ambient layers.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type accepted from wrapped operations
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared error stored in results so settled results can be cloned
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failures produced by the executor rather than by the wrapped operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The operation's circuit breaker rejected the call
    #[error("Circuit breaker is open. Retry in {retry_in_secs}s")]
    CircuitOpen { retry_in_secs: u64 },

    /// A single attempt exceeded its timeout
    #[error("Operation timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    /// A batch slot was skipped after a fail-fast abort
    #[error("Batch operation cancelled")]
    BatchCancelled,

    /// A batch operation panicked instead of resolving
    #[error("Operation panicked: {message}")]
    OperationPanicked { message: String },
}

impl ExecutionError {
    /// Convert into the shared form stored in results
    pub fn into_shared(self) -> SharedError {
        Arc::new(self)
    }
}

/// Errors raised while building or loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid retry configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised by [`crate::reporter::RetryReporter`] implementations
///
/// Callers of the executor never see these: reporting is best-effort and
/// failures are logged and dropped.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[cfg(feature = "http-reporter")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analytics endpoint returned status {status}")]
    Status { status: u16 },

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Reporter is not configured: {message}")]
    NotConfigured { message: String },
}

/// Result type for reporter operations
pub type ReporterResult<T> = Result<T, ReporterError>;
