//! Automatic retry mechanism for async operations.
//!
//! [`RetryExecutor`] wraps an operation with:
//! - a per-attempt timeout
//! - exponential backoff with symmetric jitter
//! - a circuit breaker per operation name
//! - fallback chains and chunked batch execution
//! - in-flight deduplication of identical calls
//! - per-operation analytics, adaptive configuration and best-effort
//!   telemetry through a [`RetryReporter`]
//!
//! Operation failures never surface as `Err`; every call resolves to a
//! [`RetryResult`].
//!
//! # Features
//!
//! - `http-reporter` (default): [`HttpReporter`], a reqwest-based sink for
//!   learning data and analytics reports

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod adaptive;
pub mod analytics;
pub mod backoff;
mod batch;
pub mod breaker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod operation;
pub mod reporter;
pub mod result;

// Re-exports
// ------------------------
pub use adaptive::{ConfigAdapter, HeuristicConfigAdapter};
pub use analytics::{
    AnalyticsReport, AnalyticsSummary, CircuitBreakerSnapshot, OperationCircuitState,
    RetryAnalytics, RetryAnalyticsResponse, RetryPatterns,
};
pub use breaker::{CircuitBreakerState, CircuitState};
pub use classify::{categorize, CategorizedError, ErrorCategory, ErrorClassifier, HeuristicClassifier};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    BatchConfig, ExecutorSettings, LearningConfig, ReporterSettings, RetryConfig, RetryConfigBuilder,
};
pub use error::{
    BoxedError, ConfigError, ConfigResult, ExecutionError, ReporterError, ReporterResult, SharedError,
};
pub use executor::{ReportingHandle, RetryExecutor, RetryExecutorBuilder};
pub use operation::{boxed_operation, BatchOperation, BoxedOperation};
#[cfg(feature = "http-reporter")]
pub use reporter::HttpReporter;
pub use reporter::{LearningOutcome, LearningRecord, NoopReporter, RetryReporter};
pub use result::{BatchOutcome, BatchSummary, RecoveryStrategy, RetryResult};
