// Defaults for the retry executor
use std::time::Duration;

/// Default maximum number of attempts per call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the second attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Default cap applied to the computed backoff
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default growth factor between consecutive delays
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default jitter fraction (0.0 = none, 1.0 = +/- 50% of the delay)
pub const DEFAULT_JITTER_RANGE: f64 = 0.1;

/// Default per-attempt timeout
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Circuit breaker: consecutive failed calls before opening
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// Circuit breaker: time an open breaker rejects calls
pub const DEFAULT_CIRCUIT_BREAKER_RESET: Duration = Duration::from_millis(60_000);

/// Batch: operations started concurrently per chunk
pub const DEFAULT_BATCH_MAX_CONCURRENT: usize = 5;

/// Fallbacks never get more attempts than this
pub const FALLBACK_MAX_ATTEMPTS: u32 = 2;

/// Adaptive: upper bound for adapted `max_attempts`
pub const ADAPTIVE_MAX_ATTEMPTS_CEILING: u32 = 10;

/// Adaptive: lower bound for adapted `max_attempts`
pub const ADAPTIVE_MAX_ATTEMPTS_FLOOR: u32 = 1;

/// Adaptive: success rate above which attempts are reduced
pub const ADAPTIVE_HIGH_SUCCESS_RATE: f64 = 0.9;

/// Adaptive: minimum adapted base delay
pub const ADAPTIVE_MIN_BASE_DELAY: Duration = Duration::from_millis(500);

/// Reporter: default base path of the retry analytics service
pub const DEFAULT_REPORTER_BASE_URL: &str = "/api/retry-mechanism";

/// Reporter: interval between periodic analytics snapshots
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Reporter: per-request HTTP timeout
pub const DEFAULT_REPORTER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable overriding the reporter base URL
pub const BASE_URL_ENV_VAR: &str = "RETRY_MECHANISM_BASE_URL";

/// Failure reason recorded when the breaker rejects a call
pub const REASON_CIRCUIT_BREAKER_OPEN: &str = "circuit_breaker_open";

/// Failure reason for batch slots skipped after a fail-fast abort
pub const REASON_BATCH_CANCELLED: &str = "batch_cancelled";

/// Failure reason for batch operations that panicked
pub const REASON_PROMISE_REJECTED: &str = "promise_rejected";
