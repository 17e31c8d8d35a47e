//! Outcomes reported by the executor

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ExecutionError, SharedError};

/// How a successful call recovered from earlier failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryStrategy {
    /// Succeeded on a retry of the same operation
    Retry,
    /// Succeeded on the n-th fallback (1-based)
    Fallback(usize),
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::Retry => write!(f, "retry"),
            RecoveryStrategy::Fallback(index) => write!(f, "fallback_{index}"),
        }
    }
}

impl Serialize for RecoveryStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecoveryStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "retry" {
            return Ok(RecoveryStrategy::Retry);
        }
        raw.strip_prefix("fallback_")
            .and_then(|index| index.parse().ok())
            .map(RecoveryStrategy::Fallback)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown recovery strategy: {raw}")))
    }
}

/// Outcome of one executor call
///
/// Operation failures are captured here rather than returned as `Err`.
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    pub success: bool,
    pub data: Option<T>,
    /// Last error observed, if the call failed
    pub error: Option<SharedError>,
    /// Attempts consumed; zero when the breaker rejected the call
    pub attempts: u32,
    pub total_time: Duration,
    /// Category of every failed attempt, in order
    pub failure_reasons: Vec<String>,
    pub recovery_strategy: Option<RecoveryStrategy>,
}

impl<T> RetryResult<T> {
    pub(crate) fn succeeded(
        data: T,
        attempts: u32,
        total_time: Duration,
        failure_reasons: Vec<String>,
        recovery_strategy: Option<RecoveryStrategy>,
    ) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            attempts,
            total_time,
            failure_reasons,
            recovery_strategy,
        }
    }

    pub(crate) fn failed(
        error: SharedError,
        attempts: u32,
        total_time: Duration,
        failure_reasons: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            attempts,
            total_time,
            failure_reasons,
            recovery_strategy: None,
        }
    }

    /// Synthetic failure that consumed no attempts
    pub(crate) fn rejected(error: ExecutionError, reason: &str) -> Self {
        Self::failed(error.into_shared(), 0, Duration::ZERO, vec![reason.to_string()])
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Convert into a plain `Result`, dropping the bookkeeping
    pub fn into_result(self) -> Result<T, SharedError> {
        match (self.data, self.error) {
            (Some(data), _) if self.success => Ok(data),
            (_, Some(error)) => Err(error),
            _ => Err(ExecutionError::OperationPanicked {
                message: "result carries neither data nor error".to_string(),
            }
            .into_shared()),
        }
    }

    /// Rendered message of the stored error
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Counts for a finished batch; `successful + failed == total_operations`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_operations: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(with = "crate::config::duration_millis")]
    pub total_time: Duration,
}

/// Results of `execute_batch_with_retry`, in input order
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub results: Vec<RetryResult<T>>,
    pub summary: BatchSummary,
}
