//! Failure classification
//!
//! Every failed attempt is mapped to an [`ErrorCategory`]; the category
//! decides whether the attempt may be retried and feeds the analytics
//! histograms. Classification is pluggable through [`ErrorClassifier`].
//!
//! The default [`HeuristicClassifier`] first looks for an explicit tag in the
//! error's source chain ([`CategorizedError`] or the executor's own
//! [`ExecutionError::Timeout`]) and only then falls back to substring
//! matching on the rendered messages. The substring rules are inherited
//! behaviour; changing them changes which failures are retried.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BoxedError, ExecutionError};

/// Category assigned to a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    ServiceUnavailable,
    TemporaryFailure,
    Authentication,
    Validation,
    Unknown,
}

impl ErrorCategory {
    /// Every category, in declaration order
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::RateLimit,
        ErrorCategory::ServiceUnavailable,
        ErrorCategory::TemporaryFailure,
        ErrorCategory::Authentication,
        ErrorCategory::Validation,
        ErrorCategory::Unknown,
    ];

    /// Stable label used in failure reasons and analytics keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ServiceUnavailable => "service_unavailable",
            ErrorCategory::TemporaryFailure => "temporary_failure",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an operation error to a category
pub trait ErrorClassifier: Send + Sync + 'static {
    fn classify(&self, error: &(dyn StdError + 'static)) -> ErrorCategory;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&(dyn StdError + 'static)) -> ErrorCategory + Send + Sync + 'static,
{
    fn classify(&self, error: &(dyn StdError + 'static)) -> ErrorCategory {
        self(error)
    }
}

/// An operation error explicitly tagged with its category
///
/// Operations that know why they failed should return this (or wrap their
/// error in it) rather than relying on message matching.
#[derive(Debug)]
pub struct CategorizedError {
    category: ErrorCategory,
    source: BoxedError,
}

impl CategorizedError {
    pub fn new(category: ErrorCategory, source: impl Into<BoxedError>) -> Self {
        Self { category, source: source.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.source)
    }
}

impl StdError for CategorizedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Convenience constructor for a tagged error
pub fn categorize(category: ErrorCategory, error: impl Into<BoxedError>) -> CategorizedError {
    CategorizedError::new(category, error)
}

/// Default classifier: explicit tags first, then message heuristics
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    /// Return the first explicit tag found in the source chain
    pub fn tagged_category(error: &(dyn StdError + 'static)) -> Option<ErrorCategory> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(tagged) = err.downcast_ref::<CategorizedError>() {
                return Some(tagged.category());
            }
            if let Some(ExecutionError::Timeout { .. }) = err.downcast_ref::<ExecutionError>() {
                return Some(ErrorCategory::Timeout);
            }
            current = err.source();
        }
        None
    }

    /// Substring rules over a lowercase message; order matters
    pub fn classify_message(message: &str) -> ErrorCategory {
        let message = message.to_lowercase();

        if message.contains("network") || message.contains("fetch") {
            ErrorCategory::Network
        } else if message.contains("timeout") {
            ErrorCategory::Timeout
        } else if message.contains("rate limit") {
            ErrorCategory::RateLimit
        } else if message.contains("service unavailable")
            || message.contains("502")
            || message.contains("503")
        {
            ErrorCategory::ServiceUnavailable
        } else if message.contains("temporary") {
            ErrorCategory::TemporaryFailure
        } else if message.contains("auth") {
            ErrorCategory::Authentication
        } else if message.contains("validation") {
            ErrorCategory::Validation
        } else {
            ErrorCategory::Unknown
        }
    }
}

impl ErrorClassifier for HeuristicClassifier {
    fn classify(&self, error: &(dyn StdError + 'static)) -> ErrorCategory {
        if let Some(category) = Self::tagged_category(error) {
            return category;
        }

        // Walk the chain so wrapped causes still count
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(err) = current {
            let category = Self::classify_message(&err.to_string());
            if category != ErrorCategory::Unknown {
                return category;
            }
            current = err.source();
        }
        ErrorCategory::Unknown
    }
}
