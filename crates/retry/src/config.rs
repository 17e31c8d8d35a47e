//! Configuration for retries, batches, adaptation and reporting
//!
//! [`RetryConfig`] is the per-call parameter set; [`ExecutorSettings`] is
//! the file/env-loadable configuration an application hands to
//! [`crate::RetryExecutor::from_settings`].

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::ErrorCategory;
use crate::constants::*;
use crate::error::{ConfigError, ConfigResult};

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

fn default_retryable_errors() -> BTreeSet<ErrorCategory> {
    [
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::RateLimit,
        ErrorCategory::TemporaryFailure,
        ErrorCategory::ServiceUnavailable,
    ]
    .into_iter()
    .collect()
}

/// Parameters for a single `execute_with_retry` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    /// Upper bound on the un-jittered delay
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay, spread symmetrically
    pub jitter_range: f64,
    /// Timeout applied to each attempt
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
    /// Categories that may be retried
    pub retryable_errors: BTreeSet<ErrorCategory>,
    /// Consecutive failed calls before the breaker opens
    pub circuit_breaker_threshold: u32,
    /// How long an open breaker rejects calls
    #[serde(rename = "circuit_breaker_reset_ms", with = "duration_millis")]
    pub circuit_breaker_reset: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_range: DEFAULT_JITTER_RANGE,
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retryable_errors: default_retryable_errors(),
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_reset: DEFAULT_CIRCUIT_BREAKER_RESET,
        }
    }
}

impl RetryConfig {
    /// Create a builder seeded with the defaults
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Create a builder seeded with this configuration
    pub fn to_builder(&self) -> RetryConfigBuilder {
        RetryConfigBuilder { config: self.clone() }
    }

    /// Whether failures of `category` may be retried
    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        self.retryable_errors.contains(&category)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(ConfigError::invalid("backoff_multiplier must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.jitter_range) {
            return Err(ConfigError::invalid("jitter_range must be between 0.0 and 1.0"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than 0"));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker_threshold must be greater than 0"));
        }
        Ok(())
    }

    /// Key identifying identical in-flight calls
    ///
    /// Field order is fixed by the struct and `retryable_errors` is ordered,
    /// so two configs with the same values always produce the same key.
    pub fn dedup_key(&self, operation_name: &str) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        format!("{operation_name}_{canonical}")
    }
}

/// Fluent builder for [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter_range(mut self, range: f64) -> Self {
        self.config.jitter_range = range;
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter_range = 0.0;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Replace the retryable set
    pub fn retryable_errors<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = ErrorCategory>,
    {
        self.config.retryable_errors = categories.into_iter().collect();
        self
    }

    /// Add one category to the retryable set
    pub fn retry_on(mut self, category: ErrorCategory) -> Self {
        self.config.retryable_errors.insert(category);
        self
    }

    pub fn circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.config.circuit_breaker_threshold = threshold;
        self
    }

    pub fn circuit_breaker_reset(mut self, reset: Duration) -> Self {
        self.config.circuit_breaker_reset = reset;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Coordination options for `execute_batch_with_retry`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Stop scheduling after the first operation panics
    pub fail_fast: bool,
    /// Operations started concurrently per chunk
    pub max_concurrent: usize,
    /// Run one extra pass over failed slots
    pub retry_failed_only: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            max_concurrent: DEFAULT_BATCH_MAX_CONCURRENT,
            retry_failed_only: true,
        }
    }
}

/// Options for `execute_with_adaptive_retry`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enable_learning: bool,
    /// Scales how far `max_attempts` moves per adaptation
    pub adaptation_rate: f64,
    /// Success rate below which more attempts are granted
    pub success_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self { enable_learning: true, adaptation_rate: 0.1, success_threshold: 0.8 }
    }
}

/// Where and how often analytics are reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterSettings {
    /// Base URL of the analytics service
    pub base_url: String,
    #[serde(rename = "report_interval_ms", with = "duration_millis")]
    pub report_interval: Duration,
    #[serde(rename = "request_timeout_ms", with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REPORTER_BASE_URL.to_string(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            request_timeout: DEFAULT_REPORTER_REQUEST_TIMEOUT,
        }
    }
}

/// Top-level executor configuration, loadable from TOML
///
/// ```toml
/// [retry]
/// max_attempts = 4
/// base_delay_ms = 250
/// retryable_errors = ["network", "timeout"]
///
/// [reporter]
/// base_url = "https://shop.example.com/api/retry-mechanism"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Defaults applied when a call passes no config
    pub retry: RetryConfig,
    pub reporter: ReporterSettings,
}

impl ExecutorSettings {
    /// Parse settings from a TOML document
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let settings: Self = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading retry executor settings");
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Apply `RETRY_MECHANISM_BASE_URL` if set
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = std::env::var(BASE_URL_ENV_VAR) {
            if !base_url.trim().is_empty() {
                self.reporter.base_url = base_url;
            }
        }
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.validate()?;
        if self.reporter.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("reporter.base_url must not be empty"));
        }
        if self.reporter.report_interval.is_zero() {
            return Err(ConfigError::invalid("reporter.report_interval must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration
    //!
    //! Tests cover defaults, builder validation, dedup key canonicalisation
    //! and TOML loading.

    use super::*;

    /// Validates `RetryConfig::default` matches the documented defaults.
    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(1_000));
        assert_eq!(config.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.jitter_range, 0.1);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.circuit_breaker_reset, Duration::from_secs(60));
        assert!(config.is_retryable(ErrorCategory::Network));
        assert!(config.is_retryable(ErrorCategory::ServiceUnavailable));
        assert!(!config.is_retryable(ErrorCategory::Authentication));
        assert!(!config.is_retryable(ErrorCategory::Unknown));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = RetryConfig::builder()
            .max_attempts(5)
            .base_delay(Duration::from_millis(10))
            .no_jitter()
            .retryable_errors([ErrorCategory::Network])
            .retry_on(ErrorCategory::Validation)
            .build()
            .expect("valid config");

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(10));
        assert_eq!(config.jitter_range, 0.0);
        assert_eq!(config.retryable_errors.len(), 2);
        assert!(config.is_retryable(ErrorCategory::Validation));
    }

    /// Validates builder rejects each invalid field.
    #[test]
    fn test_builder_validation_fails() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder().backoff_multiplier(0.0).build().is_err());
        assert!(RetryConfig::builder().backoff_multiplier(f64::NAN).build().is_err());
        assert!(RetryConfig::builder().jitter_range(1.5).build().is_err());
        assert!(RetryConfig::builder().timeout(Duration::ZERO).build().is_err());
        assert!(RetryConfig::builder().circuit_breaker_threshold(0).build().is_err());
    }

    /// Semantically equal configs share a key regardless of insertion order.
    #[test]
    fn test_dedup_key_is_canonical() {
        let a = RetryConfig::builder()
            .retryable_errors([ErrorCategory::Timeout, ErrorCategory::Network])
            .build()
            .unwrap();
        let b = RetryConfig::builder()
            .retryable_errors([ErrorCategory::Network, ErrorCategory::Timeout])
            .build()
            .unwrap();
        assert_eq!(a.dedup_key("fetchUser"), b.dedup_key("fetchUser"));
        assert_ne!(a.dedup_key("fetchUser"), a.dedup_key("fetchCart"));

        let c = a.to_builder().max_attempts(4).build().unwrap();
        assert_ne!(a.dedup_key("fetchUser"), c.dedup_key("fetchUser"));
    }

    #[test]
    fn test_batch_and_learning_defaults() {
        let batch = BatchConfig::default();
        assert!(!batch.fail_fast);
        assert_eq!(batch.max_concurrent, 5);
        assert!(batch.retry_failed_only);

        let learning = LearningConfig::default();
        assert!(learning.enable_learning);
        assert_eq!(learning.adaptation_rate, 0.1);
        assert_eq!(learning.success_threshold, 0.8);
    }

    #[test]
    fn test_settings_from_partial_toml() {
        let settings = ExecutorSettings::from_toml_str(
            r#"
            [retry]
            max_attempts = 4
            base_delay_ms = 250
            retryable_errors = ["network", "rate_limit"]

            [reporter]
            base_url = "http://localhost:3000/api/retry-mechanism"
            "#,
        )
        .expect("valid settings");

        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        assert_eq!(settings.retry.max_delay, DEFAULT_MAX_DELAY);
        assert!(settings.retry.is_retryable(ErrorCategory::RateLimit));
        assert!(!settings.retry.is_retryable(ErrorCategory::Timeout));
        assert_eq!(settings.reporter.base_url, "http://localhost:3000/api/retry-mechanism");
        assert_eq!(settings.reporter.report_interval, DEFAULT_REPORT_INTERVAL);
    }

    #[test]
    fn test_settings_rejects_invalid_values() {
        let err = ExecutorSettings::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = ExecutorSettings::from_toml_str("[retry\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_settings_load_missing_file() {
        let err = ExecutorSettings::load("/definitely/not/here/retry.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let settings = ExecutorSettings::from_toml_str("").unwrap();
        assert_eq!(settings, ExecutorSettings::default());
        assert_eq!(settings.reporter.base_url, DEFAULT_REPORTER_BASE_URL);
    }
}
