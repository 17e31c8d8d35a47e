//! Per-operation retry analytics
//!
//! Records are created lazily the first time an operation reports anything
//! and are updated after every attempt. They feed the adaptive config
//! heuristic and the periodic analytics report.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::breaker::CircuitBreakerState;
use crate::classify::ErrorCategory;

/// Histograms describing when and how an operation fails
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPatterns {
    /// Failed attempts per UTC hour
    pub time_of_day: BTreeMap<u32, u64>,
    /// Failed attempts per category
    pub error_type: BTreeMap<String, u64>,
    /// Total time (ms) of every successful call
    pub recovery_time: Vec<u64>,
}

/// Rolling counters for one operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryAnalytics {
    pub operation: String,
    /// Every attempt, successful or not
    pub total_attempts: u64,
    /// Calls that eventually succeeded
    pub successful_retries: u64,
    /// Calls that ended in failure
    pub failed_retries: u64,
    /// Mean of `retry_patterns.recovery_time`, in ms
    pub average_retry_time: f64,
    pub circuit_breaker_activations: u64,
    pub common_failure_reasons: BTreeMap<String, u64>,
    pub retry_patterns: RetryPatterns,
}

impl RetryAnalytics {
    pub fn new(operation: impl Into<String>) -> Self {
        Self { operation: operation.into(), ..Self::default() }
    }

    /// Share of completed calls that succeeded, `None` before any completed
    pub fn success_rate(&self) -> Option<f64> {
        let completed = self.successful_retries + self.failed_retries;
        if completed == 0 {
            return None;
        }
        Some(self.successful_retries as f64 / completed as f64)
    }

    fn record_failed_attempt(&mut self, category: ErrorCategory, hour: u32) {
        self.total_attempts += 1;
        *self.common_failure_reasons.entry(category.to_string()).or_default() += 1;
        *self.retry_patterns.time_of_day.entry(hour).or_default() += 1;
        *self.retry_patterns.error_type.entry(category.to_string()).or_default() += 1;
    }

    fn record_success(&mut self, total_time: Duration) {
        self.total_attempts += 1;
        self.successful_retries += 1;
        self.retry_patterns.recovery_time.push(total_time.as_millis() as u64);

        let samples = &self.retry_patterns.recovery_time;
        let sum: u64 = samples.iter().sum();
        self.average_retry_time = sum as f64 / samples.len() as f64;
    }

    fn record_failure(&mut self, opened_breaker: bool) {
        self.failed_retries += 1;
        if opened_breaker {
            self.circuit_breaker_activations += 1;
        }
    }
}

/// Aggregate view across operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsSummary {
    pub total_operations: u64,
    pub average_success_rate: f64,
    pub average_retry_time: f64,
    pub circuit_breaker_activations: u64,
}

impl AnalyticsSummary {
    pub fn from_analytics(analytics: &[RetryAnalytics]) -> Self {
        if analytics.is_empty() {
            return Self::default();
        }

        let rates: Vec<f64> = analytics.iter().filter_map(RetryAnalytics::success_rate).collect();
        let average_success_rate =
            if rates.is_empty() { 0.0 } else { rates.iter().sum::<f64>() / rates.len() as f64 };

        Self {
            total_operations: analytics.len() as u64,
            average_success_rate,
            average_retry_time: analytics.iter().map(|a| a.average_retry_time).sum::<f64>()
                / analytics.len() as f64,
            circuit_breaker_activations: analytics.iter().map(|a| a.circuit_breaker_activations).sum(),
        }
    }
}

/// Breaker state tagged with its operation, flattened for the periodic report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub operation: String,
    #[serde(flatten)]
    pub state: CircuitBreakerState,
}

/// Payload posted to `{base_url}/analytics-report`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    /// Epoch millis
    pub timestamp: u64,
    pub analytics: Vec<RetryAnalytics>,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub active_retries: usize,
}

/// Breaker state as returned by the analytics endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationCircuitState {
    pub operation: String,
    pub state: CircuitBreakerState,
}

/// Aggregated analytics fetched from `{base_url}/analytics`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryAnalyticsResponse {
    pub operations: Vec<RetryAnalytics>,
    pub circuit_breakers: Vec<OperationCircuitState>,
    pub active_retries: usize,
    pub summary: AnalyticsSummary,
}

impl RetryAnalyticsResponse {
    /// All-zero response returned when the fetch fails
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Analytics for every operation an executor has seen
#[derive(Debug, Default)]
pub(crate) struct AnalyticsStore {
    records: DashMap<String, RetryAnalytics>,
}

impl AnalyticsStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_failed_attempt(&self, operation: &str, category: ErrorCategory, hour: u32) {
        self.entry(operation).record_failed_attempt(category, hour);
    }

    pub(crate) fn record_success(&self, operation: &str, total_time: Duration) {
        self.entry(operation).record_success(total_time);
    }

    pub(crate) fn record_failure(&self, operation: &str, opened_breaker: bool) {
        self.entry(operation).record_failure(opened_breaker);
    }

    pub(crate) fn get(&self, operation: &str) -> Option<RetryAnalytics> {
        self.records.get(operation).map(|record| record.value().clone())
    }

    /// All records, ordered by operation name
    pub(crate) fn snapshot(&self) -> Vec<RetryAnalytics> {
        let mut records: Vec<_> = self.records.iter().map(|record| record.value().clone()).collect();
        records.sort_by(|a, b| a.operation.cmp(&b.operation));
        records
    }

    fn entry(&self, operation: &str) -> dashmap::mapref::one::RefMut<'_, String, RetryAnalytics> {
        self.records
            .entry(operation.to_string())
            .or_insert_with(|| RetryAnalytics::new(operation))
    }
}
