//! Adaptive configuration from historical analytics
//!
//! The default [`HeuristicConfigAdapter`] is a linear nudge, not a tuned
//! controller: it widens `max_attempts` for operations that usually fail,
//! narrows it for operations that almost always succeed, and spreads the
//! observed recovery time across the attempts as the base delay.

use std::time::Duration;

use tracing::debug;

use crate::analytics::RetryAnalytics;
use crate::config::{LearningConfig, RetryConfig};
use crate::constants::{
    ADAPTIVE_HIGH_SUCCESS_RATE, ADAPTIVE_MAX_ATTEMPTS_CEILING, ADAPTIVE_MAX_ATTEMPTS_FLOOR,
    ADAPTIVE_MIN_BASE_DELAY,
};

/// Derives a retry configuration from an operation's history
pub trait ConfigAdapter: Send + Sync + 'static {
    fn adapt(
        &self,
        base: &RetryConfig,
        analytics: &RetryAnalytics,
        learning: &LearningConfig,
    ) -> RetryConfig;
}

/// Default adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicConfigAdapter;

impl ConfigAdapter for HeuristicConfigAdapter {
    fn adapt(
        &self,
        base: &RetryConfig,
        analytics: &RetryAnalytics,
        learning: &LearningConfig,
    ) -> RetryConfig {
        let mut adapted = base.clone();

        if let Some(success_rate) = analytics.success_rate() {
            if success_rate < learning.success_threshold {
                let step = (learning.adaptation_rate * 5.0).ceil().max(0.0) as u32;
                adapted.max_attempts =
                    adapted.max_attempts.saturating_add(step).min(ADAPTIVE_MAX_ATTEMPTS_CEILING);
            } else if success_rate > ADAPTIVE_HIGH_SUCCESS_RATE {
                let step = (learning.adaptation_rate * 2.0).ceil().max(0.0) as u32;
                adapted.max_attempts =
                    adapted.max_attempts.saturating_sub(step).max(ADAPTIVE_MAX_ATTEMPTS_FLOOR);
            }
        }

        if analytics.average_retry_time > 0.0 {
            let optimal_ms = analytics.average_retry_time / f64::from(adapted.max_attempts);
            let ceiling = adapted.max_delay / 4;
            let optimal = Duration::from_secs_f64(optimal_ms / 1_000.0);
            adapted.base_delay = optimal.min(ceiling).max(ADAPTIVE_MIN_BASE_DELAY);
        }

        debug!(
            operation = %analytics.operation,
            max_attempts = adapted.max_attempts,
            base_delay_ms = adapted.base_delay.as_millis() as u64,
            "Adapted retry configuration"
        );
        adapted
    }
}
