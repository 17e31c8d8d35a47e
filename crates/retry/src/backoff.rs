// Exponential backoff with symmetric jitter
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Un-jittered delay before the attempt following `attempt` (1-based)
///
/// `min(base_delay * multiplier^(attempt - 1), max_delay)`
pub fn base_delay_for(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base_ms = config.base_delay.as_nanos() as f64 / 1_000_000.0;
    let max_ms = config.max_delay.as_nanos() as f64 / 1_000_000.0;

    let delay_ms = (base_ms * config.backoff_multiplier.powi(exponent)).min(max_ms);
    duration_from_millis_f64(delay_ms)
}

/// Spread `delay` by `delay * jitter_range * (U(0,1) - 0.5)`, floored at zero
pub fn apply_jitter<R>(delay: Duration, jitter_range: f64, rng: &mut R) -> Duration
where
    R: Rng,
{
    if jitter_range <= 0.0 {
        return delay;
    }

    let delay_ms = delay.as_nanos() as f64 / 1_000_000.0;
    let jitter = delay_ms * jitter_range * (rng.gen::<f64>() - 0.5);
    duration_from_millis_f64(delay_ms + jitter)
}

/// Delay to sleep after failed `attempt`, using the thread-local RNG
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    compute_delay_with(attempt, config, &mut rand::thread_rng())
}

/// Delay to sleep after failed `attempt`, using the given RNG
pub fn compute_delay_with<R>(attempt: u32, config: &RetryConfig, rng: &mut R) -> Duration
where
    R: Rng,
{
    apply_jitter(base_delay_for(attempt, config), config.jitter_range, rng)
}

fn duration_from_millis_f64(millis: f64) -> Duration {
    if !millis.is_finite() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((millis * 1_000_000.0).round() as u64)
}
