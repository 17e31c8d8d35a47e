//! The retry executor
//!
//! [`RetryExecutor`] wraps async operations with per-attempt timeouts,
//! exponential backoff, per-operation circuit breaking, fallback chains and
//! adaptive configuration. It is cheap to clone; clones share breakers,
//! analytics and the in-flight map.
//!
//! # Deduplication
//!
//! Calls are keyed by operation name plus the canonical JSON of the resolved
//! [`RetryConfig`]. While a call is running, an identical call awaits the
//! same shared execution and receives a clone of its result instead of
//! invoking the operation again. The map stores only a weak handle; the
//! entry is removed when the execution finishes or is dropped. A call whose
//! key is in flight with a different result type runs on its own.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use fashun_retry::{ErrorCategory, RetryConfig, RetryExecutor};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = RetryExecutor::builder().build()?;
//! let config = RetryConfig::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(100))
//!     .retryable_errors([ErrorCategory::Network])
//!     .build()?;
//!
//! let result = executor
//!     .execute_with_retry(|| async { Ok::<_, std::io::Error>(42) }, "fetchUser", Some(config))
//!     .await;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::adaptive::{ConfigAdapter, HeuristicConfigAdapter};
use crate::analytics::{
    AnalyticsReport, AnalyticsStore, AnalyticsSummary, CircuitBreakerSnapshot, RetryAnalytics,
    RetryAnalyticsResponse,
};
use crate::backoff::compute_delay;
use crate::breaker::{BreakerRegistry, CircuitBreakerState, GateDecision};
use crate::classify::{ErrorClassifier, HeuristicClassifier};
use crate::clock::{Clock, SystemClock};
use crate::config::{ExecutorSettings, LearningConfig, RetryConfig};
use crate::constants::{
    DEFAULT_REPORT_INTERVAL, FALLBACK_MAX_ATTEMPTS, REASON_CIRCUIT_BREAKER_OPEN,
};
use crate::error::{BoxedError, ConfigResult, ExecutionError, SharedError};
use crate::operation::BoxedOperation;
use crate::reporter::{LearningRecord, NoopReporter, RetryReporter};
use crate::result::{RecoveryStrategy, RetryResult};

type RunFuture<T> = BoxFuture<'static, RetryResult<T>>;
type SharedRun<T> = Shared<RunFuture<T>>;
type WeakRun<T> = WeakShared<RunFuture<T>>;

/// In-flight execution; `run` holds a `WeakRun<T>` for the call's `T`
struct InFlight {
    id: u64,
    run: Box<dyn Any + Send + Sync>,
}

struct ExecutorInner {
    defaults: RetryConfig,
    report_interval: Duration,
    breakers: BreakerRegistry,
    analytics: AnalyticsStore,
    in_flight: DashMap<String, InFlight>,
    next_run_id: AtomicU64,
    classifier: Arc<dyn ErrorClassifier>,
    adapter: Arc<dyn ConfigAdapter>,
    reporter: Arc<dyn RetryReporter>,
    clock: Arc<dyn Clock>,
}

impl ExecutorInner {
    fn report(&self) -> AnalyticsReport {
        AnalyticsReport {
            timestamp: self.clock.now_millis(),
            analytics: self.analytics.snapshot(),
            circuit_breakers: self
                .breakers
                .snapshot()
                .into_iter()
                .map(|(operation, state)| CircuitBreakerSnapshot { operation, state })
                .collect(),
            active_retries: self.in_flight.len(),
        }
    }
}

/// Removes the in-flight entry it was registered under
struct InFlightGuard {
    inner: Arc<ExecutorInner>,
    key: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove_if(&self.key, |_, entry| entry.id == self.id);
    }
}

enum Launch<T> {
    Shared(SharedRun<T>),
    Direct(RunFuture<T>),
}

/// Retry executor with circuit breaking, fallbacks and analytics
#[derive(Clone)]
pub struct RetryExecutor {
    inner: Arc<ExecutorInner>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("defaults", &self.inner.defaults)
            .field("active_retries", &self.inner.in_flight.len())
            .field("reporter", &self.inner.reporter)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn builder() -> RetryExecutorBuilder {
        RetryExecutorBuilder::new()
    }

    /// Build an executor from loaded settings
    ///
    /// Uses [`crate::HttpReporter`] when `reporter.base_url` is an absolute
    /// URL and the `http-reporter` feature is enabled, otherwise reports are
    /// discarded.
    pub fn from_settings(settings: &ExecutorSettings) -> ConfigResult<Self> {
        settings.validate()?;
        let builder = Self::builder()
            .defaults(settings.retry.clone())
            .report_interval(settings.reporter.report_interval);

        #[cfg(feature = "http-reporter")]
        let builder = match crate::reporter::HttpReporter::new(&settings.reporter) {
            Ok(reporter) => builder.reporter(reporter),
            Err(err) => {
                warn!(error = %err, "HTTP reporter unavailable, telemetry disabled");
                builder
            }
        };

        builder.build()
    }

    /// Executor defaults used when a call passes no config
    pub fn defaults(&self) -> &RetryConfig {
        &self.inner.defaults
    }

    /// Run `operation` with retries, backoff and circuit breaking
    ///
    /// Never fails: every outcome, including breaker rejection, is reported
    /// through the returned [`RetryResult`].
    #[instrument(skip_all, fields(operation = %operation_name))]
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
        config: Option<RetryConfig>,
    ) -> RetryResult<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<BoxedError> + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let config = config.unwrap_or_else(|| self.inner.defaults.clone());
        let key = config.dedup_key(operation_name);
        let id = self.inner.next_run_id.fetch_add(1, Ordering::Relaxed);

        let guard = InFlightGuard { inner: Arc::clone(&self.inner), key: key.clone(), id };
        let inner = Arc::clone(&self.inner);
        let name = operation_name.to_string();
        let prepared: RunFuture<T> = async move {
            let _guard = guard;
            run_with_retry(inner, operation, name, config).await
        }
        .boxed();

        // The unused future's guard touches the map, so drop it after the entry lock
        let (launch, unused) = match self.inner.in_flight.entry(key) {
            Entry::Vacant(vacant) => {
                let run = prepared.shared();
                if let Some(weak) = run.downgrade() {
                    vacant.insert(InFlight { id, run: Box::new(weak) });
                }
                (Launch::Shared(run), None)
            }
            Entry::Occupied(mut occupied) => {
                match occupied.get().run.downcast_ref::<WeakRun<T>>().map(WeakShared::upgrade) {
                    Some(Some(existing)) => {
                        debug!("Joining in-flight execution");
                        (Launch::Shared(existing), Some(prepared))
                    }
                    Some(None) => {
                        let run = prepared.shared();
                        if let Some(weak) = run.downgrade() {
                            occupied.insert(InFlight { id, run: Box::new(weak) });
                        }
                        (Launch::Shared(run), None)
                    }
                    None => {
                        debug!("In-flight execution has a different result type, not deduplicating");
                        (Launch::Direct(prepared), None)
                    }
                }
            }
        };
        drop(unused);

        match launch {
            Launch::Shared(run) => run.await,
            Launch::Direct(run) => run.await,
        }
    }

    /// Try `primary`, then each fallback in order until one succeeds
    ///
    /// The primary runs as `<name>_primary`; fallback `i` (1-based) runs as
    /// `<name>_fallback_i` with at most two attempts. If everything fails the
    /// primary's failure is returned with `attempts` summed over the chain.
    #[instrument(skip_all, fields(operation = %operation_name, fallbacks = fallbacks.len()))]
    pub async fn execute_with_fallback<T>(
        &self,
        primary: BoxedOperation<T>,
        fallbacks: Vec<BoxedOperation<T>>,
        operation_name: &str,
        config: Option<RetryConfig>,
    ) -> RetryResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let config = config.unwrap_or_else(|| self.inner.defaults.clone());

        let primary_result = self
            .execute_with_retry(
                move || primary(),
                &format!("{operation_name}_primary"),
                Some(config.clone()),
            )
            .await;
        if primary_result.success {
            return primary_result;
        }

        let fallback_config = RetryConfig {
            max_attempts: config.max_attempts.min(FALLBACK_MAX_ATTEMPTS),
            ..config
        };
        let mut total_attempts = primary_result.attempts;

        for (index, fallback) in fallbacks.into_iter().enumerate() {
            let position = index + 1;
            let result = self
                .execute_with_retry(
                    move || fallback(),
                    &format!("{operation_name}_fallback_{position}"),
                    Some(fallback_config.clone()),
                )
                .await;
            total_attempts = total_attempts.saturating_add(result.attempts);

            if result.success {
                info!(fallback = position, "Recovered through fallback");
                return RetryResult {
                    recovery_strategy: Some(RecoveryStrategy::Fallback(position)),
                    ..result
                };
            }
            debug!(fallback = position, "Fallback failed");
        }

        warn!(attempts = total_attempts, "Primary and all fallbacks failed");
        RetryResult { attempts: total_attempts, ..primary_result }
    }

    /// Run `operation` with a config adapted from its history
    ///
    /// With learning enabled, the outcome is handed to the reporter on a
    /// background task.
    #[instrument(skip_all, fields(operation = %operation_name))]
    pub async fn execute_with_adaptive_retry<T, E, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
        learning: Option<LearningConfig>,
    ) -> RetryResult<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<BoxedError> + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let learning = learning.unwrap_or_default();
        let mut config = self.inner.defaults.clone();

        if learning.enable_learning {
            if let Some(history) = self.inner.analytics.get(operation_name) {
                config = self.inner.adapter.adapt(&config, &history, &learning);
            }
        }

        let result = self.execute_with_retry(operation, operation_name, Some(config.clone())).await;

        if learning.enable_learning {
            let record =
                LearningRecord::new(operation_name, self.inner.clock.now_millis(), config, &result);
            let reporter = Arc::clone(&self.inner.reporter);
            tokio::spawn(async move {
                if let Err(err) = reporter.send_learning_data(&record).await {
                    debug!(operation = %record.operation, error = %err, "Failed to send learning data");
                }
            });
        }

        result
    }

    /// Local analytics for one operation
    pub fn analytics(&self, operation_name: &str) -> Option<RetryAnalytics> {
        self.inner.analytics.get(operation_name)
    }

    /// Local analytics for every operation, ordered by name
    pub fn analytics_snapshot(&self) -> Vec<RetryAnalytics> {
        self.inner.analytics.snapshot()
    }

    pub fn analytics_summary(&self) -> AnalyticsSummary {
        AnalyticsSummary::from_analytics(&self.inner.analytics.snapshot())
    }

    pub fn circuit_breaker_state(&self, operation_name: &str) -> Option<CircuitBreakerState> {
        self.inner.breakers.get(operation_name)
    }

    /// Number of executions currently in flight
    pub fn active_retries(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// The report posted by periodic analytics reporting
    pub fn analytics_report(&self) -> AnalyticsReport {
        self.inner.report()
    }

    /// Fetch aggregated analytics from the reporter
    ///
    /// Any failure is logged and yields [`RetryAnalyticsResponse::empty`].
    pub async fn get_retry_analytics(&self, operation_name: Option<&str>) -> RetryAnalyticsResponse {
        match self.inner.reporter.fetch_analytics(operation_name).await {
            Ok(response) => response,
            Err(err) => {
                error!(operation = operation_name, error = %err, "Error fetching retry analytics");
                RetryAnalyticsResponse::empty()
            }
        }
    }

    /// Post an analytics report every `report_interval` until the handle or
    /// the executor is dropped
    pub fn start_analytics_reporting(&self) -> ReportingHandle {
        let weak: Weak<ExecutorInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.report_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Executor dropped, stopping analytics reporting");
                    break;
                };
                let report = inner.report();
                let reporter = Arc::clone(&inner.reporter);
                drop(inner);

                if let Err(err) = reporter.send_analytics_report(&report).await {
                    debug!(error = %err, "Failed to send analytics report");
                }
            }
        });

        ReportingHandle { task }
    }
}

/// Handle to the periodic reporting task; aborts the task on drop
#[derive(Debug)]
pub struct ReportingHandle {
    task: JoinHandle<()>,
}

impl ReportingHandle {
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReportingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_with_retry<T, E, F, Fut>(
    inner: Arc<ExecutorInner>,
    operation: F,
    operation_name: String,
    config: RetryConfig,
) -> RetryResult<T>
where
    E: Into<BoxedError>,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let GateDecision::Reject { retry_in } = inner.breakers.check(&operation_name) {
        let retry_in_secs = (retry_in.as_millis() as u64).div_ceil(1_000);
        return RetryResult::rejected(
            ExecutionError::CircuitOpen { retry_in_secs },
            REASON_CIRCUIT_BREAKER_OPEN,
        );
    }

    let max_attempts = config.max_attempts.max(1);
    let started = Instant::now();
    let mut failure_reasons = Vec::new();
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(attempt, max_attempts, "Executing operation");

        let error: SharedError = match tokio::time::timeout(config.timeout, operation()).await {
            Ok(Ok(data)) => {
                let total_time = started.elapsed();
                inner.breakers.record_success(&operation_name);
                inner.analytics.record_success(&operation_name, total_time);

                let recovery_strategy = (attempt > 1).then_some(RecoveryStrategy::Retry);
                if attempt > 1 {
                    info!(attempt, total_time_ms = total_time.as_millis() as u64, "Operation recovered");
                }
                return RetryResult::succeeded(
                    data,
                    attempt,
                    total_time,
                    failure_reasons,
                    recovery_strategy,
                );
            }
            Ok(Err(err)) => {
                let boxed: BoxedError = err.into();
                Arc::from(boxed)
            }
            Err(_) => ExecutionError::Timeout { timeout: config.timeout }.into_shared(),
        };

        let category = {
            let source: &(dyn StdError + 'static) = &*error;
            inner.classifier.classify(source)
        };
        failure_reasons.push(category.to_string());
        inner.analytics.record_failed_attempt(&operation_name, category, inner.clock.hour_of_day());

        if !config.is_retryable(category) {
            debug!(attempt, %category, error = %error, "Non-retryable failure");
            return finish_failure(&inner, &operation_name, &config, error, attempt, started, failure_reasons);
        }

        if attempt >= max_attempts {
            warn!(attempts = attempt, %category, error = %error, "Retry attempts exhausted");
            return finish_failure(&inner, &operation_name, &config, error, attempt, started, failure_reasons);
        }

        let delay = compute_delay(attempt, &config);
        debug!(attempt, %category, delay_ms = delay.as_millis() as u64, "Retrying after delay");
        tokio::time::sleep(delay).await;
    }
}

fn finish_failure<T>(
    inner: &ExecutorInner,
    operation_name: &str,
    config: &RetryConfig,
    error: SharedError,
    attempts: u32,
    started: Instant,
    failure_reasons: Vec<String>,
) -> RetryResult<T> {
    let opened = inner.breakers.record_failure(
        operation_name,
        config.circuit_breaker_threshold,
        config.circuit_breaker_reset,
    );
    inner.analytics.record_failure(operation_name, opened);
    RetryResult::failed(error, attempts, started.elapsed(), failure_reasons)
}

/// Builder for [`RetryExecutor`]
pub struct RetryExecutorBuilder {
    defaults: RetryConfig,
    report_interval: Duration,
    classifier: Arc<dyn ErrorClassifier>,
    adapter: Arc<dyn ConfigAdapter>,
    reporter: Arc<dyn RetryReporter>,
    clock: Arc<dyn Clock>,
}

impl Default for RetryExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder {
    pub fn new() -> Self {
        Self {
            defaults: RetryConfig::default(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            classifier: Arc::new(HeuristicClassifier),
            adapter: Arc::new(HeuristicConfigAdapter),
            reporter: Arc::new(NoopReporter),
            clock: Arc::new(SystemClock),
        }
    }

    /// Config used when a call passes `None`
    pub fn defaults(mut self, defaults: RetryConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn classifier(mut self, classifier: impl ErrorClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn adapter(mut self, adapter: impl ConfigAdapter) -> Self {
        self.adapter = Arc::new(adapter);
        self
    }

    pub fn reporter(mut self, reporter: impl RetryReporter) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Share a reporter the caller keeps a handle to
    pub fn shared_reporter(mut self, reporter: Arc<dyn RetryReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> ConfigResult<RetryExecutor> {
        self.defaults.validate()?;
        if self.report_interval.is_zero() {
            return Err(crate::error::ConfigError::invalid("report_interval must be greater than 0"));
        }

        let inner = ExecutorInner {
            defaults: self.defaults,
            report_interval: self.report_interval,
            breakers: BreakerRegistry::new(Arc::clone(&self.clock)),
            analytics: AnalyticsStore::new(),
            in_flight: DashMap::new(),
            next_run_id: AtomicU64::new(0),
            classifier: self.classifier,
            adapter: self.adapter,
            reporter: self.reporter,
            clock: self.clock,
        };
        Ok(RetryExecutor { inner: Arc::new(inner) })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for executor internals
    //!
    //! End-to-end behaviour lives in `tests/`; these cover the in-flight
    //! bookkeeping and builder validation.

    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::classify::ErrorCategory;

    fn fast_config() -> RetryConfig {
        RetryConfig::builder()
            .base_delay(Duration::from_millis(1))
            .no_jitter()
            .build()
            .expect("valid config")
    }

    #[test]
    fn test_builder_rejects_invalid_defaults() {
        let defaults = RetryConfig { max_attempts: 0, ..RetryConfig::default() };
        assert!(RetryExecutor::builder().defaults(defaults).build().is_err());
        assert!(RetryExecutor::builder().report_interval(Duration::ZERO).build().is_err());
    }

    /// The in-flight entry disappears once the execution settles.
    #[tokio::test]
    async fn test_in_flight_entry_removed_after_completion() {
        let executor = RetryExecutor::builder().build().unwrap();
        let result = executor
            .execute_with_retry(|| async { Ok::<_, BoxedError>(1) }, "op", Some(fast_config()))
            .await;
        assert!(result.success);
        assert_eq!(executor.active_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_entry_removed_when_dropped() {
        let executor = RetryExecutor::builder().build().unwrap();
        let pending = executor.execute_with_retry(
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxedError>(1)
            },
            "slow",
            Some(fast_config()),
        );

        let mut pending = Box::pin(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(executor.active_retries(), 1);

        drop(pending);
        assert_eq!(executor.active_retries(), 0);
    }

    /// Same key with a different result type runs independently.
    #[tokio::test(start_paused = true)]
    async fn test_different_result_type_bypasses_dedup() {
        let executor = RetryExecutor::builder().build().unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let first_calls = Arc::clone(&calls);
        let first = executor.execute_with_retry(
            move || {
                let calls = Arc::clone(&first_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, BoxedError>(1_u32)
                }
            },
            "shared",
            Some(fast_config()),
        );
        let second_calls = Arc::clone(&calls);
        let second = executor.execute_with_retry(
            move || {
                let calls = Arc::clone(&second_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxedError>("text".to_string())
                }
            },
            "shared",
            Some(fast_config()),
        );

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.data, Some(1));
        assert_eq!(second.data.as_deref(), Some("text"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_classifier_is_used() {
        let executor = RetryExecutor::builder()
            .classifier(|_: &(dyn StdError + 'static)| ErrorCategory::Validation)
            .build()
            .unwrap();
        let result = executor
            .execute_with_retry(
                || async { Err::<u8, _>("network down") },
                "classified",
                Some(fast_config()),
            )
            .await;
        assert_eq!(result.attempts, 1);
        assert_eq!(result.failure_reasons, vec!["validation"]);
    }

    #[test]
    fn test_report_is_empty_for_new_executor() {
        let executor = RetryExecutor::builder().build().unwrap();
        let report = executor.analytics_report();
        assert!(report.analytics.is_empty());
        assert!(report.circuit_breakers.is_empty());
        assert_eq!(report.active_retries, 0);
    }
}
