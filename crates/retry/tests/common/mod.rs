//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use fashun_retry::{
    AnalyticsReport, ErrorCategory, LearningRecord, MockClock, ReporterError, ReporterResult,
    RetryAnalyticsResponse, RetryConfig, RetryExecutor, RetryReporter,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Error type whose message drives heuristic classification
#[derive(Debug, Clone)]
pub struct TestError {
    pub message: String,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

/// Invocation counter shared with an operation closure
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the 1-based call number
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Config with millisecond delays and no jitter
pub fn fast_config(max_attempts: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .no_jitter()
        .retry_on(ErrorCategory::Unknown)
        .build()
        .expect("valid config")
}

/// Executor on a mock clock so breaker windows can be skipped
pub fn executor_with_clock() -> (RetryExecutor, MockClock) {
    init_tracing();
    let clock = MockClock::at(Duration::from_secs(1_700_000_000));
    let executor = RetryExecutor::builder()
        .clock(clock.clone())
        .build()
        .expect("valid executor");
    (executor, clock)
}

/// Reporter that forwards everything it receives to channels
#[derive(Debug)]
pub struct ChannelReporter {
    learning: UnboundedSender<LearningRecord>,
    reports: UnboundedSender<AnalyticsReport>,
    response: Option<RetryAnalyticsResponse>,
}

pub struct ReporterChannels {
    pub learning: UnboundedReceiver<LearningRecord>,
    pub reports: UnboundedReceiver<AnalyticsReport>,
}

impl ChannelReporter {
    pub fn new(response: Option<RetryAnalyticsResponse>) -> (Self, ReporterChannels) {
        let (learning_tx, learning_rx) = unbounded_channel();
        let (reports_tx, reports_rx) = unbounded_channel();
        (
            Self { learning: learning_tx, reports: reports_tx, response },
            ReporterChannels { learning: learning_rx, reports: reports_rx },
        )
    }
}

#[async_trait]
impl RetryReporter for ChannelReporter {
    async fn send_learning_data(&self, record: &LearningRecord) -> ReporterResult<()> {
        let _ = self.learning.send(record.clone());
        Ok(())
    }

    async fn send_analytics_report(&self, report: &AnalyticsReport) -> ReporterResult<()> {
        let _ = self.reports.send(report.clone());
        Ok(())
    }

    async fn fetch_analytics(
        &self,
        _operation: Option<&str>,
    ) -> ReporterResult<RetryAnalyticsResponse> {
        self.response
            .clone()
            .ok_or_else(|| ReporterError::NotConfigured { message: "no canned response".into() })
    }
}
