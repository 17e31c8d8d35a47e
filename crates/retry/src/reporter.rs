//! Telemetry sinks
//!
//! Reporting is best-effort. The executor calls reporters from spawned
//! tasks, logs any [`ReporterError`] at debug level and moves on; a failing
//! sink never changes the result a caller sees.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analytics::{AnalyticsReport, RetryAnalyticsResponse};
use crate::config::RetryConfig;
use crate::error::{ReporterError, ReporterResult};
use crate::result::RetryResult;

/// Outcome fields carried in a [`LearningRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningOutcome {
    pub success: bool,
    pub attempts: u32,
    #[serde(with = "crate::config::duration_millis")]
    pub total_time: Duration,
    pub failure_reasons: Vec<String>,
}

/// One adaptive run, posted to `{base_url}/learning-data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRecord {
    pub operation: String,
    /// Epoch millis
    pub timestamp: u64,
    pub config: RetryConfig,
    pub result: LearningOutcome,
}

impl LearningRecord {
    pub fn new<T>(
        operation: impl Into<String>,
        timestamp: u64,
        config: RetryConfig,
        result: &RetryResult<T>,
    ) -> Self {
        Self {
            operation: operation.into(),
            timestamp,
            config,
            result: LearningOutcome {
                success: result.success,
                attempts: result.attempts,
                total_time: result.total_time,
                failure_reasons: result.failure_reasons.clone(),
            },
        }
    }
}

/// Destination for learning data and analytics reports
#[async_trait]
pub trait RetryReporter: Send + Sync + Debug + 'static {
    async fn send_learning_data(&self, record: &LearningRecord) -> ReporterResult<()>;

    async fn send_analytics_report(&self, report: &AnalyticsReport) -> ReporterResult<()>;

    /// Fetch aggregated analytics, optionally for a single operation
    async fn fetch_analytics(&self, operation: Option<&str>)
        -> ReporterResult<RetryAnalyticsResponse>;
}

/// Reporter that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

#[async_trait]
impl RetryReporter for NoopReporter {
    async fn send_learning_data(&self, _record: &LearningRecord) -> ReporterResult<()> {
        Ok(())
    }

    async fn send_analytics_report(&self, _report: &AnalyticsReport) -> ReporterResult<()> {
        Ok(())
    }

    async fn fetch_analytics(
        &self,
        _operation: Option<&str>,
    ) -> ReporterResult<RetryAnalyticsResponse> {
        Err(ReporterError::NotConfigured { message: "no analytics endpoint".to_string() })
    }
}

#[cfg(feature = "http-reporter")]
pub use http::HttpReporter;

#[cfg(feature = "http-reporter")]
mod http {
    use reqwest::Client;
    use serde::Serialize;
    use tracing::debug;

    use super::{LearningRecord, RetryReporter};
    use crate::analytics::{AnalyticsReport, RetryAnalyticsResponse};
    use crate::config::ReporterSettings;
    use crate::error::{ReporterError, ReporterResult};

    /// JSON-over-HTTP reporter
    ///
    /// Posts to `{base_url}/learning-data` and `{base_url}/analytics-report`,
    /// reads from `{base_url}/analytics`.
    #[derive(Debug, Clone)]
    pub struct HttpReporter {
        client: Client,
        base_url: String,
    }

    impl HttpReporter {
        /// Build a reporter; `base_url` must be an absolute http(s) URL
        pub fn new(settings: &ReporterSettings) -> ReporterResult<Self> {
            let base_url = settings.base_url.trim_end_matches('/').to_string();
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ReporterError::NotConfigured {
                    message: format!("base_url must be an absolute http(s) URL, got {base_url:?}"),
                });
            }

            let client = Client::builder().timeout(settings.request_timeout).build()?;
            Ok(Self { client, base_url })
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        async fn post<P: Serialize + Sync>(&self, path: &str, payload: &P) -> ReporterResult<()> {
            let url = format!("{}/{path}", self.base_url);
            let response = self.client.post(&url).json(payload).send().await?;

            if !response.status().is_success() {
                return Err(ReporterError::Status { status: response.status().as_u16() });
            }
            debug!(url = %url, "Posted retry telemetry");
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl RetryReporter for HttpReporter {
        async fn send_learning_data(&self, record: &LearningRecord) -> ReporterResult<()> {
            self.post("learning-data", record).await
        }

        async fn send_analytics_report(&self, report: &AnalyticsReport) -> ReporterResult<()> {
            self.post("analytics-report", report).await
        }

        async fn fetch_analytics(
            &self,
            operation: Option<&str>,
        ) -> ReporterResult<RetryAnalyticsResponse> {
            let url = format!("{}/analytics", self.base_url);
            let mut request = self.client.get(&url);
            if let Some(operation) = operation {
                request = request.query(&[("operation", operation)]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(ReporterError::Status { status: response.status().as_u16() });
            }
            Ok(response.json().await?)
        }
    }
}
