//! Batch execution
//!
//! Operations run in chunks of `max_concurrent`; each chunk is awaited as a
//! whole before the next starts. A panicking operation is contained to its
//! own slot. With `fail_fast`, the first panic marks its slot and every slot
//! of later chunks as cancelled and nothing further is scheduled; operations
//! already running in the same chunk still finish.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::BatchConfig;
use crate::constants::{REASON_BATCH_CANCELLED, REASON_PROMISE_REJECTED};
use crate::error::ExecutionError;
use crate::executor::RetryExecutor;
use crate::operation::BatchOperation;
use crate::result::{BatchOutcome, BatchSummary, RetryResult};

impl RetryExecutor {
    /// Run every operation with retries and report results in input order
    ///
    /// `summary.successful + summary.failed` always equals the number of
    /// operations.
    #[instrument(skip_all, fields(operations = operations.len()))]
    pub async fn execute_batch_with_retry<T>(
        &self,
        operations: Vec<BatchOperation<T>>,
        batch_config: Option<BatchConfig>,
    ) -> BatchOutcome<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let config = batch_config.unwrap_or_default();
        let started = Instant::now();

        let (mut results, aborted) = self.run_batch_pass(&operations, config).await;

        if config.retry_failed_only && !aborted {
            let failed: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, result)| !result.success)
                .map(|(index, _)| index)
                .collect();

            if !failed.is_empty() {
                debug!(failed = failed.len(), "Retrying failed batch operations");
                let retry_operations: Vec<_> =
                    failed.iter().map(|&index| operations[index].clone()).collect();
                let retry_config = BatchConfig { retry_failed_only: false, ..config };
                let (retried, _) = self.run_batch_pass(&retry_operations, retry_config).await;

                for (index, result) in failed.into_iter().zip(retried) {
                    results[index] = result;
                }
            }
        }

        let successful = results.iter().filter(|result| result.success).count();
        let summary = BatchSummary {
            total_operations: results.len(),
            successful,
            failed: results.len() - successful,
            total_time: started.elapsed(),
        };
        debug!(
            successful = summary.successful,
            failed = summary.failed,
            total_time_ms = summary.total_time.as_millis() as u64,
            "Batch completed"
        );

        BatchOutcome { results, summary }
    }

    /// One pass over `operations`; returns the results and whether fail-fast aborted
    async fn run_batch_pass<T>(
        &self,
        operations: &[BatchOperation<T>],
        config: BatchConfig,
    ) -> (Vec<RetryResult<T>>, bool)
    where
        T: Clone + Send + Sync + 'static,
    {
        let chunk_size = config.max_concurrent.max(1);
        let mut results: Vec<RetryResult<T>> = Vec::with_capacity(operations.len());
        let mut aborted = false;

        for chunk in operations.chunks(chunk_size) {
            let settled = join_all(chunk.iter().map(|entry| {
                let operation = Arc::clone(&entry.operation);
                AssertUnwindSafe(self.execute_with_retry(
                    move || operation(),
                    &entry.name,
                    entry.config.clone(),
                ))
                .catch_unwind()
            }))
            .await;

            for (entry, outcome) in chunk.iter().zip(settled) {
                let result = match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(operation = %entry.name, panic = %message, "Batch operation panicked");
                        if config.fail_fast {
                            aborted = true;
                            RetryResult::rejected(ExecutionError::BatchCancelled, REASON_BATCH_CANCELLED)
                        } else {
                            RetryResult::rejected(
                                ExecutionError::OperationPanicked { message },
                                REASON_PROMISE_REJECTED,
                            )
                        }
                    }
                };
                results.push(result);
            }

            if aborted {
                warn!(skipped = operations.len() - results.len(), "Batch aborted after failure");
                break;
            }
        }

        while results.len() < operations.len() {
            results.push(RetryResult::rejected(ExecutionError::BatchCancelled, REASON_BATCH_CANCELLED));
        }
        (results, aborted)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
