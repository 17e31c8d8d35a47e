//! Type-erased operations for fallback chains and batches

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::RetryConfig;
use crate::error::BoxedError;

/// A retryable operation with its concrete closure and error types erased
pub type BoxedOperation<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, BoxedError>> + Send + Sync + 'static>;

/// Erase an async closure into a [`BoxedOperation`]
pub fn boxed_operation<T, E, F, Fut>(operation: F) -> BoxedOperation<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxedError> + 'static,
    T: 'static,
{
    Arc::new(move || operation().map(|result| result.map_err(Into::<BoxedError>::into)).boxed())
}

/// One entry of a batch
pub struct BatchOperation<T> {
    pub name: String,
    pub operation: BoxedOperation<T>,
    /// `None` uses the executor defaults
    pub config: Option<RetryConfig>,
}

impl<T: 'static> BatchOperation<T> {
    pub fn new<E, F, Fut>(name: impl Into<String>, operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxedError> + 'static,
    {
        Self { name: name.into(), operation: boxed_operation(operation), config: None }
    }

    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl<T> Clone for BatchOperation<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            operation: Arc::clone(&self.operation),
            config: self.config.clone(),
        }
    }
}

impl<T> fmt::Debug for BatchOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOperation")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
