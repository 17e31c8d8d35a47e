//! Wall-clock abstraction for breaker windows and analytics timestamps
//!
//! Backoff sleeps and per-attempt timeouts use tokio's timer directly; only
//! the state that is persisted as epoch milliseconds goes through [`Clock`],
//! so tests can open a breaker and jump past its reset window instantly.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time
pub trait Clock: Send + Sync + 'static {
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since the UNIX epoch
    fn now_millis(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }

    /// Hour of day (UTC), used for the time-of-day histogram
    fn hour_of_day(&self) -> u32 {
        DateTime::<Utc>::from(self.system_time()).hour()
    }
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually advanced clock for tests
///
/// Starts at the UNIX epoch unless constructed with [`MockClock::at`].
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at `since_epoch` after the UNIX epoch
    pub fn at(since_epoch: Duration) -> Self {
        Self { offset: Arc::new(Mutex::new(since_epoch)) }
    }

    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl Clock for MockClock {
    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + *self.offset.lock()
    }
}
