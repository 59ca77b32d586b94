//! Time source used by leases, the rate limiter and freshness checks.
//!
//! All coordination timestamps are epoch milliseconds, the unit the shared
//! store persists. Suspension goes through [`Clock::sleep`] so tests can run
//! backoff loops against virtual time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

pub trait Clock: Send + Sync {
    /// Current time as epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Suspend the calling execution.
    fn sleep(&self, duration: Duration);

    /// Calendar date at `now` in the given reference timezone.
    fn today(&self, offset: FixedOffset) -> NaiveDate {
        date_at(self.now_ms(), offset)
    }
}

/// Calendar date of an epoch-ms instant in the given timezone.
pub fn date_at(epoch_ms: i64, offset: FixedOffset) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_default()
        .with_timezone(&offset)
        .date_naive()
}

/// Wall clock with real sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly instead of blocking.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(epoch_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(epoch_ms),
        }
    }

    /// Start at midnight UTC of `date`, plus `hour` hours.
    pub fn at(date: NaiveDate, hour: u32) -> Self {
        let ms = date
            .and_hms_opt(hour, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default();
        Self::new(ms)
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, epoch_ms: i64) {
        self.now.store(epoch_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
