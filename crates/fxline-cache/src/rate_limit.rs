//! Shared sliding-window rate limiter.
//!
//! The window is a JSON array of epoch-ms call timestamps under
//! `ratelimit:<sourceId>`, oldest first, never longer than `limit`. Its
//! read-modify-write runs under a short lease (`lock:ratelimit:<sourceId>`)
//! so two executions cannot both admit against the same under-capacity
//! window. Overshoot is only possible when that lease expires mid-update or
//! the store's compare-and-set is not atomic, and is then bounded by the
//! number of concurrent racers.

use std::sync::Arc;
use std::time::Duration;

use fxline_core::Clock;
use fxline_store::{KvStore, StoreError};

use crate::config::SourceConfig;
use crate::error::ResolveError;
use crate::lease::LeaseLock;

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    key: String,
    lock: LeaseLock,
    lock_wait: Duration,
    limit: usize,
    window_ms: i64,
    buffer: Duration,
}

impl RateLimiter {
    pub fn new(
        source_id: &str,
        config: &SourceConfig,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let lock = LeaseLock::new(
            kv.clone(),
            clock.clone(),
            format!("lock:ratelimit:{source_id}"),
            config.lease_timeout(),
        )
        .with_poll(Duration::from_millis(config.lease_poll_ms.min(50)));
        Self {
            kv,
            clock,
            key: format!("ratelimit:{source_id}"),
            lock,
            lock_wait: Duration::from_millis(config.limiter_lock_wait_ms),
            limit: config.rate_limit.max(1) as usize,
            window_ms: config.window_ms as i64,
            buffer: Duration::from_millis(config.rate_buffer_ms),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn load(&self) -> Result<Vec<i64>, StoreError> {
        let Some(raw) = self.kv.get(&self.key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<i64>>(&raw) {
            Ok(mut stamps) => {
                stamps.sort_unstable();
                Ok(stamps)
            }
            Err(e) => {
                log::warn!("{}: unreadable window ({e}), resetting", self.key);
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, stamps: &[i64]) -> Result<(), StoreError> {
        let json = serde_json::to_string(stamps).map_err(|source| StoreError::Encode {
            key: self.key.clone(),
            source,
        })?;
        self.kv.set(&self.key, &json)
    }

    /// Calls recorded within the current window.
    pub fn in_window(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        Ok(self
            .load()?
            .into_iter()
            .filter(|&t| now.saturating_sub(t) < self.window_ms)
            .count())
    }

    /// Block until an upstream call is admitted; returns the admission timestamp.
    ///
    /// Sleeps (on the clock) while the window is full, then re-evaluates from
    /// scratch. Terminates because every retained timestamp ages out of the
    /// window.
    pub fn admit(&self) -> Result<i64, ResolveError> {
        loop {
            let guard = self.lock.acquire(self.lock_wait)?;
            let now = self.clock.now_ms();
            let mut stamps = self.load()?;
            stamps.retain(|&t| now.saturating_sub(t) < self.window_ms);

            if stamps.len() < self.limit {
                stamps.push(now);
                let excess = stamps.len().saturating_sub(self.limit);
                stamps.drain(..excess);
                self.save(&stamps)?;
                guard.release();
                return Ok(now);
            }

            let oldest = stamps.first().copied().unwrap_or(now);
            let wait_ms = self.window_ms.saturating_sub(now.saturating_sub(oldest)).max(0) as u64;
            let wait = Duration::from_millis(wait_ms) + self.buffer;
            guard.release();

            log::debug!(
                "{}: {} calls in window, waiting {}ms",
                self.key,
                stamps.len(),
                wait.as_millis()
            );
            self.clock.sleep(wait);
        }
    }
}
