//! Best-effort distributed lease over a store key.
//!
//! A lease is a store entry `{"holder": ..., "acquiredAt": epoch-ms}`. It is
//! free when the entry is absent or older than the lease timeout, so a
//! crashed holder blocks others for at most one timeout. Mutual exclusion is
//! only as strong as the store's `compare_and_set`.
//!
//! ```text
//! (free) ── try_acquire() ──→ LeaseGuard ── release()/drop ──→ (free)
//!    ↑                             │
//!    └──── now - acquiredAt > timeout (passive expiry) ────┘
//! ```
//!
//! A holder that outlives a slow step calls [`LeaseGuard::renew`] to restart
//! its timeout before doing more work under the lease.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fxline_core::Clock;
use fxline_store::{KvStore, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub holder: String,
    pub acquired_at: i64,
}

impl LeaseRecord {
    pub fn is_expired(&self, now_ms: i64, timeout: Duration) -> bool {
        now_ms.saturating_sub(self.acquired_at) > timeout.as_millis() as i64
    }
}

/// Unique-enough marker for one acquisition: process id, time, sequence.
fn new_holder(now_ms: i64) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{now_ms:x}-{seq}", std::process::id())
}

#[derive(Clone)]
pub struct LeaseLock {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    key: String,
    timeout: Duration,
    poll: Duration,
}

impl LeaseLock {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            kv,
            clock,
            key: key.into(),
            timeout,
            poll: Duration::from_millis(250),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current lease record, if any (expired or not).
    pub fn current(&self) -> Result<Option<LeaseRecord>, StoreError> {
        Ok(self
            .kv
            .get(&self.key)?
            .and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    /// Take the lease if it is free or expired. Returns immediately.
    pub fn try_acquire(&self) -> Result<Option<LeaseGuard>, StoreError> {
        let now = self.clock.now_ms();
        let record = LeaseRecord {
            holder: new_holder(now),
            acquired_at: now,
        };
        let encoded = encode(&self.key, &record)?;

        let won = match self.kv.get(&self.key)? {
            None => self.kv.compare_and_set(&self.key, None, &encoded)?,
            Some(raw) => {
                let expired = match serde_json::from_str::<LeaseRecord>(&raw) {
                    Ok(held) => held.is_expired(now, self.timeout),
                    Err(e) => {
                        log::warn!("lease {}: unreadable record ({e}), treating as expired", self.key);
                        true
                    }
                };
                if !expired {
                    return Ok(None);
                }
                log::debug!("lease {}: taking over expired lease", self.key);
                self.kv.compare_and_set(&self.key, Some(&raw), &encoded)?
            }
        };
        if !won {
            return Ok(None);
        }

        // Read back: with a non-atomic store a concurrent writer may have
        // overwritten us between compare and set.
        let confirmed = self.current()?.is_some_and(|r| r.holder == record.holder);
        if !confirmed {
            log::debug!("lease {}: lost race after write", self.key);
            return Ok(None);
        }

        Ok(Some(LeaseGuard {
            kv: self.kv.clone(),
            clock: self.clock.clone(),
            key: self.key.clone(),
            holder: record.holder,
            stored: encoded,
            released: false,
        }))
    }

    /// Poll for the lease until `wait` elapses.
    pub fn acquire(&self, wait: Duration) -> Result<LeaseGuard, ResolveError> {
        let start = self.clock.now_ms();
        let wait_ms = wait.as_millis() as i64;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }
            let waited = self.clock.now_ms() - start;
            if waited >= wait_ms {
                return Err(ResolveError::LockTimeout {
                    key: self.key.clone(),
                    waited_ms: waited.max(0) as u64,
                });
            }
            log::trace!("lease {}: busy, polling", self.key);
            let remaining = Duration::from_millis((wait_ms - waited) as u64);
            self.clock.sleep(self.poll.min(remaining));
        }
    }
}

fn encode(key: &str, record: &LeaseRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

/// Held lease. Released on [`release`](Self::release) or drop, so every exit
/// path (including `?` and fetch failures) frees it.
pub struct LeaseGuard {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    key: String,
    holder: String,
    /// Record as last written by this holder
    stored: String,
    released: bool,
}

impl LeaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Restart the lease timeout. Returns `false` if the lease expired and
    /// was taken over, in which case the caller no longer holds it.
    pub fn renew(&mut self) -> Result<bool, StoreError> {
        let record = LeaseRecord {
            holder: self.holder.clone(),
            acquired_at: self.clock.now_ms(),
        };
        let encoded = encode(&self.key, &record)?;
        if !self.kv.compare_and_set(&self.key, Some(&self.stored), &encoded)? {
            log::warn!("lease {}: expired and taken over before renewal", self.key);
            self.released = true;
            return Ok(false);
        }
        self.stored = encoded;
        Ok(true)
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    /// Delete the record if it is still ours. Failures are logged and
    /// ignored: the lease expires on its own.
    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.kv.compare_and_delete(&self.key, &self.stored) {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "lease {}: expired or taken over before release",
                self.key
            ),
            Err(e) => log::warn!("lease {}: release failed: {e}", self.key),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxline_core::ManualClock;
    use fxline_store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, LeaseLock) {
        let kv = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let lease = LeaseLock::new(kv.clone(), clock.clone(), "lock:ecb:2023", Duration::from_secs(60))
            .with_poll(Duration::from_millis(100));
        (kv, clock, lease)
    }

    #[test]
    fn acquire_and_release() {
        let (kv, _clock, lease) = setup();
        let guard = lease.try_acquire().unwrap().expect("free lease");
        let record = lease.current().unwrap().unwrap();
        assert_eq!(record.holder, guard.holder());
        assert_eq!(record.acquired_at, 1_000_000);

        guard.release();
        assert_eq!(kv.get("lock:ecb:2023").unwrap(), None);
    }

    #[test]
    fn held_lease_denies_second_acquirer() {
        let (_kv, _clock, lease) = setup();
        let _guard = lease.try_acquire().unwrap().unwrap();
        assert!(lease.try_acquire().unwrap().is_none());
    }

    #[test]
    fn drop_releases() {
        let (kv, _clock, lease) = setup();
        {
            let _guard = lease.try_acquire().unwrap().unwrap();
            assert!(kv.get("lock:ecb:2023").unwrap().is_some());
        }
        assert_eq!(kv.get("lock:ecb:2023").unwrap(), None);
        assert!(lease.try_acquire().unwrap().is_some());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let (_kv, clock, lease) = setup();
        let stale = lease.try_acquire().unwrap().unwrap();
        // Simulate a crashed holder: forget the guard without releasing
        std::mem::forget(stale);

        clock.advance(Duration::from_secs(60));
        assert!(lease.try_acquire().unwrap().is_none(), "not yet expired");

        clock.advance(Duration::from_millis(1));
        let fresh = lease.try_acquire().unwrap().expect("expired lease reusable");
        assert_eq!(lease.current().unwrap().unwrap().holder, fresh.holder());
    }

    #[test]
    fn release_does_not_delete_foreign_lease() {
        let (kv, clock, lease) = setup();
        let old = lease.try_acquire().unwrap().unwrap();
        clock.advance(Duration::from_secs(61));
        let new = lease.try_acquire().unwrap().unwrap();

        old.release();
        let record = lease.current().unwrap().unwrap();
        assert_eq!(record.holder, new.holder());
        drop(new);
        assert_eq!(kv.get("lock:ecb:2023").unwrap(), None);
    }

    #[test]
    fn renew_extends_lease() {
        let (_kv, clock, lease) = setup();
        let mut guard = lease.try_acquire().unwrap().unwrap();
        clock.advance(Duration::from_secs(50));
        assert!(guard.renew().unwrap());
        assert_eq!(lease.current().unwrap().unwrap().acquired_at, 1_050_000);

        // 100s after acquisition, 50s after renewal: still held
        clock.advance(Duration::from_secs(50));
        assert!(lease.try_acquire().unwrap().is_none());

        guard.release();
        assert!(lease.try_acquire().unwrap().is_some());
    }

    #[test]
    fn renew_fails_after_takeover() {
        let (_kv, clock, lease) = setup();
        let mut old = lease.try_acquire().unwrap().unwrap();
        clock.advance(Duration::from_secs(61));
        let new = lease.try_acquire().unwrap().unwrap();

        assert!(!old.renew().unwrap());
        assert_eq!(lease.current().unwrap().unwrap().holder, new.holder());
        drop(old);
        assert_eq!(lease.current().unwrap().unwrap().holder, new.holder());
    }

    #[test]
    fn corrupt_timestamp_reads_as_expired() {
        let (kv, _clock, lease) = setup();
        kv.set(
            "lock:ecb:2023",
            r#"{"holder":"x","acquiredAt":-9223372036854775808}"#,
        )
        .unwrap();
        assert!(lease.try_acquire().unwrap().is_some());
    }

    #[test]
    fn unreadable_record_treated_as_expired() {
        let (kv, _clock, lease) = setup();
        kv.set("lock:ecb:2023", "garbage").unwrap();
        assert!(lease.try_acquire().unwrap().is_some());
    }

    #[test]
    fn acquire_times_out_with_polling() {
        let (_kv, clock, lease) = setup();
        let _held = lease.try_acquire().unwrap().unwrap();

        let err = lease.acquire(Duration::from_millis(450)).err().unwrap();
        match err {
            ResolveError::LockTimeout { key, waited_ms } => {
                assert_eq!(key, "lock:ecb:2023");
                assert_eq!(waited_ms, 450);
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(clock.now_ms(), 1_000_450);
    }

    #[test]
    fn acquire_succeeds_once_lease_expires() {
        let (_kv, clock, lease) = setup();
        std::mem::forget(lease.try_acquire().unwrap().unwrap());

        let guard = lease.acquire(Duration::from_secs(120)).unwrap();
        assert!(clock.now_ms() > 1_060_000);
        drop(guard);
    }
}
