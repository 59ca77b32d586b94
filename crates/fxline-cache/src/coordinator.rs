//! Cache-and-fetch coordinator.
//!
//! Per call and partition:
//!
//! ```text
//! CHECK_CACHE ── hit ──→ return
//!      │ miss
//!      ▼
//!    ADMIT ── lease denied (non-blocking) ──→ FALLBACK: serve what is cached
//!      │ granted
//!      ▼
//! CHECK_CACHE again ── hit ──→ return      (someone fetched while we waited)
//!      │ miss
//!      ▼
//! RATE_GATE → renew lease → FETCH whole partition → MERGE_STORE → return
//! ```
//!
//! The rate gate may sleep for most of a window, so the lease is renewed
//! once it opens. A holder whose lease was taken over during that wait
//! backs off like a denied caller instead of fetching.
//!
//! Lookups and the periodic refresh driver both run through [`Coordinator::run`],
//! so lease and rate-limit handling live in one place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use fxline_core::{Clock, DailySeries, FetchError, Fetcher, PartitionUnit, retry_fixed};
use fxline_store::{KvStore, Partition, PartitionStore};

use crate::config::{AdmissionPolicy, ConfigError, SourceConfig};
use crate::error::{Lookup, ResolveError};
use crate::freshness::{self, Decision};
use crate::lease::{LeaseGuard, LeaseLock};
use crate::rate_limit::RateLimiter;

/// How the refresh driver treats an existing partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Refetch and replace the whole partition (in-progress year).
    Replace,
    /// Fetch only if absent or not yet sealed (past years).
    IfAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Fetched { entries: usize },
    /// Cached data already satisfies the mode
    Fresh,
    /// Lease held elsewhere (non-blocking policy)
    Busy,
}

/// What a single pass decided to do with one partition.
#[derive(Debug, Clone, Copy)]
enum Intent {
    Lookup(NaiveDate),
    Refresh { mode: RefreshMode, started_at: i64 },
}

/// Result of one pass: the partition data the caller should read from.
#[derive(Debug)]
enum Served {
    Cached(Option<Partition>),
    Fallback(Option<Partition>),
    Fetched(Partition),
}

impl Served {
    fn partition(&self) -> Option<&Partition> {
        match self {
            Self::Cached(p) | Self::Fallback(p) => p.as_ref(),
            Self::Fetched(p) => Some(p),
        }
    }
}

pub struct Coordinator {
    source_id: String,
    config: SourceConfig,
    kv: Arc<dyn KvStore>,
    partitions: PartitionStore,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
}

impl Coordinator {
    pub fn new(
        source_id: impl Into<String>,
        config: SourceConfig,
        kv: Arc<dyn KvStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let source_id = source_id.into();
        if source_id.is_empty() || source_id.contains(':') {
            return Err(ConfigError(format!("invalid source id: {source_id:?}")));
        }
        config.validate()?;
        let limiter = RateLimiter::new(&source_id, &config, kv.clone(), clock.clone());
        Ok(Self {
            partitions: PartitionStore::new(kv.clone()),
            source_id,
            config,
            kv,
            fetcher,
            clock,
            limiter,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn partitions(&self) -> &PartitionStore {
        &self.partitions
    }

    pub fn requires_ticker(&self) -> bool {
        self.fetcher.requires_ticker()
    }

    /// Today in the source's reference timezone.
    pub fn today(&self) -> NaiveDate {
        self.clock.today(self.config.utc_offset())
    }

    /// Lookup entry point: value for an ISO `yyyy-MM-dd` date.
    pub fn get_value(&self, ticker: Option<&str>, date: &str) -> Result<Lookup, ResolveError> {
        let date = parse_date(date)?;
        self.get_value_on(ticker, date)
    }

    /// Lookup for an already-parsed date.
    ///
    /// Fails fast with `NotYetAvailable` for today and later, before any
    /// store or network access.
    pub fn get_value_on(
        &self,
        ticker: Option<&str>,
        date: NaiveDate,
    ) -> Result<Lookup, ResolveError> {
        let today = self.today();
        if date >= today {
            return Err(ResolveError::NotYetAvailable { date, today });
        }
        let unit = self.unit_for(ticker, date.year())?;
        self.resolve(&unit, date)
    }

    /// Build the partition unit for a lookup, validating the ticker.
    pub fn unit_for(&self, ticker: Option<&str>, year: i32) -> Result<PartitionUnit, ResolveError> {
        match (self.requires_ticker(), ticker) {
            (true, Some(t)) => Ok(PartitionUnit::ticker_year(normalize_ticker(t)?, year)),
            (true, None) => Err(ResolveError::InvalidArgument(format!(
                "source {} needs a ticker",
                self.source_id
            ))),
            (false, Some(t)) => Err(ResolveError::InvalidArgument(format!(
                "source {} takes no ticker (got {t:?})",
                self.source_id
            ))),
            (false, None) => Ok(PartitionUnit::year(year)),
        }
    }

    /// Resolve `date` inside `unit`, fetching the partition when required.
    pub fn resolve(&self, unit: &PartitionUnit, date: NaiveDate) -> Result<Lookup, ResolveError> {
        if !unit.contains(date) {
            return Err(ResolveError::InvalidArgument(format!(
                "{date} is outside partition {unit}"
            )));
        }
        let served = self.with_admission(unit, Intent::Lookup(date))?;
        if let Served::Fallback(_) = served {
            log::debug!("{}: served fallback for {date}", unit.key(&self.source_id));
        }
        Ok(Lookup::from_partition(served.partition(), date))
    }

    /// Refresh one partition through the same lease and rate-limit path as lookups.
    pub fn refresh_partition(
        &self,
        unit: &PartitionUnit,
        mode: RefreshMode,
    ) -> Result<RefreshOutcome, ResolveError> {
        let intent = Intent::Refresh {
            mode,
            started_at: self.clock.now_ms(),
        };
        Ok(match self.with_admission(unit, intent)? {
            Served::Cached(_) => RefreshOutcome::Fresh,
            Served::Fallback(_) => RefreshOutcome::Busy,
            Served::Fetched(p) => RefreshOutcome::Fetched { entries: p.len() },
        })
    }

    /// Flush entry point: delete every partition of this source.
    ///
    /// Leases and the rate-limit window are left alone. Individual delete
    /// failures are logged and skipped.
    pub fn flush_cache(&self) -> usize {
        let prefix = format!("{}:", self.source_id);
        let keys = match self.partitions.list_keys(&prefix) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("flush {}: cannot list partitions: {e}", self.source_id);
                return 0;
            }
        };
        let mut removed = 0;
        for key in &keys {
            match self.partitions.delete(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => log::warn!("flush {}: cannot delete {key}: {e}", self.source_id),
            }
        }
        log::info!("flush {}: removed {removed} partitions", self.source_id);
        removed
    }

    /// Run one pass under the configured admission policy. The blocking
    /// policy retries lease timeouts with a fixed backoff, then gives up
    /// with `FetchUnavailable`.
    fn with_admission(&self, unit: &PartitionUnit, intent: Intent) -> Result<Served, ResolveError> {
        let AdmissionPolicy::Blocking {
            max_attempts,
            backoff_ms,
            ..
        } = self.config.admission
        else {
            return self.run(unit, intent);
        };

        let key = unit.key(&self.source_id);
        retry_fixed(
            &key,
            max_attempts,
            Duration::from_millis(backoff_ms),
            self.clock.as_ref(),
            ResolveError::is_lock_timeout,
            || self.run(unit, intent),
        )
        .map_err(|(e, attempts)| match e {
            ResolveError::LockTimeout { .. } => {
                log::warn!("{key}: lease busy after {attempts} attempts");
                ResolveError::FetchUnavailable { key, attempts }
            }
            other => other,
        })
    }

    fn run(&self, unit: &PartitionUnit, intent: Intent) -> Result<Served, ResolveError> {
        let key = unit.key(&self.source_id);
        let cached = self.partitions.load(&key)?;
        if self.is_hit(unit, cached.as_ref(), &intent) {
            log::debug!("{key}: cache hit");
            return Ok(Served::Cached(cached));
        }

        let Some(mut guard) = self.admit(&key)? else {
            log::debug!("{key}: lease busy, falling back to cached data");
            return Ok(Served::Fallback(cached));
        };
        let result = self.fetch_under_lease(unit, &key, &intent, &mut guard);
        guard.release();
        result
    }

    /// Lease lost to another execution before fetching: behave as if it
    /// had been denied.
    fn lease_lost(&self, key: &str, cached: Option<Partition>) -> Result<Served, ResolveError> {
        if self.config.admission.is_blocking() {
            return Err(ResolveError::LockTimeout {
                key: format!("lock:{key}"),
                waited_ms: self.config.lease_timeout_ms,
            });
        }
        Ok(Served::Fallback(cached))
    }

    /// Acquire the partition lease. `None` = denied under the non-blocking policy.
    fn admit(&self, key: &str) -> Result<Option<LeaseGuard>, ResolveError> {
        let lease = LeaseLock::new(
            self.kv.clone(),
            self.clock.clone(),
            format!("lock:{key}"),
            self.config.lease_timeout(),
        )
        .with_poll(self.config.lease_poll());

        match self.config.admission {
            AdmissionPolicy::Blocking { wait_ms, .. } => {
                Ok(Some(lease.acquire(Duration::from_millis(wait_ms))?))
            }
            AdmissionPolicy::NonBlocking => Ok(lease.try_acquire()?),
        }
    }

    fn fetch_under_lease(
        &self,
        unit: &PartitionUnit,
        key: &str,
        intent: &Intent,
        guard: &mut LeaseGuard,
    ) -> Result<Served, ResolveError> {
        // Another execution may have completed the fetch while we waited
        let cached = self.partitions.load(key)?;
        if self.is_hit(unit, cached.as_ref(), intent) {
            log::debug!("{key}: populated by another execution");
            return Ok(Served::Cached(cached));
        }

        self.limiter.admit()?;
        if !guard.renew()? {
            return self.lease_lost(key, cached);
        }
        log::info!("{key}: fetching {unit}");
        let fetched = self.fetcher.fetch(unit).map_err(|source| ResolveError::Fetch {
            key: key.to_string(),
            source,
        })?;
        let series = retain_year(key, unit, fetched);
        if series.is_empty() {
            return Err(ResolveError::Fetch {
                key: key.to_string(),
                source: FetchError::Empty(key.to_string()),
            });
        }

        let now = self.clock.now_ms();
        let partition = match intent {
            Intent::Refresh {
                mode: RefreshMode::Replace,
                ..
            } => Partition::new(series, now),
            _ => {
                // Merge over whatever is stored now, not what we read before
                // the fetch: a concurrent writer may have added entries.
                let mut base = self
                    .partitions
                    .load(key)?
                    .unwrap_or_else(|| Partition::new(DailySeries::new(), now));
                base.merge(&series, now);
                base
            }
        };
        self.partitions.store(key, &partition)?;
        log::info!("{key}: stored {} entries", partition.len());
        Ok(Served::Fetched(partition))
    }

    fn is_hit(&self, unit: &PartitionUnit, cached: Option<&Partition>, intent: &Intent) -> bool {
        match *intent {
            Intent::Lookup(date) => {
                freshness::decide(cached, date, self.clock.now_ms(), &self.config) == Decision::Hit
            }
            Intent::Refresh {
                mode: RefreshMode::IfAbsent,
                ..
            } => cached
                .is_some_and(|p| freshness::is_sealed(p, unit.year, self.config.utc_offset())),
            Intent::Refresh {
                mode: RefreshMode::Replace,
                started_at,
            } => cached.is_some_and(|p| p.fetched_at >= started_at),
        }
    }
}

/// Drop fetched entries outside the partition's year.
fn retain_year(key: &str, unit: &PartitionUnit, mut series: DailySeries) -> DailySeries {
    let before = series.len();
    series.retain(|date, _| unit.contains(*date));
    let dropped = before - series.len();
    if dropped > 0 {
        log::warn!("{key}: dropped {dropped} entries outside {}", unit.year);
    }
    series
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, ResolveError> {
    let trimmed = s.trim();
    if trimmed.len() != 10 {
        return Err(ResolveError::InvalidArgument(format!(
            "expected yyyy-MM-dd, got {s:?}"
        )));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|e| ResolveError::InvalidArgument(format!("invalid date {s:?}: {e}")))
}

fn normalize_ticker(ticker: &str) -> Result<String, ResolveError> {
    let t = ticker.trim();
    let valid = !t.is_empty()
        && t.len() <= 32
        && t
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '_'));
    if !valid {
        return Err(ResolveError::InvalidArgument(format!(
            "invalid ticker {ticker:?}"
        )));
    }
    Ok(t.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_iso() {
        assert_eq!(
            parse_date("2023-06-15").unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 15).unwrap()
        );
        assert_eq!(
            parse_date(" 2024-02-29 ").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }

    #[test]
    fn parse_date_rejects_garbage() {
        for bad in ["", "2023-02-30", "2023-6-1", "15/06/2023", "2023-06-15T00:00"] {
            assert!(
                matches!(parse_date(bad), Err(ResolveError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn ticker_normalization() {
        assert_eq!(normalize_ticker(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_ticker("brk-b").unwrap(), "BRK-B");
        assert_eq!(normalize_ticker("^gspc").unwrap(), "^GSPC");
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("AA:PL").is_err());
        assert!(normalize_ticker("a b").is_err());
    }

    #[test]
    fn retain_year_drops_foreign_dates() {
        let unit = PartitionUnit::year(2023);
        let series: DailySeries = [
            (NaiveDate::from_ymd_opt(2022, 12, 30).unwrap(), 1.0),
            (NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(), 2.0),
        ]
        .into_iter()
        .collect();
        let kept = retain_year("k", &unit, series);
        assert_eq!(kept.len(), 1);
    }
}
