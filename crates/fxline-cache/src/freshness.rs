//! Freshness horizon: when cached partition data is trusted without a fetch.
//!
//! - A requested date that is present is always served.
//! - A sealed year (fetched after the year fully elapsed) never changes
//!   upstream, so it is served as-is even when the date is absent.
//! - An in-progress year only grows at its end. A date absent while a later
//!   date exists was correctly absent (weekend, holiday). A date past the
//!   last cached one may have been published since: refresh, unless the
//!   partition is younger than the configured cache TTL.

use chrono::{Datelike, FixedOffset, NaiveDate};
use fxline_core::clock::date_at;
use fxline_store::Partition;

use crate::config::SourceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hit,
    Refresh(RefreshReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Nothing cached for the partition
    Missing,
    /// Requested date is at or past the last cached date of a growing year
    Boundary,
}

/// Whether the partition for `year` was fetched after the year ended in
/// the source timezone, i.e. holds the complete history.
pub fn is_sealed(partition: &Partition, year: i32, offset: FixedOffset) -> bool {
    date_at(partition.fetched_at, offset).year() > year
}

pub fn decide(
    partition: Option<&Partition>,
    date: NaiveDate,
    now_ms: i64,
    config: &SourceConfig,
) -> Decision {
    let Some(p) = partition else {
        return Decision::Refresh(RefreshReason::Missing);
    };
    if p.value(date).is_some() {
        return Decision::Hit;
    }
    if is_sealed(p, date.year(), config.utc_offset()) {
        return Decision::Hit;
    }
    if p.has_later_than(date) {
        return Decision::Hit;
    }
    if let Some(ttl) = config.cache_ttl_ms {
        if now_ms.saturating_sub(p.fetched_at) < ttl as i64 {
            return Decision::Hit;
        }
    }
    Decision::Refresh(RefreshReason::Boundary)
}
