//! Lookup results and caller-visible failures

use chrono::NaiveDate;
use fxline_core::FetchError;
use fxline_store::{Partition, StoreError};

/// Result of a lookup. `NoData` is a valid answer, not an error: upstream
/// published nothing for that date (weekend, holiday).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup {
    Value(f64),
    NoData,
}

impl Lookup {
    pub fn from_partition(partition: Option<&Partition>, date: NaiveDate) -> Self {
        partition
            .and_then(|p| p.value(date))
            .map_or(Self::NoData, Self::Value)
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            Self::NoData => None,
        }
    }

    pub fn is_no_data(self) -> bool {
        matches!(self, Self::NoData)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Malformed date or ticker. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested date is today or later in the source timezone. Never retried.
    #[error("no data available yet for {date} (today is {today})")]
    NotYetAvailable { date: NaiveDate, today: NaiveDate },

    /// Upstream failed or returned nothing usable. Not retried within the call.
    #[error("fetch failed for {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: FetchError,
    },

    /// Lease not acquired within the wait bound.
    #[error("lease {key} not acquired within {waited_ms}ms")]
    LockTimeout { key: String, waited_ms: u64 },

    /// Lease stayed busy through every blocking-policy retry.
    #[error("fetch unavailable for {key}: lease busy after {attempts} attempts")]
    FetchUnavailable { key: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
