//! Partition units and the upstream fetch contract

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;

use crate::error::FetchError;

/// One partition worth of daily values, keyed by calendar date.
pub type DailySeries = BTreeMap<NaiveDate, f64>;

/// Unit of caching and locking: one calendar year, optionally per ticker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionUnit {
    pub ticker: Option<String>,
    pub year: i32,
}

impl PartitionUnit {
    pub fn year(year: i32) -> Self {
        Self { ticker: None, year }
    }

    pub fn ticker_year(ticker: impl Into<String>, year: i32) -> Self {
        Self {
            ticker: Some(ticker.into()),
            year,
        }
    }

    /// Store key: `<sourceId>:<year>` or `<sourceId>:<ticker>:<year>`.
    pub fn key(&self, source_id: &str) -> String {
        match &self.ticker {
            Some(t) => format!("{source_id}:{t}:{}", self.year),
            None => format!("{source_id}:{}", self.year),
        }
    }

    /// Inverse of [`key`](Self::key). Returns `None` for keys of other sources.
    pub fn parse_key(source_id: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(source_id)?.strip_prefix(':')?;
        match rest.rsplit_once(':') {
            Some((ticker, year)) if !ticker.is_empty() && !ticker.contains(':') => {
                Some(Self::ticker_year(ticker, year.parse().ok()?))
            }
            Some(_) => None,
            None => Some(Self::year(rest.parse().ok()?)),
        }
    }

    /// Whether `date` belongs to this partition.
    pub fn contains(&self, date: NaiveDate) -> bool {
        chrono::Datelike::year(&date) == self.year
    }
}

impl fmt::Display for PartitionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ticker {
            Some(t) => write!(f, "{t}/{}", self.year),
            None => write!(f, "{}", self.year),
        }
    }
}

/// Upstream adapter: retrieves and parses one whole partition.
///
/// Implementations are plain I/O: no caching, no retries. Errors surface to
/// the caller of the coordinator unchanged.
pub trait Fetcher: Send + Sync {
    /// Whether partitions of this source are keyed per ticker.
    fn requires_ticker(&self) -> bool {
        false
    }

    fn fetch(&self, unit: &PartitionUnit) -> Result<DailySeries, FetchError>;
}
