//! Periodic full refresh: current year replaced, past years backfilled.
//!
//! Runs through [`Coordinator::refresh_partition`], i.e. the same lease and
//! rate-limit path as on-demand lookups.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use chrono::Datelike;
use fxline_core::PartitionUnit;

use crate::coordinator::{Coordinator, RefreshMode, RefreshOutcome};
use crate::error::ResolveError;

#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub fetched: usize,
    /// Partitions whose cached data already satisfied the refresh mode
    pub skipped: usize,
    pub busy: usize,
    pub failed: Vec<(PartitionUnit, String)>,
    /// Entries written across all fetched partitions
    pub entries: usize,
}

impl RefreshSummary {
    pub fn total(&self) -> usize {
        self.fetched + self.skipped + self.busy + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, unit: &PartitionUnit, result: &Result<RefreshOutcome, ResolveError>) {
        match result {
            Ok(RefreshOutcome::Fetched { entries }) => {
                self.fetched += 1;
                self.entries += entries;
            }
            Ok(RefreshOutcome::Fresh) => self.skipped += 1,
            Ok(RefreshOutcome::Busy) => self.busy += 1,
            Err(e) => self.failed.push((unit.clone(), e.to_string())),
        }
    }
}

impl std::fmt::Display for RefreshSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} fetched ({} entries), {} skipped, {} busy, {} failed",
            self.fetched,
            self.entries,
            self.skipped,
            self.busy,
            self.failed.len()
        )
    }
}

impl Coordinator {
    /// Mode the refresh driver applies to `unit`.
    pub fn refresh_mode(&self, unit: &PartitionUnit) -> RefreshMode {
        if unit.year >= self.today().year() {
            RefreshMode::Replace
        } else {
            RefreshMode::IfAbsent
        }
    }

    /// Every partition the refresh driver covers: what the store already
    /// holds for this source plus the configured backfill horizon.
    ///
    /// For per-ticker sources the horizon is expanded over `tickers`; stored
    /// partitions of other tickers are still included.
    pub fn known_units(&self, tickers: &[String]) -> Result<Vec<PartitionUnit>, ResolveError> {
        let current = self.today().year();
        let first = current - self.config().history_years.saturating_sub(1) as i32;

        let mut units: BTreeSet<PartitionUnit> = BTreeSet::new();
        let prefix = format!("{}:", self.source_id());
        for key in self.partitions().list_keys(&prefix)? {
            match PartitionUnit::parse_key(self.source_id(), &key) {
                Some(unit) if unit.year <= current => {
                    units.insert(unit);
                }
                Some(_) => log::debug!("refresh: ignoring future partition {key}"),
                None => log::warn!("refresh: unrecognised key {key}"),
            }
        }

        if self.requires_ticker() {
            for ticker in tickers {
                for year in first..=current {
                    units.insert(self.unit_for(Some(ticker.as_str()), year)?);
                }
            }
        } else {
            units.extend((first..=current).map(PartitionUnit::year));
        }
        Ok(units.into_iter().collect())
    }

    /// Refresh `units` in order, continuing past individual failures.
    ///
    /// `on_done` sees each finished unit; returning `Break` stops early
    /// (e.g. on shutdown).
    pub fn refresh_units(
        &self,
        units: &[PartitionUnit],
        mut on_done: impl FnMut(&PartitionUnit, &Result<RefreshOutcome, ResolveError>) -> ControlFlow<()>,
    ) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        for unit in units {
            let mode = self.refresh_mode(unit);
            let result = self.refresh_partition(unit, mode);
            if let Err(e) = &result {
                log::error!("refresh {}: {e}", unit.key(self.source_id()));
            }
            summary.record(unit, &result);
            if on_done(unit, &result).is_break() {
                log::info!("refresh {}: stopped early", self.source_id());
                break;
            }
        }
        summary
    }

    /// Periodic refresh entry point. Idempotent: running it twice in a row
    /// refetches only the current year.
    pub fn refresh_all(&self, tickers: &[String]) -> Result<RefreshSummary, ResolveError> {
        let units = self.known_units(tickers)?;
        log::info!("refresh {}: {} partitions", self.source_id(), units.len());
        let summary = self.refresh_units(&units, |_, _| ControlFlow::Continue(()));
        log::info!("refresh {}: {summary}", self.source_id());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts() {
        let mut s = RefreshSummary::default();
        let u = PartitionUnit::year(2024);
        s.record(&u, &Ok(RefreshOutcome::Fetched { entries: 250 }));
        s.record(&u, &Ok(RefreshOutcome::Fresh));
        s.record(&u, &Ok(RefreshOutcome::Busy));
        s.record(&u, &Err(ResolveError::InvalidArgument("x".into())));
        assert_eq!(s.total(), 4);
        assert!(!s.is_success());
        assert_eq!(
            s.to_string(),
            "1 fetched (250 entries), 1 skipped, 1 busy, 1 failed"
        );
    }
}
