//! Partition records: one year of daily values for one source.
//!
//! Persisted as `{"dates":{"2023-06-15":1.0875},"fetchedAt":1700000000000}`
//! under `<sourceId>:<year>` or `<sourceId>:<ticker>:<year>`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use fxline_core::DailySeries;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::kv::KvStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub dates: DailySeries,
    /// Epoch ms of the last successful fetch
    pub fetched_at: i64,
}

impl Partition {
    pub fn new(dates: DailySeries, fetched_at: i64) -> Self {
        Self { dates, fetched_at }
    }

    pub fn value(&self, date: NaiveDate) -> Option<f64> {
        self.dates.get(&date).copied()
    }

    /// Most recent date with a published value.
    pub fn max_date(&self) -> Option<NaiveDate> {
        self.dates.keys().next_back().copied()
    }

    /// Whether any value exists strictly after `date`.
    pub fn has_later_than(&self, date: NaiveDate) -> bool {
        self.max_date().is_some_and(|max| max > date)
    }

    /// Merge `incoming` over the current entries (incoming wins per date).
    /// Entries are never removed.
    pub fn merge(&mut self, incoming: &DailySeries, fetched_at: i64) {
        self.dates
            .extend(incoming.iter().map(|(date, value)| (*date, *value)));
        self.fetched_at = self.fetched_at.max(fetched_at);
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Partition Store adapter over the shared key-value store.
///
/// No atomicity across calls: concurrent `load`→`store` round trips are
/// last-writer-wins. Callers tolerate this because upstream data for a
/// date never changes meaning, so a lost merge only costs a re-fetch.
#[derive(Clone)]
pub struct PartitionStore {
    kv: Arc<dyn KvStore>,
}

impl PartitionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Load a partition. Corrupt records are logged and treated as absent.
    pub fn load(&self, key: &str) -> Result<Option<Partition>, StoreError> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Partition>(&raw) {
            Ok(p) => Ok(Some(p)),
            Err(e) => {
                log::warn!("corrupt partition {key}: {e}, ignoring");
                Ok(None)
            }
        }
    }

    pub fn store(&self, key: &str, partition: &Partition) -> Result<(), StoreError> {
        let json = serde_json::to_string(partition).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.kv.set(key, &json)
    }

    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.kv.delete(key)
    }

    pub fn list_keys(&self, prefix: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.kv.keys(prefix)?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(points: &[(NaiveDate, f64)]) -> DailySeries {
        points.iter().copied().collect()
    }

    #[test]
    fn persisted_layout() {
        let p = Partition::new(series(&[(ymd(2023, 6, 15), 1.0875)]), 1_700_000_000_000);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(
            json,
            r#"{"dates":{"2023-06-15":1.0875},"fetchedAt":1700000000000}"#
        );
    }

    #[test]
    fn parses_persisted_layout() {
        let raw = r#"{"dates":{"2023-01-02":1.0683,"2023-01-03":1.0545},"fetchedAt":5}"#;
        let p: Partition = serde_json::from_str(raw).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.value(ymd(2023, 1, 3)), Some(1.0545));
        assert_eq!(p.fetched_at, 5);
    }

    #[test]
    fn max_and_later() {
        let p = Partition::new(
            series(&[(ymd(2025, 6, 9), 1.0), (ymd(2025, 6, 10), 2.0)]),
            0,
        );
        assert_eq!(p.max_date(), Some(ymd(2025, 6, 10)));
        assert!(p.has_later_than(ymd(2025, 6, 9)));
        assert!(!p.has_later_than(ymd(2025, 6, 10)));
        assert!(!p.has_later_than(ymd(2025, 6, 11)));
    }

    #[test]
    fn merge_keeps_existing_and_overwrites_same_date() {
        let mut p = Partition::new(
            series(&[(ymd(2025, 1, 2), 1.0), (ymd(2025, 1, 3), 2.0)]),
            10,
        );
        p.merge(&series(&[(ymd(2025, 1, 3), 2.5), (ymd(2025, 1, 6), 3.0)]), 20);
        assert_eq!(p.len(), 3);
        assert_eq!(p.value(ymd(2025, 1, 2)), Some(1.0));
        assert_eq!(p.value(ymd(2025, 1, 3)), Some(2.5));
        assert_eq!(p.fetched_at, 20);
    }

    #[test]
    fn store_load_delete() {
        let store = PartitionStore::new(Arc::new(MemoryStore::new()));
        let p = Partition::new(series(&[(ymd(2023, 6, 15), 1.0875)]), 1);
        store.store("ecb-usd:2023", &p).unwrap();
        assert_eq!(store.load("ecb-usd:2023").unwrap(), Some(p));
        assert!(store.delete("ecb-usd:2023").unwrap());
        assert_eq!(store.load("ecb-usd:2023").unwrap(), None);
    }

    #[test]
    fn corrupt_record_reads_as_absent() {
        let kv = Arc::new(MemoryStore::new());
        kv.set("ecb-usd:2023", "{not json").unwrap();
        let store = PartitionStore::new(kv);
        assert_eq!(store.load("ecb-usd:2023").unwrap(), None);
    }

    #[test]
    fn list_keys_by_prefix() {
        let kv = Arc::new(MemoryStore::new());
        for k in ["ecb-usd:2023", "ecb-usd:2024", "lock:ecb-usd:2024"] {
            kv.set(k, "{}").unwrap();
        }
        let store = PartitionStore::new(kv);
        let keys = store.list_keys("ecb-usd:").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("ecb-usd:2024"));
    }
}
