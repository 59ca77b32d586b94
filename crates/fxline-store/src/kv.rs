//! Key-value store capability and in-memory implementation

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;

/// Shared, slow, eventually-consistent string store.
///
/// Callers must not assume atomicity across calls: two concurrent
/// `get`→`set` round trips may interleave and the later write wins.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Write `new` only if the current value equals `expected`
    /// (`None` = key absent). Returns whether the write happened.
    ///
    /// The default is a plain read-compare-write and is NOT atomic; backends
    /// that can do better override it.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        if self.get(key)?.as_deref() != expected {
            return Ok(false);
        }
        self.set(key, new)?;
        Ok(true)
    }

    /// Delete `key` only if its current value equals `expected`. Returns
    /// whether the delete happened. Same atomicity caveat as
    /// [`compare_and_set`](Self::compare_and_set).
    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        if self.get(key)?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.delete(key)
    }
}

/// Process-local store. Atomic `compare_and_set`; used in tests and for
/// single-process runs that do not need persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        // A panicking writer cannot leave a half-written String behind
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries().remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries();
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), new.to_string());
        Ok(true)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries();
        if entries.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn keys_filters_by_prefix() {
        let store = MemoryStore::new();
        for k in ["ecb:2023", "ecb:2024", "ecbx:2024", "lock:ecb:2023", "ratelimit:ecb"] {
            store.set(k, "v").unwrap();
        }
        assert_eq!(store.keys("ecb:").unwrap(), vec!["ecb:2023", "ecb:2024"]);
        assert_eq!(store.keys("lock:").unwrap(), vec!["lock:ecb:2023"]);
        assert_eq!(store.keys("").unwrap().len(), 5);
    }

    #[test]
    fn compare_and_set_absent() {
        let store = MemoryStore::new();
        assert!(store.compare_and_set("k", None, "first").unwrap());
        assert!(!store.compare_and_set("k", None, "second").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn compare_and_set_expected_value() {
        let store = MemoryStore::new();
        store.set("k", "old").unwrap();
        assert!(!store.compare_and_set("k", Some("other"), "new").unwrap());
        assert!(store.compare_and_set("k", Some("old"), "new").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn compare_and_delete_checks_value() {
        let store = MemoryStore::new();
        assert!(!store.compare_and_delete("k", "v").unwrap());
        store.set("k", "new").unwrap();
        assert!(!store.compare_and_delete("k", "old").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("new"));
        assert!(store.compare_and_delete("k", "new").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    /// Store that only implements the required methods, to exercise the default CAS.
    struct PlainStore(MemoryStore);

    impl KvStore for PlainStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.set(key, value)
        }
        fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.0.delete(key)
        }
        fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.0.keys(prefix)
        }
    }

    #[test]
    fn default_compare_and_set() {
        let store = PlainStore(MemoryStore::new());
        assert!(store.compare_and_set("k", None, "a").unwrap());
        assert!(!store.compare_and_set("k", None, "b").unwrap());
        assert!(store.compare_and_set("k", Some("a"), "c").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("c"));
        assert!(!store.compare_and_delete("k", "a").unwrap());
        assert!(store.compare_and_delete("k", "c").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }
}
