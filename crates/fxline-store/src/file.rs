//! Durable file-backed store
//!
//! Directory layout:
//! ```text
//! {dir}/
//! ├── ecb-usd%3A2023            # one file per key (percent-encoded)
//! ├── lock%3Aecb-usd%3A2024
//! ├── ratelimit%3Aecb-usd
//! └── ecb-usd%3A2024.tmp-42-7   # in-flight write (skipped by keys())
//! ```
//!
//! Writes go to a temp file first and are renamed into place, so readers
//! see either the old or the new value, never a torn one. Shared by all
//! processes pointing at the same directory.
//!
//! Conditional writes and deletes are atomic against each other:
//! - absent key: the new value is hard-linked into place, which fails if
//!   the key exists;
//! - expected value: the current file is first renamed to a private claim
//!   name. Only one racer can move it, and the winner checks the claimed
//!   contents before linking the new value in.
//!
//! While a claim is in flight the key reads as absent, so a concurrent
//! absent-key write can win instead; either way at most one writer succeeds.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::kv::KvStore;

/// Marker separating an encoded key from a temp-file suffix.
/// Encoded keys never contain '.', so anything with a dot is not a key.
const TMP_MARKER: &str = ".tmp-";

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }

    fn tmp_path_for(&self, key: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}{TMP_MARKER}{}-{seq}",
            encode_key(key),
            std::process::id()
        ))
    }

    fn write_tmp(&self, key: &str, value: &str) -> Result<PathBuf, StoreError> {
        let tmp = self.tmp_path_for(key);
        fs::write(&tmp, value).map_err(|e| StoreError::io(&tmp, e))?;
        Ok(tmp)
    }

    /// Atomically move the current value of `key` out of the way if it
    /// equals `expected`. Returns the claim path, which the caller removes.
    fn claim(&self, key: &str, expected: &str) -> Result<Option<PathBuf>, StoreError> {
        let path = self.path_for(key);
        let claim = self.tmp_path_for(key);
        match fs::rename(&path, &claim) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        }
        let held = fs::read_to_string(&claim).map_err(|e| StoreError::io(&claim, e))?;
        if held == expected {
            return Ok(Some(claim));
        }

        // Not the value we expected: put it back unless someone wrote the
        // key in the meantime.
        match fs::hard_link(&claim, &path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::warn!("{key}: replaced while claimed, dropping claimed value");
            }
            Err(e) => {
                let _ = fs::remove_file(&claim);
                return Err(StoreError::io(path, e));
            }
        }
        let _ = fs::remove_file(&claim);
        Ok(None)
    }

    /// Link a fully written temp file into place; fails if the key exists.
    fn link_new(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let tmp = self.write_tmp(key, value)?;
        let path = self.path_for(key);
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Remove temp files left behind by crashed writers.
    pub fn cleanup_tmp(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for path in self.entries()? {
            let is_tmp = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().contains(TMP_MARKER));
            if is_tmp {
                log::info!("cleaning stale tmp: {}", path.display());
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn entries(&self) -> Result<Vec<PathBuf>, StoreError> {
        let pattern = format!("{}/*", glob::Pattern::escape(&self.dir.to_string_lossy()));
        let paths = glob::glob(&pattern)
            .map_err(|e| StoreError::Backend(format!("invalid glob pattern: {e}")))?
            .filter_map(|e| e.ok())
            .filter(|p| p.is_file())
            .collect();
        Ok(paths)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let tmp = self.write_tmp(key, value)?;
        let path = self.path_for(key);
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(&path, e)
        })
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .entries()?
            .iter()
            .filter_map(|p| p.file_name())
            .filter_map(|n| decode_key(&n.to_string_lossy()))
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        let Some(expected) = expected else {
            return self.link_new(key, new);
        };
        let Some(claim) = self.claim(key, expected)? else {
            return Ok(false);
        };
        let linked = self.link_new(key, new);
        let _ = fs::remove_file(&claim);
        linked
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let Some(claim) = self.claim(key, expected)? else {
            return Ok(false);
        };
        fs::remove_file(&claim).map_err(|e| StoreError::io(&claim, e))?;
        Ok(true)
    }
}

/// Percent-encode everything except `[A-Za-z0-9_-]`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_key`]. `None` for names that are not encoded keys.
fn decode_key(name: &str) -> Option<String> {
    if name.contains('.') {
        return None;
    }
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn encode_decode_key() {
        let key = "lock:stocks:BRK.B:2024";
        let encoded = encode_key(key);
        assert!(!encoded.contains(':'));
        assert!(!encoded.contains('.'));
        assert_eq!(decode_key(&encoded).as_deref(), Some(key));
    }

    #[test]
    fn decode_rejects_tmp_names() {
        assert_eq!(decode_key("ecb%3A2023.tmp-1-0"), None);
        assert_eq!(decode_key("bad%Z1"), None);
    }

    #[test]
    fn open_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        FileStore::open(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn set_get_delete() {
        let (_dir, store) = open_tmp();
        assert_eq!(store.get("ecb:2023").unwrap(), None);
        store.set("ecb:2023", "{}").unwrap();
        assert_eq!(store.get("ecb:2023").unwrap().as_deref(), Some("{}"));
        store.set("ecb:2023", "{\"x\":1}").unwrap();
        assert_eq!(store.get("ecb:2023").unwrap().as_deref(), Some("{\"x\":1}"));
        assert!(store.delete("ecb:2023").unwrap());
        assert!(!store.delete("ecb:2023").unwrap());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path()).unwrap().set("k", "v").unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn keys_skip_tmp_and_filter_prefix() {
        let (dir, store) = open_tmp();
        store.set("ecb:2023", "a").unwrap();
        store.set("ecb:2024", "b").unwrap();
        store.set("lock:ecb:2024", "c").unwrap();
        fs::write(dir.path().join("ecb%3A2025.tmp-1-0"), "partial").unwrap();

        assert_eq!(store.keys("ecb:").unwrap(), vec!["ecb:2023", "ecb:2024"]);
        assert_eq!(store.keys("").unwrap().len(), 3);
    }

    #[test]
    fn compare_and_set_absent_is_exclusive() {
        let (_dir, store) = open_tmp();
        assert!(store.compare_and_set("lock:k", None, "a").unwrap());
        assert!(!store.compare_and_set("lock:k", None, "b").unwrap());
        assert_eq!(store.get("lock:k").unwrap().as_deref(), Some("a"));
        // No temp files left behind
        assert_eq!(store.cleanup_tmp().unwrap(), 0);
    }

    #[test]
    fn compare_and_set_expected() {
        let (_dir, store) = open_tmp();
        store.set("k", "old").unwrap();
        assert!(!store.compare_and_set("k", Some("nope"), "new").unwrap());
        assert!(store.compare_and_set("k", Some("old"), "new").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn compare_and_set_expected_leaves_no_claims() {
        let (_dir, store) = open_tmp();
        store.set("k", "old").unwrap();
        assert!(!store.compare_and_set("k", Some("nope"), "new").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("old"));
        assert!(!store.compare_and_set("missing", Some("old"), "new").unwrap());
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.cleanup_tmp().unwrap(), 0);
    }

    #[test]
    fn compare_and_delete_checks_value() {
        let (_dir, store) = open_tmp();
        store.set("lock:k", "mine").unwrap();
        assert!(!store.compare_and_delete("lock:k", "theirs").unwrap());
        assert_eq!(store.get("lock:k").unwrap().as_deref(), Some("mine"));
        assert!(store.compare_and_delete("lock:k", "mine").unwrap());
        assert_eq!(store.get("lock:k").unwrap(), None);
        assert!(!store.compare_and_delete("lock:k", "mine").unwrap());
        assert_eq!(store.cleanup_tmp().unwrap(), 0);
    }

    #[test]
    fn concurrent_takeover_has_one_winner() {
        let (_dir, store) = open_tmp();
        store.set("lock:k", "expired").unwrap();
        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || {
                        store
                            .compare_and_set("lock:k", Some("expired"), &format!("holder-{i}"))
                            .unwrap() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(wins, 1);
        let value = store.get("lock:k").unwrap().unwrap();
        assert!(value.starts_with("holder-"), "{value}");
    }

    #[test]
    fn cleanup_tmp_removes_stale() {
        let (dir, store) = open_tmp();
        store.set("real", "v").unwrap();
        fs::write(dir.path().join("a.tmp-1-0"), "x").unwrap();
        fs::write(dir.path().join("b.tmp-2-3"), "y").unwrap();
        assert_eq!(store.cleanup_tmp().unwrap(), 2);
        assert_eq!(store.get("real").unwrap().as_deref(), Some("v"));
    }
}
