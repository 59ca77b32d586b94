//! fxline-store: Shared key-value substrate for cache coordination
//!
//! Every execution of the lookup function sees the same store. It is the
//! only coordination medium: partition data, leases and rate-limit windows
//! all live here as string values under string keys. No multi-key
//! transactions are assumed.

pub mod error;
pub mod file;
pub mod kv;
pub mod partition;

pub use error::StoreError;
pub use file::FileStore;
pub use kv::{KvStore, MemoryStore};
pub use partition::{Partition, PartitionStore};
