//! fxline-cache: Year-partitioned cache-and-fetch coordination
//!
//! Sits between a caller that asks for one date at a time (possibly from
//! many concurrent executions) and an upstream that is slow, rate limited
//! and only answers whole years. All coordination state lives in the
//! shared [`KvStore`](fxline_store::KvStore):
//!
//! - partition data under `<sourceId>:<year>`
//! - partition leases under `lock:<sourceId>:<year>`
//! - the sliding rate-limit window under `ratelimit:<sourceId>`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fxline_cache::{Coordinator, Lookup, SourceConfig};
//!
//! let coord = Coordinator::new("ecb-usd", SourceConfig::default(), store, fetcher, clock)?;
//! match coord.get_value(None, "2023-06-15")? {
//!     Lookup::Value(v) => println!("{v}"),
//!     Lookup::NoData => println!("no rate published"),
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod lease;
pub mod rate_limit;
pub mod refresh;

pub use config::{AdmissionPolicy, ConfigError, SourceConfig};
pub use coordinator::{Coordinator, RefreshMode, RefreshOutcome};
pub use error::{Lookup, ResolveError};
pub use lease::{LeaseGuard, LeaseLock, LeaseRecord};
pub use rate_limit::RateLimiter;
pub use refresh::RefreshSummary;
