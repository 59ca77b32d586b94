//! fxline Core - Common infrastructure for per-day financial data lookups
//!
//! This crate provides the capabilities shared by the cache coordinator and
//! the upstream adapters: clocks, the fetch contract, HTTP plumbing,
//! logging and progress reporting.

pub mod clock;
pub mod error;
pub mod http;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod source;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::FetchError;
pub use http::{HttpConfig, get_text, http_config, set_http_config};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::retry_fixed;
pub use shutdown::{idle_until, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use source::{DailySeries, Fetcher, PartitionUnit};
