//! fxline Yahoo - Daily stock closes from the Yahoo Finance chart API
//!
//! Partitions are `(ticker, year)`: one chart request per ticker and
//! calendar year, parsed with serde_json.

pub mod chart;
pub mod fetcher;

pub use chart::parse_chart;
pub use fetcher::{YAHOO_CHART_API, YahooFetcher};
