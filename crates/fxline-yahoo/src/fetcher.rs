//! Chart API adapter

use chrono::{Datelike, NaiveDate};
use fxline_core::{DailySeries, FetchError, Fetcher, PartitionUnit, get_text};

use crate::chart::parse_chart;

pub const YAHOO_CHART_API: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Daily closes for one ticker, one calendar year per fetch.
#[derive(Debug, Clone)]
pub struct YahooFetcher {
    base_url: String,
}

impl Default for YahooFetcher {
    fn default() -> Self {
        Self {
            base_url: YAHOO_CHART_API.to_string(),
        }
    }
}

impl YahooFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Chart query for `ticker` over `year`, padded by a day on each side so
    /// exchange-local dates at the year edges are covered.
    pub fn year_url(&self, ticker: &str, year: i32) -> String {
        let start = year_start_secs(year) - 86_400;
        let end = year_start_secs(year + 1) + 86_400;
        format!(
            "{}/{}?period1={start}&period2={end}&interval=1d&events=history",
            self.base_url,
            encode_symbol(ticker)
        )
    }
}

impl Fetcher for YahooFetcher {
    fn requires_ticker(&self) -> bool {
        true
    }

    fn fetch(&self, unit: &PartitionUnit) -> Result<DailySeries, FetchError> {
        let Some(ticker) = unit.ticker.as_deref() else {
            return Err(FetchError::parse(format!(
                "stock closes need a ticker (got {unit})"
            )));
        };
        let url = self.year_url(ticker, unit.year);
        log::debug!("Yahoo: GET {url}");

        let response = get_text(&url, &[("Accept", "application/json")]);
        let body = check_response(ticker, unit.year, response)?;

        let mut series = parse_chart(&body)?;
        series.retain(|date, _| date.year() == unit.year);
        log::debug!("Yahoo: {} closes for {unit}", series.len());
        Ok(series)
    }
}

fn check_response(
    ticker: &str,
    year: i32,
    response: Result<String, FetchError>,
) -> Result<String, FetchError> {
    match response {
        Ok(body) => Ok(body),
        Err(e) if e.is_not_found() => {
            Err(FetchError::Empty(format!("{ticker} {year} (unknown symbol?)")))
        }
        Err(e) if e.is_throttled() => {
            log::warn!("Yahoo: throttled on {ticker}, lower rate_limit for this source");
            Err(e)
        }
        Err(e) => Err(e),
    }
}

fn year_start_secs(year: i32) -> i64 {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Percent-encode a symbol for use as a path segment (`^GSPC`, `EURUSD=X`).
fn encode_symbol(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for b in symbol.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_ticker() {
        let f = YahooFetcher::new();
        assert!(f.requires_ticker());
        let err = f.fetch(&PartitionUnit::year(2023)).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn year_url_pads_range() {
        let f = YahooFetcher::new();
        // 2023-01-01T00:00:00Z = 1672531200, 2024-01-01T00:00:00Z = 1704067200
        assert_eq!(
            f.year_url("AAPL", 2023),
            "https://query1.finance.yahoo.com/v8/finance/chart/AAPL\
             ?period1=1672444800&period2=1704153600&interval=1d&events=history"
        );
    }

    #[test]
    fn symbols_are_encoded() {
        assert_eq!(encode_symbol("^GSPC"), "%5EGSPC");
        assert_eq!(encode_symbol("EURUSD=X"), "EURUSD%3DX");
        assert_eq!(encode_symbol("BRK-B"), "BRK-B");
    }

    #[test]
    fn unknown_symbol_is_empty_and_throttling_passes_through() {
        let http = |status| FetchError::Http {
            status: Some(status),
            message: "test".to_string(),
        };
        let err = check_response("NOPE", 2023, Err(http(404))).unwrap_err();
        assert!(matches!(err, FetchError::Empty(_)), "{err}");
        assert!(check_response("AAPL", 2023, Err(http(429))).unwrap_err().is_throttled());
        assert!(!check_response("AAPL", 2023, Err(http(500))).unwrap_err().is_throttled());
    }

    #[test]
    #[ignore] // requires network
    fn fetch_full_year_from_api() {
        let f = YahooFetcher::new();
        let series = f.fetch(&PartitionUnit::ticker_year("AAPL", 2023)).unwrap();
        assert!(series.len() > 240);
        assert!(series.keys().all(|d| d.year() == 2023));
    }
}
