//! ECB data portal adapter

use fxline_core::{DailySeries, FetchError, Fetcher, PartitionUnit, get_text};

pub const ECB_DATA_API: &str = "https://data-api.ecb.europa.eu/service/data";

const ACCEPT_GENERIC_DATA: &str = "application/vnd.sdmx.genericdata+xml;version=2.1";

/// Daily euro reference rate for one currency, one calendar year per fetch.
#[derive(Debug, Clone)]
pub struct EcbFetcher {
    currency: String,
    base_url: String,
}

impl EcbFetcher {
    /// `currency` is an ISO 4217 code quoted against EUR (e.g. `USD`).
    pub fn new(currency: &str) -> Result<Self, FetchError> {
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(FetchError::parse(format!(
                "invalid currency code {currency:?}"
            )));
        }
        if currency == "EUR" {
            return Err(FetchError::parse("EUR is the base currency"));
        }
        Ok(Self {
            currency,
            base_url: ECB_DATA_API.to_string(),
        })
    }

    /// Point at a mirror or test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Series query for the whole of `year`.
    pub fn year_url(&self, year: i32) -> String {
        format!(
            "{}/EXR/D.{}.EUR.SP00.A?startPeriod={year}-01-01&endPeriod={year}-12-31",
            self.base_url, self.currency
        )
    }
}

impl EcbFetcher {
    fn check_response(
        &self,
        year: i32,
        response: Result<String, FetchError>,
    ) -> Result<String, FetchError> {
        match response {
            Ok(body) => Ok(body),
            // The portal answers 404 "No results found" for a period without fixings
            Err(e) if e.is_not_found() => {
                Err(FetchError::Empty(format!("EUR/{} {year}", self.currency)))
            }
            Err(e) if e.is_throttled() => {
                log::warn!(
                    "ECB: throttled for EUR/{}, lower rate_limit for this source",
                    self.currency
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl Fetcher for EcbFetcher {
    fn fetch(&self, unit: &PartitionUnit) -> Result<DailySeries, FetchError> {
        if unit.ticker.is_some() {
            return Err(FetchError::parse(format!(
                "ECB rates are not per ticker (got {unit})"
            )));
        }
        let url = self.year_url(unit.year);
        log::debug!("ECB: GET {url}");

        let response = get_text(&url, &[("Accept", ACCEPT_GENERIC_DATA)]);
        let body = self.check_response(unit.year, response)?;

        let series = crate::parser::parse_generic_data(&body)?;
        log::debug!(
            "ECB: {} rates for EUR/{} {}",
            series.len(),
            self.currency,
            unit.year
        );
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_is_normalized() {
        let f = EcbFetcher::new(" usd ").unwrap();
        assert_eq!(f.currency(), "USD");
    }

    #[test]
    fn invalid_currencies_rejected() {
        for bad in ["", "US", "USDX", "U5D", "EUR"] {
            assert!(EcbFetcher::new(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn year_url_covers_calendar_year() {
        let f = EcbFetcher::new("GBP").unwrap();
        assert_eq!(
            f.year_url(2023),
            "https://data-api.ecb.europa.eu/service/data/EXR/D.GBP.EUR.SP00.A\
             ?startPeriod=2023-01-01&endPeriod=2023-12-31"
        );
    }

    #[test]
    fn base_url_override() {
        let f = EcbFetcher::new("JPY")
            .unwrap()
            .with_base_url("http://localhost:8080/data/");
        assert!(f.year_url(2024).starts_with("http://localhost:8080/data/EXR/D.JPY."));
    }

    #[test]
    fn ticker_units_rejected() {
        let f = EcbFetcher::new("USD").unwrap();
        let err = f.fetch(&PartitionUnit::ticker_year("AAPL", 2023)).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    fn http_err(status: u16) -> FetchError {
        FetchError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn missing_period_is_empty_and_throttling_passes_through() {
        let f = EcbFetcher::new("USD").unwrap();
        let err = f.check_response(1990, Err(http_err(404))).unwrap_err();
        assert!(matches!(err, FetchError::Empty(ref what) if what == "EUR/USD 1990"), "{err}");

        let err = f.check_response(2023, Err(http_err(429))).unwrap_err();
        assert!(err.is_throttled());
        assert_eq!(f.check_response(2023, Ok("<x/>".into())).unwrap(), "<x/>");
    }

    #[test]
    #[ignore] // requires network
    fn fetch_full_year_from_portal() {
        let f = EcbFetcher::new("USD").unwrap();
        let series = f.fetch(&PartitionUnit::year(2023)).unwrap();
        assert!(series.len() > 250);
        let june_15 = chrono::NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
        assert!(series.get(&june_15).is_some_and(|v| (1.0..1.2).contains(v)));
    }
}
