//! Chart API response model

use chrono::{DateTime, NaiveDate};
use fxline_core::{DailySeries, FetchError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Meta,
    /// Absent when the range holds no sessions
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    symbol: Option<String>,
    /// Exchange offset from UTC in seconds
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Parse a chart response into closes keyed by exchange-local trading date.
///
/// Null closes (halted or not yet settled sessions) are skipped. An API
/// level error object becomes [`FetchError::Parse`] carrying its description.
pub fn parse_chart(body: &str) -> Result<DailySeries, FetchError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchError::parse(format!("invalid chart JSON: {e}")))?;

    if let Some(err) = envelope.chart.error {
        return Err(FetchError::parse(format!(
            "{}: {}",
            err.code,
            err.description.as_deref().unwrap_or("no description")
        )));
    }
    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(DailySeries::new());
    };

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();
    if closes.len() != result.timestamp.len() {
        return Err(FetchError::parse(format!(
            "{}: {} timestamps but {} closes",
            result.meta.symbol.as_deref().unwrap_or("?"),
            result.timestamp.len(),
            closes.len()
        )));
    }

    let mut series = DailySeries::new();
    for (&ts, close) in result.timestamp.iter().zip(closes) {
        let Some(close) = close else { continue };
        let Some(date) = local_date(ts, result.meta.gmtoffset) else {
            return Err(FetchError::parse(format!("timestamp out of range: {ts}")));
        };
        series.insert(date, close);
    }
    Ok(series)
}

fn local_date(epoch_secs: i64, gmtoffset: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(epoch_secs.checked_add(gmtoffset)?, 0).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Trimmed real response: 2023-06-14 and 2023-06-15, New York session opens
    const SAMPLE: &str = r#"{"chart":{"result":[{
        "meta":{"currency":"USD","symbol":"AAPL","exchangeName":"NMS","gmtoffset":-14400,
                "timezone":"EDT","exchangeTimezoneName":"America/New_York"},
        "timestamp":[1686749400,1686835800],
        "indicators":{"quote":[{"open":[183.37,183.96],"close":[183.95,186.00999450683594],
                                "volume":[57462900,65433200]}],
                      "adjclose":[{"adjclose":[182.91,184.96]}]}
    }],"error":null}}"#;

    #[test]
    fn parse_closes_by_local_date() {
        let series = parse_chart(SAMPLE).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.get(&ymd(2023, 6, 14)), Some(&183.95));
        assert!((series[&ymd(2023, 6, 15)] - 186.01).abs() < 1e-6);
    }

    #[test]
    fn null_closes_skipped() {
        let body = r#"{"chart":{"result":[{"meta":{"gmtoffset":0},
            "timestamp":[1704186000,1704272400],
            "indicators":{"quote":[{"close":[null,101.5]}]}}],"error":null}}"#;
        let series = parse_chart(body).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.get(&ymd(2024, 1, 3)), Some(&101.5));
    }

    #[test]
    fn no_sessions_is_empty() {
        let body = r#"{"chart":{"result":[{"meta":{"symbol":"NEWCO","gmtoffset":0},
            "indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse_chart(body).unwrap().is_empty());
    }

    #[test]
    fn api_error_object() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found",
            "description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_chart(body).unwrap_err();
        assert!(err.to_string().contains("symbol may be delisted"), "{err}");
    }

    #[test]
    fn mismatched_arrays_rejected() {
        let body = r#"{"chart":{"result":[{"meta":{"gmtoffset":0},
            "timestamp":[1704186000,1704272400],
            "indicators":{"quote":[{"close":[100.0]}]}}],"error":null}}"#;
        assert!(parse_chart(body).is_err());
    }

    #[test]
    fn invalid_json() {
        assert!(matches!(parse_chart("<html>"), Err(FetchError::Parse(_))));
    }

    #[test]
    fn offset_shifts_date() {
        // 02:00 UTC is the previous evening in New York
        assert_eq!(local_date(1704247200, -5 * 3600), Some(ymd(2024, 1, 2)));
        assert_eq!(local_date(1704247200, 0), Some(ymd(2024, 1, 3)));
    }
}
