//! Error type for upstream fetches

/// Error from retrieving or parsing one partition from an upstream source.
///
/// Any variant is fatal for the resolve call that triggered the fetch. The
/// next independent invocation (or the daily refresh) is the retry vehicle.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP error with optional status code
    #[error("{}", fmt_http(*status, message))]
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Payload could not be parsed into date/value pairs
    #[error("parse error: {0}")]
    Parse(String),
    /// Upstream answered but had no data points for the partition
    #[error("no data points returned for {0}")]
    Empty(String),
}

fn fmt_http(status: Option<u16>, message: &str) -> String {
    match status {
        Some(s) => format!("HTTP {s}: {message}"),
        None => format!("HTTP error: {message}"),
    }
}

impl FetchError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        // Strip URL from message to avoid leaking query parameters in logs
        let mut message = e.to_string();
        if let Some(url) = e.url() {
            message = message.replace(url.as_str(), "<url>");
        }
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message,
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Upstream reported that the requested series does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Http {
                status: Some(404),
                ..
            }
        )
    }

    /// Upstream is throttling us; the shared rate limit is probably too generous.
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            Self::Http {
                status: Some(429),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_err(status: u16) -> FetchError {
        FetchError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", http_err(404)), "HTTP 404: test");
    }

    #[test]
    fn display_http_without_status() {
        let err = FetchError::Http {
            status: None,
            message: "timeout".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP error: timeout");
    }

    #[test]
    fn display_empty() {
        let err = FetchError::Empty("ecb-usd:2023".into());
        assert_eq!(format!("{err}"), "no data points returned for ecb-usd:2023");
    }

    #[test]
    fn not_found_only_for_404() {
        assert!(http_err(404).is_not_found());
        assert!(!http_err(500).is_not_found());
        assert!(!FetchError::parse("bad").is_not_found());
    }

    #[test]
    fn throttled_only_for_429() {
        assert!(http_err(429).is_throttled());
        assert!(!http_err(503).is_throttled());
    }
}
