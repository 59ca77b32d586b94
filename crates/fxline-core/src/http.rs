//! Shared HTTP client for upstream adapters.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall detection,
//! but presents a sync interface: every coordinator execution is a plain
//! blocking thread (rayon worker, CLI main thread, refresh loop).

use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use crate::error::FetchError;

/// HTTP settings applied to the shared client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Whole-request deadline, including body download
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            user_agent: concat!("fxline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install HTTP settings. Must run before the first request; later calls are ignored.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already initialized, keeping existing settings");
    }
}

/// Current HTTP settings (defaults if never set).
pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    let config = http_config();
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build HTTP client")
});

/// Shared tokio runtime for HTTP operations.
static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Blocking HTTP GET returning the response body as text.
///
/// Non-2xx responses and timeouts map to [`FetchError::Http`]. No retries:
/// a failed fetch is surfaced to the caller as-is.
pub fn get_text(url: &str, headers: &[(&str, &str)]) -> Result<String, FetchError> {
    let deadline = http_config().read_timeout;
    SHARED_RUNTIME.handle().block_on(async {
        let request = async {
            let mut req = SHARED_CLIENT.get(url);
            for (name, value) in headers {
                req = req.header(*name, *value);
            }
            let resp = req.send().await?.error_for_status()?;
            resp.text().await
        };

        match tokio::time::timeout(deadline, request).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(FetchError::from_reqwest(&e)),
            Err(_) => Err(FetchError::Http {
                status: None,
                message: format!("request timed out after {}s", deadline.as_secs()),
            }),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("fxline/"));
    }

    #[test]
    fn http_config_falls_back_to_default() {
        // Either the default or whatever another test installed first
        assert!(http_config().read_timeout > Duration::ZERO);
    }
}
