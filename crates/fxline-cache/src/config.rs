//! Per-source coordination settings

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("invalid source config: {0}")]
pub struct ConfigError(pub String);

/// What a caller does when another execution holds the partition lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum AdmissionPolicy {
    /// Do not wait: serve whatever the store currently holds (possibly
    /// nothing) and let the lease holder finish the fetch.
    #[default]
    NonBlocking,
    /// Poll for the lease up to `wait_ms`; on timeout retry the whole
    /// resolve `max_attempts` times with `backoff_ms` between attempts.
    Blocking {
        #[serde(default = "default_wait_ms")]
        wait_ms: u64,
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,
        #[serde(default = "default_backoff_ms")]
        backoff_ms: u64,
    },
}

fn default_wait_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    500
}

impl AdmissionPolicy {
    pub fn blocking() -> Self {
        Self::Blocking {
            wait_ms: default_wait_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub admission: AdmissionPolicy,
    /// Age after which a lease is considered abandoned. Must outlast a full
    /// rate-limit wait; the holder renews after the wait and then needs the
    /// rest for the upstream request.
    pub lease_timeout_ms: u64,
    /// Poll granularity while waiting for a lease
    pub lease_poll_ms: u64,
    /// Upstream calls allowed per `window_ms`
    pub rate_limit: u32,
    pub window_ms: u64,
    /// Slack added to computed limiter waits
    pub rate_buffer_ms: u64,
    /// Max wait for the short-held limiter lock
    pub limiter_lock_wait_ms: u64,
    /// Minimum age of an in-progress year before a miss past its last
    /// cached date triggers a refresh. `None` refreshes on every such miss.
    pub cache_ttl_ms: Option<u64>,
    /// Reference timezone of the source, used to decide "today"
    pub utc_offset_minutes: i32,
    /// Years (including the current one) covered by the refresh driver
    pub history_years: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionPolicy::NonBlocking,
            lease_timeout_ms: 180_000,
            lease_poll_ms: 250,
            rate_limit: 10,
            window_ms: 60_000,
            rate_buffer_ms: 100,
            limiter_lock_wait_ms: 10_000,
            cache_ttl_ms: None,
            utc_offset_minutes: 0,
            history_years: 5,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit == 0 {
            return Err(ConfigError("rate_limit must be at least 1".into()));
        }
        if self.window_ms == 0 {
            return Err(ConfigError("window_ms must be positive".into()));
        }
        if self.lease_timeout_ms == 0 {
            return Err(ConfigError("lease_timeout_ms must be positive".into()));
        }
        if self.lease_timeout_ms <= self.window_ms.saturating_add(self.rate_buffer_ms) {
            return Err(ConfigError(format!(
                "lease_timeout_ms ({}) must exceed window_ms + rate_buffer_ms ({})",
                self.lease_timeout_ms,
                self.window_ms.saturating_add(self.rate_buffer_ms)
            )));
        }
        if self.lease_poll_ms == 0 {
            return Err(ConfigError("lease_poll_ms must be positive".into()));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if let AdmissionPolicy::Blocking { max_attempts: 0, .. } = self.admission {
            return Err(ConfigError("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn lease_poll(&self) -> Duration {
        Duration::from_millis(self.lease_poll_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_and_non_blocking() {
        let config = SourceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.admission, AdmissionPolicy::NonBlocking);
        assert_eq!(config.window(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_zero_limit() {
        let config = SourceConfig {
            rate_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_lease_shorter_than_limiter_wait() {
        let config = SourceConfig {
            lease_timeout_ms: 60_000,
            window_ms: 60_000,
            rate_buffer_ms: 100,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lease_timeout_ms"), "{err}");

        let config = SourceConfig {
            lease_timeout_ms: 60_101,
            ..config
        };
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_offset() {
        let config = SourceConfig {
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn offset_conversion() {
        let config = SourceConfig {
            utc_offset_minutes: -300,
            ..Default::default()
        };
        assert_eq!(config.utc_offset().local_minus_utc(), -300 * 60);
    }

    #[test]
    fn parse_blocking_policy_with_defaults() {
        let toml = r#"
rate_limit = 3
window_ms = 1000

[admission]
policy = "blocking"
wait_ms = 2000
"#;
        let config: SourceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.rate_limit, 3);
        assert_eq!(
            config.admission,
            AdmissionPolicy::Blocking {
                wait_ms: 2000,
                max_attempts: 5,
                backoff_ms: 500
            }
        );
        // Untouched fields keep defaults
        assert_eq!(config.lease_timeout_ms, 60_000);
    }

    #[test]
    fn parse_non_blocking_policy() {
        let toml = r#"
cache_ttl_ms = 3600000

[admission]
policy = "non-blocking"
"#;
        let config: SourceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.admission, AdmissionPolicy::NonBlocking);
        assert_eq!(config.cache_ttl_ms, Some(3_600_000));
    }
}
