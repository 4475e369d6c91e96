//! Settings and configuration module
//!
//! One [`FetchConfig`] per upstream source. It is plain data: serialisable,
//! validated once, and turned into a limiter, a retry policy and a cache by
//! [`crate::FetcherBuilder`]. Durations are expressed in milliseconds on
//! the wire (`*_ms` keys).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::BrowserCatalog;
use crate::modules::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One `capacity per window` budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub capacity: u32,
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
}

impl RateLimitSpec {
    pub const fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }

    pub const fn per_second(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(1))
    }

    pub const fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Composed in order into one multi-limiter.
    pub rate_limits: Vec<RateLimitSpec>,
    pub max_attempts: u32,
    #[serde(rename = "base_backoff_ms", with = "duration_ms")]
    pub base_backoff: Duration,
    pub backoff_multiplier: f64,
    pub backoff_jitter: f64,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    #[serde(rename = "overall_timeout_ms", with = "optional_duration_ms")]
    pub overall_timeout: Option<Duration>,
    /// Zero disables caching.
    #[serde(rename = "cache_ttl_ms", with = "duration_ms")]
    pub cache_ttl: Duration,
    /// `false` selects the plain reqwest transport.
    pub impersonate: bool,
    /// Pin one user-agent instead of drawing a random profile.
    pub user_agent: Option<String>,
    /// Custom browser catalog; the embedded one is used otherwise.
    pub catalog: Option<BrowserCatalog>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            rate_limits: Vec::new(),
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            backoff_jitter: 0.0,
            request_timeout: Duration::from_secs(30),
            overall_timeout: Some(Duration::from_secs(120)),
            cache_ttl: Duration::ZERO,
            impersonate: true,
            user_agent: None,
            catalog: None,
        }
    }
}

impl FetchConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, limit) in self.rate_limits.iter().enumerate() {
            if limit.capacity == 0 || limit.window.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "rate_limits[{index}] must have capacity > 0 and window_ms > 0"
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("backoff_multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::Invalid("backoff_jitter must be within [0, 1]".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if self.overall_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::Invalid("overall_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: self.base_backoff,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.backoff_jitter,
            request_timeout: self.request_timeout,
            overall_timeout: self.overall_timeout,
        }
    }

    pub fn quotas(&self) -> impl Iterator<Item = (u32, Duration)> + '_ {
        self.rate_limits
            .iter()
            .map(|limit| (limit.capacity, limit.window))
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millisecond_keys() {
        let config = FetchConfig::from_json_str(
            r#"{
                "rate_limits": [
                    {"capacity": 3, "window_ms": 1000},
                    {"capacity": 60, "window_ms": 60000}
                ],
                "max_attempts": 5,
                "base_backoff_ms": 250,
                "overall_timeout_ms": null,
                "cache_ttl_ms": 86400000,
                "impersonate": false
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.rate_limits,
            vec![RateLimitSpec::per_second(3), RateLimitSpec::per_minute(60)]
        );
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::from_millis(250));
        assert_eq!(config.overall_timeout, None);
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
        assert!(!config.impersonate);
        // Unspecified keys keep their defaults.
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 2.0);
    }

    #[test]
    fn survives_a_json_round_trip() {
        let config = FetchConfig {
            rate_limits: vec![RateLimitSpec::per_second(3)],
            cache_ttl: Duration::from_secs(3600),
            ..FetchConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert!(json.contains("\"window_ms\": 1000"));
        assert_eq!(FetchConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            r#"{"rate_limits": [{"capacity": 0, "window_ms": 1000}]}"#,
            r#"{"rate_limits": [{"capacity": 3, "window_ms": 0}]}"#,
            r#"{"max_attempts": 0}"#,
            r#"{"backoff_multiplier": 0.5}"#,
            r#"{"backoff_jitter": 1.5}"#,
            r#"{"request_timeout_ms": 0}"#,
            r#"{"overall_timeout_ms": 0}"#,
        ];
        for json in cases {
            assert!(
                matches!(FetchConfig::from_json_str(json), Err(ConfigError::Invalid(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = FetchConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
