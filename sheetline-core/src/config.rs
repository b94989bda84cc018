//! Configuration types
//!
//! Loaded from environment variables with defaults matching the store's
//! quota behaviour: 30 second cache TTL, three attempts with 1s/2s backoff.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default base URL for the Sheets v4 REST API.
pub const DEFAULT_API_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Backoff schedule for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles for each attempt after that.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// Set the total number of attempts, the first included.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the upper bound of the random delay added to each backoff.
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a snapshot is served without contacting the store.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Set the TTL used by datasets without their own.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Everything needed to talk to one spreadsheet.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub spreadsheet_id: String,
    pub api_base_url: String,
    pub access_token: SecretString,
    pub request_timeout: Duration,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

impl StoreConfig {
    pub fn new(spreadsheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: SecretString::from(access_token.into()),
            request_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Create StoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SHEETLINE_SPREADSHEET_ID`: Spreadsheet to read and write (required)
    /// - `SHEETLINE_ACCESS_TOKEN`: OAuth bearer token (required)
    /// - `SHEETLINE_API_BASE_URL`: API root (default: Sheets v4)
    /// - `SHEETLINE_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 30)
    /// - `SHEETLINE_CACHE_TTL_SECS`: Snapshot TTL (default: 30)
    /// - `SHEETLINE_RETRY_MAX_ATTEMPTS`: Total attempts per call (default: 3)
    /// - `SHEETLINE_RETRY_BASE_DELAY_MS`: First backoff delay (default: 1000)
    /// - `SHEETLINE_RETRY_MAX_JITTER_MS`: Jitter ceiling (default: 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: name.to_string(),
                })
        };

        let mut config = Self::new(
            required("SHEETLINE_SPREADSHEET_ID")?,
            required("SHEETLINE_ACCESS_TOKEN")?,
        );

        if let Some(url) = lookup("SHEETLINE_API_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SHEETLINE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SHEETLINE_CACHE_TTL_SECS")? {
            config.cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "SHEETLINE_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SHEETLINE_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SHEETLINE_RETRY_MAX_JITTER_MS")? {
            config.retry.max_jitter = Duration::from_millis(ms);
        }

        config.retry.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("SHEETLINE_SPREADSHEET_ID", "sheet-123"),
            ("SHEETLINE_ACCESS_TOKEN", "token"),
        ]))
        .unwrap();

        assert_eq!(config.spreadsheet_id, "sheet-123");
        assert_eq!(config.access_token.expose_secret(), "token");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(30));
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            ("SHEETLINE_SPREADSHEET_ID", "sheet-123"),
            ("SHEETLINE_ACCESS_TOKEN", "token"),
            ("SHEETLINE_API_BASE_URL", "http://localhost:8080/v4/"),
            ("SHEETLINE_CACHE_TTL_SECS", "5"),
            ("SHEETLINE_RETRY_MAX_ATTEMPTS", "5"),
            ("SHEETLINE_RETRY_BASE_DELAY_MS", "10"),
            ("SHEETLINE_RETRY_MAX_JITTER_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.api_base_url, "http://localhost:8080/v4");
        assert_eq!(config.cache.default_ttl, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_jitter, Duration::ZERO);
    }

    #[test]
    fn test_missing_required() {
        let err = StoreConfig::from_lookup(lookup_from(&[("SHEETLINE_ACCESS_TOKEN", "t")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "SHEETLINE_SPREADSHEET_ID".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = StoreConfig::from_lookup(lookup_from(&[
            ("SHEETLINE_SPREADSHEET_ID", "s"),
            ("SHEETLINE_ACCESS_TOKEN", "t"),
            ("SHEETLINE_CACHE_TTL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "SHEETLINE_CACHE_TTL_SECS"));

        let err = StoreConfig::from_lookup(lookup_from(&[
            ("SHEETLINE_SPREADSHEET_ID", "s"),
            ("SHEETLINE_ACCESS_TOKEN", "t"),
            ("SHEETLINE_RETRY_MAX_ATTEMPTS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_retry_config_serde() {
        let config = RetryConfig::default().with_max_jitter(Duration::ZERO);
        let json = serde_json::to_string(&config).unwrap();
        let back: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
