//! Runtime configuration for the relay engine.
//!
//! Send intervals are fixed per metric (see [`crate::metric::MetricProfile`]);
//! only the relay target, timeouts and device identity are configurable.

use std::time::Duration;

use thiserror::Error;

pub const ENV_BASE_URL: &str = "HEALTHRELAY_BASE_URL";
pub const ENV_DEVICE_ID: &str = "HEALTHRELAY_DEVICE_ID";
pub const ENV_REQUEST_TIMEOUT: &str = "HEALTHRELAY_REQUEST_TIMEOUT_SECS";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Endpoint paths (`/bpm`, `/steps`, ...) are appended to this.
    pub base_url: String,
    /// Upper bound for one relay POST.
    pub request_timeout: Duration,
    /// Default timeout for a one-shot measurement.
    pub measure_timeout: Duration,
    /// Attached to one-shot measurement results.
    pub device_id: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            request_timeout: Duration::from_secs(10),
            measure_timeout: Duration::from_secs(30),
            device_id: default_device_id(),
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `HEALTHRELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            config = config.with_base_url(url)?;
        }
        if let Ok(device_id) = std::env::var(ENV_DEVICE_ID) {
            config.device_id = device_id;
        }
        if let Ok(raw) = std::env::var(ENV_REQUEST_TIMEOUT) {
            let secs = raw.parse::<u64>().ok().filter(|s| *s > 0).ok_or(ConfigError::InvalidValue {
                name: ENV_REQUEST_TIMEOUT,
                value: raw.clone(),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let trimmed = url.trim().trim_end_matches('/');
        let has_scheme = trimmed.starts_with("http://") || trimmed.starts_with("https://");
        let has_host = trimmed.splitn(2, "://").nth(1).map_or(false, |rest| !rest.is_empty());
        if !has_scheme || !has_host {
            return Err(ConfigError::InvalidBaseUrl(url));
        }
        self.base_url = trimmed.to_string();
        Ok(self)
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_measure_timeout(mut self, timeout: Duration) -> Self {
        self.measure_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn default_device_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown-device".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.measure_timeout, Duration::from_secs(30));
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn test_base_url_validation() {
        let config = RelayConfig::default()
            .with_base_url("https://ingest.example.com/v1/")
            .unwrap();
        assert_eq!(config.base_url, "https://ingest.example.com/v1");

        assert_eq!(
            RelayConfig::default().with_base_url("ingest.example.com").unwrap_err(),
            ConfigError::InvalidBaseUrl("ingest.example.com".into())
        );
        assert!(RelayConfig::default().with_base_url("http://").is_err());
    }

    #[test]
    fn test_builders() {
        let config = RelayConfig::default()
            .with_device_id("watch-7")
            .with_measure_timeout(Duration::from_secs(5));
        assert_eq!(config.device_id, "watch-7");
        assert_eq!(config.measure_timeout, Duration::from_secs(5));
    }
}
