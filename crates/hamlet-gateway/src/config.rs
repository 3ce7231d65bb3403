//! Configuration for the HTTP gateway, loaded from environment variables.

use std::time::Duration;

use crate::error::GatewayError;

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Where the authority lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL of the authority (e.g. `http://127.0.0.1:8080`), without a
    /// trailing slash.
    pub api_url: String,
    /// Per-request deadline. A call that exceeds it fails as transient.
    pub request_timeout: Duration,
}

impl GatewayConfig {
    /// Build a config for `api_url` with the default timeout.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - `HAMLET_API_URL` -- authority base URL
    ///
    /// Optional variables:
    /// - `HAMLET_REQUEST_TIMEOUT_MS` -- per-request deadline (default 10000)
    pub fn from_env() -> Result<Self, GatewayError> {
        let api_url = std::env::var("HAMLET_API_URL").map_err(|e| {
            GatewayError::Protocol(format!("missing required env var HAMLET_API_URL: {e}"))
        })?;

        let timeout_ms: u64 = std::env::var("HAMLET_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| DEFAULT_REQUEST_TIMEOUT_MS.to_string())
            .parse()
            .map_err(|e| {
                GatewayError::Protocol(format!("invalid HAMLET_REQUEST_TIMEOUT_MS: {e}"))
            })?;

        Ok(Self {
            request_timeout: Duration::from_millis(timeout_ms),
            ..Self::new(api_url)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = GatewayConfig::new("http://localhost:8080/");
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }
}
