//! HTTP client configuration and building logic
//!
//! This module handles the configuration and construction of the two HTTP
//! clients the engine uses: the authenticated cache service API client and
//! the credential-free storage client for pre-signed archive URLs.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants::{http, limits, service};
use crate::errors::{ConfigError, ConfigResult, TransportError, TransportResult};

/// Configuration for HTTP client behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of idle connections per host
    pub pool_max_per_host: usize,
    /// Timeout for cache service API requests
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive: Some(http::TCP_KEEPALIVE),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            user_agent: http::USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.rate_limit_rps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "client.rate_limit_rps".to_string(),
                value: "0".to_string(),
                reason: "Rate limit must be at least 1 request per second".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "client.request_timeout".to_string(),
                value: "0s".to_string(),
                reason: "Request timeout must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Builds the authenticated cache service API client
    ///
    /// Every request carries the bearer token and the versioned `Accept`
    /// header. The authorization value is marked sensitive so it is never
    /// printed by reqwest's debug output.
    pub fn build_api_client(&self, token: &str) -> TransportResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(service::ACCEPT));

        let mut auth_value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
            TransportError::Protocol {
                reason: format!("runtime token is not a valid header value: {e}"),
            }
        })?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);

        self.builder()
            .default_headers(headers)
            .timeout(self.request_timeout)
            .build()
            .map_err(TransportError::Http)
    }

    /// Builds the storage client used for archive transfers
    ///
    /// No overall timeout is set: archives can be many gigabytes, so
    /// individual requests apply their own segment or stall timeouts.
    pub fn build_storage_client(&self) -> TransportResult<Client> {
        self.builder().build().map_err(TransportError::Http)
    }

    fn builder(&self) -> reqwest::ClientBuilder {
        let mut client_builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(config.rate_limit_rps, limits::DEFAULT_RATE_LIMIT_RPS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let config = ClientConfig {
            rate_limit_rps: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_client_creation() {
        let config = ClientConfig::default();
        assert!(config.build_api_client("token").is_ok());
        assert!(config.build_storage_client().is_ok());
    }

    #[test]
    fn test_api_client_rejects_invalid_token() {
        let config = ClientConfig::default();
        let result = config.build_api_client("bad\ntoken");
        assert!(matches!(result, Err(TransportError::Protocol { .. })));
    }

    #[test]
    fn test_client_with_custom_timeouts() {
        let config = ClientConfig {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.build_api_client("token").is_ok());
    }
}
