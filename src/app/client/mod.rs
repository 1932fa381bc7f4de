//! Cache service transport layer
//!
//! This module provides the authenticated cache service client with rate
//! limiting and a uniform retry policy.
//!
//! The module is organized into specialized components:
//! - `config`: HTTP client configuration and building
//! - `retry`: retry classification and bounded exponential backoff
//! - `http`: rate-limited, retried request sending

use url::Url;

use crate::constants::service;
use crate::errors::{TransportError, TransportResult};

pub mod config;
pub mod http;
pub mod retry;

pub use config::ClientConfig;
pub use http::HttpHandler;
pub use retry::RetryPolicy;

/// Connection details for the cache service
#[derive(Clone)]
pub struct ServiceConfig {
    /// Base URL of the cache service (the API path is appended)
    pub base_url: Url,
    /// Runtime bearer token
    pub token: String,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"***")
            .finish()
    }
}

impl ServiceConfig {
    /// Create a service configuration from a base URL string and token
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidUrl` if `base_url` is not a valid URL
    pub fn new(base_url: &str, token: impl Into<String>) -> TransportResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_string(),
            error: e.to_string(),
        })?;
        Ok(Self {
            base_url,
            token: token.into(),
        })
    }

    /// Root of the artifact cache API
    pub fn api_root(&self) -> TransportResult<Url> {
        // Url::join drops the last segment unless the base ends with '/'
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        join(&base, service::API_PATH)
    }
}

/// Authenticated cache service client
///
/// Every request carries the bearer token and the versioned `Accept` header.
/// Archive transfers against pre-signed URLs must not receive the token and
/// use a separate handler built with [`storage_handler`].
#[derive(Debug)]
pub struct CacheServiceClient {
    api: HttpHandler,
    api_root: Url,
}

impl CacheServiceClient {
    /// Creates a new client from service connection details and client settings
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the HTTP clients cannot be built or the
    /// service URL cannot be joined with the API path
    pub fn new(
        service: &ServiceConfig,
        config: &ClientConfig,
        retry: RetryPolicy,
    ) -> TransportResult<Self> {
        let api = HttpHandler::new(
            config.build_api_client(&service.token)?,
            config.rate_limit_rps,
            retry,
        )?;
        let api_root = service.api_root()?;

        tracing::debug!("Cache service API root: {}", api_root);

        Ok(Self { api, api_root })
    }

    /// Handler for authenticated cache service calls
    pub fn api(&self) -> &HttpHandler {
        &self.api
    }

    /// Resolve a path relative to the API root
    pub fn endpoint(&self, relative: &str) -> TransportResult<Url> {
        join(&self.api_root, relative)
    }
}

/// Handler for credential-free transfers (archive URLs, blob containers)
pub fn storage_handler(config: &ClientConfig, retry: RetryPolicy) -> TransportResult<HttpHandler> {
    HttpHandler::new(config.build_storage_client()?, config.rate_limit_rps, retry)
}

fn join(base: &Url, relative: &str) -> TransportResult<Url> {
    base.join(relative).map_err(|e| TransportError::InvalidUrl {
        url: format!("{}{}", base, relative),
        error: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_root_with_trailing_slash() {
        let service = ServiceConfig::new("https://cache.example.com/tenant/", "t").unwrap();
        assert_eq!(
            service.api_root().unwrap().as_str(),
            "https://cache.example.com/tenant/_apis/artifactcache/"
        );
    }

    #[test]
    fn test_api_root_without_trailing_slash() {
        let service = ServiceConfig::new("https://cache.example.com/tenant", "t").unwrap();
        assert_eq!(
            service.api_root().unwrap().as_str(),
            "https://cache.example.com/tenant/_apis/artifactcache/"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ServiceConfig::new("not a url", "t");
        assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
    }

    #[test]
    fn test_debug_hides_token() {
        let service = ServiceConfig::new("https://cache.example.com/", "super-secret").unwrap();
        let printed = format!("{:?}", service);
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_endpoints() {
        let service = ServiceConfig::new("https://cache.example.com/", "t").unwrap();
        let client =
            CacheServiceClient::new(&service, &ClientConfig::default(), RetryPolicy::default())
                .unwrap();

        assert_eq!(
            client.endpoint("caches/42").unwrap().as_str(),
            "https://cache.example.com/_apis/artifactcache/caches/42"
        );
        assert_eq!(
            client.endpoint("cache").unwrap().as_str(),
            "https://cache.example.com/_apis/artifactcache/cache"
        );
    }
}
