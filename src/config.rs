//! Configuration management for the runner cache
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config`, `./runner-cache.toml`, or
//!    `<config dir>/runner-cache/config.toml`)
//! 3. Environment variables set by the CI runner
//!
//! [`AppConfig::resolve`] merges the environment through an injected lookup
//! function and produces an [`EngineConfig`]. Nothing below this module reads
//! the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::client::{ClientConfig, RetryPolicy, ServiceConfig};
use crate::app::download::DownloadOptions;
use crate::app::storage::ConnectionString;
use crate::app::upload::UploadOptions;
use crate::constants::{download, env, files, http, limits, upload};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP client settings
    pub client: ClientConfigToml,
    /// Retry policy for every request
    pub retry: RetryConfigToml,
    /// Chunked upload settings
    pub upload: UploadConfigToml,
    /// Archive download settings
    pub download: DownloadConfigToml,
    /// Size limits
    pub limits: LimitsConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfigToml {
    /// TCP keep-alive interval (unset = disabled)
    #[serde(with = "humantime_serde")]
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout (unset = no timeout)
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Timeout for cache service API requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            tcp_keepalive: Some(http::TCP_KEEPALIVE),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
        }
    }
}

/// TOML-friendly retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfigToml {
    /// Total attempts per request, first try included
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfigToml {
    fn default() -> Self {
        Self {
            max_attempts: limits::DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(limits::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(limits::RETRY_MAX_DELAY_MS),
        }
    }
}

/// TOML-friendly upload configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfigToml {
    /// Concurrent chunk workers
    pub concurrency: usize,
    /// Chunk size in bytes
    pub chunk_size: u64,
}

impl Default for UploadConfigToml {
    fn default() -> Self {
        Self {
            concurrency: upload::DEFAULT_CONCURRENCY,
            chunk_size: upload::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// TOML-friendly download configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfigToml {
    /// Parallel ranged downloads for managed blob storage
    pub segmented: bool,
    /// Segments in flight
    pub concurrency: usize,
    /// Segment size in bytes
    pub segment_size: u64,
    /// Upper bound on one segment
    #[serde(with = "humantime_serde")]
    pub segment_timeout: Duration,
    /// Abort a streaming download after this long without data
    #[serde(with = "humantime_serde")]
    pub stall_timeout: Duration,
}

impl Default for DownloadConfigToml {
    fn default() -> Self {
        Self {
            segmented: true,
            concurrency: download::DEFAULT_CONCURRENCY,
            segment_size: download::DEFAULT_SEGMENT_SIZE,
            segment_timeout: download::DEFAULT_SEGMENT_TIMEOUT,
            stall_timeout: download::DEFAULT_STALL_TIMEOUT,
        }
    }
}

/// TOML-friendly size limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfigToml {
    /// Archives above this many bytes are not saved
    pub max_archive_size: u64,
}

impl Default for LimitsConfigToml {
    fn default() -> Self {
        Self {
            max_archive_size: limits::MAX_ARCHIVE_SIZE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when no verbosity flag is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Direct-storage container settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Parsed SAS connection string
    pub connection: ConnectionString,
    /// Container name
    pub container: String,
}

/// Fully resolved runtime configuration for the cache engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cache service connection, when using the service backend
    pub service: Option<ServiceConfig>,
    /// Container connection, when using direct storage
    pub container: Option<ContainerConfig>,
    pub client: ClientConfig,
    pub retry: RetryPolicy,
    pub upload: UploadOptions,
    pub download: DownloadOptions,
    /// Archives above this many bytes are not saved
    pub max_archive_size: u64,
}

impl EngineConfig {
    /// Validate every runtime section
    pub fn validate(&self) -> ConfigResult<()> {
        self.client.validate()?;
        self.retry.validate()?;
        self.upload.validate()?;
        self.download.validate()?;
        if self.max_archive_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limits.max_archive_size".to_string(),
                value: "0".to_string(),
                reason: "Must be at least 1 byte".to_string(),
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the first file found, or defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if an explicitly given file does not
    /// exist, or a read/parse error for the file that was found.
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path });
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        match config_path {
            Some(path) => Self::load_from_file(&path).await,
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(".").join(files::LOCAL_CONFIG_FILE)];
        if let Some(path) = Self::default_config_path() {
            search_paths.push(path);
        }

        search_paths.into_iter().find(|path| {
            let found = path.exists();
            if found {
                debug!("Found config file: {}", path.display());
            }
            found
        })
    }

    /// Default per-user config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(files::CONFIG_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let config: AppConfig = toml::from_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Merge environment overrides and produce the engine configuration
    ///
    /// `lookup` returns the value of an environment variable, if set. The
    /// container backend is chosen when both the connection string and
    /// container name are present; otherwise the cache service URL is
    /// required.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing required variables, values that do
    /// not parse, or settings that fail validation.
    pub fn resolve<F>(&self, lookup: F) -> ConfigResult<EngineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let container = match (var(env::CONNECTION_STRING), var(env::CONTAINER)) {
            (Some(raw), Some(container)) => Some(ContainerConfig {
                connection: ConnectionString::parse(&raw)?,
                container,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingEnvVar { name: env::CONTAINER }),
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar {
                    name: env::CONNECTION_STRING,
                })
            }
        };

        let service = if container.is_some() {
            None
        } else {
            let url = var(env::CACHE_URL).ok_or(ConfigError::MissingEnvVar {
                name: env::CACHE_URL,
            })?;
            let token = var(env::RUNTIME_TOKEN).ok_or(ConfigError::MissingEnvVar {
                name: env::RUNTIME_TOKEN,
            })?;
            Some(ServiceConfig::new(&url, token).map_err(|e| ConfigError::InvalidValue {
                field: env::CACHE_URL.to_string(),
                value: url.clone(),
                reason: e.to_string(),
            })?)
        };

        let mut upload_options = self.upload.to_runtime_config();
        if let Some(value) = var(env::UPLOAD_CONCURRENCY) {
            upload_options.concurrency = parse_env(env::UPLOAD_CONCURRENCY, &value)?;
        }
        if let Some(value) = var(env::UPLOAD_CHUNK_SIZE) {
            upload_options.chunk_size = parse_env(env::UPLOAD_CHUNK_SIZE, &value)?;
        }

        let mut download_options = self.download.to_runtime_config();
        if let Some(value) = var(env::DOWNLOAD_CONCURRENCY) {
            download_options.concurrency = parse_env(env::DOWNLOAD_CONCURRENCY, &value)?;
        }
        if let Some(value) = var(env::SEGMENTED_DOWNLOAD) {
            download_options.segmented = parse_bool(env::SEGMENTED_DOWNLOAD, &value)?;
        }
        if let Some(value) = var(env::SEGMENT_DOWNLOAD_TIMEOUT_MINS) {
            // Unusable values fall back to the configured timeout
            match value.trim().parse::<u64>() {
                Ok(minutes) if minutes > 0 => {
                    download_options.segment_timeout = Duration::from_secs(minutes * 60);
                }
                _ => warn!(
                    "Ignoring {}={}: expected a positive number of minutes",
                    env::SEGMENT_DOWNLOAD_TIMEOUT_MINS,
                    value
                ),
            }
        }

        let config = EngineConfig {
            service,
            container,
            client: self.client.to_runtime_config(),
            retry: self.retry.to_runtime_config(),
            upload: upload_options,
            download: download_options,
            max_archive_size: self.limits.max_archive_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Default configuration rendered as TOML
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(name: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: name.to_string(),
            value: value.to_string(),
            reason: "Expected true or false".to_string(),
        }),
    }
}

impl ClientConfigToml {
    /// Convert to runtime ClientConfig
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            tcp_keepalive: self.tcp_keepalive,
            tcp_nodelay: self.tcp_nodelay,
            pool_idle_timeout: self.pool_idle_timeout,
            pool_max_per_host: self.pool_max_per_host,
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            rate_limit_rps: self.rate_limit_rps,
            ..ClientConfig::default()
        }
    }
}

impl RetryConfigToml {
    /// Convert to runtime RetryPolicy
    pub fn to_runtime_config(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}

impl UploadConfigToml {
    /// Convert to runtime UploadOptions
    pub fn to_runtime_config(&self) -> UploadOptions {
        UploadOptions {
            concurrency: self.concurrency,
            chunk_size: self.chunk_size,
        }
    }
}

impl DownloadConfigToml {
    /// Convert to runtime DownloadOptions
    pub fn to_runtime_config(&self) -> DownloadOptions {
        DownloadOptions {
            segmented: self.segmented,
            concurrency: self.concurrency,
            segment_size: self.segment_size,
            segment_timeout: self.segment_timeout,
            stall_timeout: self.stall_timeout,
            lookup_only: false,
        }
    }
}
