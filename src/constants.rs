//! Application constants for the runner cache engine
//!
//! This module centralizes all constants used throughout the crate,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Environment variable names read by the configuration layer
pub mod env {
    /// Base URL of the cache service
    pub const CACHE_URL: &str = "ACTIONS_CACHE_URL";

    /// Runtime bearer token for the cache service
    pub const RUNTIME_TOKEN: &str = "ACTIONS_RUNTIME_TOKEN";

    /// Per-segment download timeout override, in minutes
    pub const SEGMENT_DOWNLOAD_TIMEOUT_MINS: &str = "SEGMENT_DOWNLOAD_TIMEOUT_MINS";

    /// Direct storage container name
    pub const CONTAINER: &str = "RUNNER_CACHE_CONTAINER";

    /// Direct storage connection string
    pub const CONNECTION_STRING: &str = "RUNNER_CACHE_CONNECTION_STRING";

    /// Upload worker count override
    pub const UPLOAD_CONCURRENCY: &str = "RUNNER_CACHE_UPLOAD_CONCURRENCY";

    /// Upload chunk size override, in bytes
    pub const UPLOAD_CHUNK_SIZE: &str = "RUNNER_CACHE_UPLOAD_CHUNK_SIZE";

    /// Download concurrency override
    pub const DOWNLOAD_CONCURRENCY: &str = "RUNNER_CACHE_DOWNLOAD_CONCURRENCY";

    /// Segmented (accelerated) blob download toggle
    pub const SEGMENTED_DOWNLOAD: &str = "RUNNER_CACHE_SEGMENTED_DOWNLOAD";
}

/// Cache service protocol constants
pub mod service {
    /// Path appended to the cache service base URL
    pub const API_PATH: &str = "_apis/artifactcache/";

    /// Accept header sent with every cache service request
    pub const ACCEPT: &str = "application/json;api-version=6.0-preview.1";

    /// Content type for chunk uploads
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// Cache key and version rules
pub mod keys {
    /// Maximum number of keys (primary plus fallbacks) in one lookup
    pub const MAX_KEYS: usize = 10;

    /// Maximum length of a single key
    pub const MAX_KEY_LENGTH: usize = 512;

    /// Salt mixed into every cache version. Changing it invalidates all entries.
    pub const VERSION_SALT: &str = "1.0";

    /// Separator between version components
    pub const VERSION_SEPARATOR: &str = "|";

    /// Component added on Windows unless cross-OS archives are enabled
    pub const WINDOWS_ONLY: &str = "windows-only";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = concat!("runner-cache/", env!("CARGO_PKG_VERSION"));

    /// Default timeout for cache service API requests
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// TCP keep-alive interval
    pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 16;
}

/// Rate limiting and retry configuration
pub mod limits {
    /// Default rate limit for cache service requests (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 50;

    /// Default number of attempts per request (first try included)
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

    /// Hard upper bound on attempts per request
    pub const MAX_RETRY_ATTEMPTS: u32 = 5;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 500;

    /// Maximum backoff delay (milliseconds)
    pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

    /// Largest archive the engine will save (10 GiB)
    pub const MAX_ARCHIVE_SIZE: u64 = 10 * 1024 * 1024 * 1024;
}

/// Upload defaults
pub mod upload {
    /// Default number of concurrent chunk workers
    pub const DEFAULT_CONCURRENCY: usize = 4;

    /// Default maximum chunk size (32 MiB)
    pub const DEFAULT_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

    /// Maximum recommended concurrent chunk workers
    pub const MAX_CONCURRENCY: usize = 64;
}

/// Download defaults
pub mod download {
    use super::Duration;

    /// Default number of segments in flight
    pub const DEFAULT_CONCURRENCY: usize = 8;

    /// Default segment size for segmented blob downloads (128 MiB)
    pub const DEFAULT_SEGMENT_SIZE: u64 = 128 * 1024 * 1024;

    /// Default timeout for one segment
    pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(600);

    /// Abort a streaming download after this long without receiving bytes
    pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Host suffixes recognized as managed blob storage
    pub const MANAGED_BLOB_DOMAINS: &[&str] = &[
        ".blob.core.windows.net",
        ".blob.core.usgovcloudapi.net",
        ".blob.core.chinacloudapi.cn",
    ];
}

/// Direct storage (blob container) constants
pub mod storage {
    /// Default block size for direct container uploads (8 MiB)
    ///
    /// Archives no larger than one block are written with a single
    /// create-only put.
    pub const DEFAULT_BLOCK_SIZE: u64 = 8 * 1024 * 1024;

    /// Prefix under which multi-block uploads are staged before they are
    /// copied onto their final name
    pub const STAGING_PREFIX: &str = "_staging";
}

/// File operation constants
pub mod files {
    /// Prefix for temporary download files
    pub const TEMP_FILE_PREFIX: &str = ".runner-cache-";

    /// Temporary file suffix for atomic operations
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Project-local configuration file name
    pub const LOCAL_CONFIG_FILE: &str = "runner-cache.toml";

    /// Directory name under the user config directory
    pub const CONFIG_DIR_NAME: &str = "runner-cache";
}

// Re-export commonly used constants at module level for convenience
pub use env::{CACHE_URL as ENV_CACHE_URL, RUNTIME_TOKEN as ENV_RUNTIME_TOKEN};
pub use http::USER_AGENT;
pub use limits::DEFAULT_RATE_LIMIT_RPS;
