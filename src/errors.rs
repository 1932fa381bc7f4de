//! Error types for the runner cache engine
//!
//! This module defines the error types for every stage of the cache pipeline.
//! "No entry found" and "key already reserved" are ordinary outcomes and are
//! represented as values elsewhere, never as errors here.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is not set
    #[error("Missing required environment variable: {name}")]
    MissingEnvVar { name: &'static str },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Direct storage connection string could not be used
    #[error("Invalid storage connection string: {reason}")]
    InvalidConnectionString { reason: String },

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Input validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Too many keys in one lookup
    #[error("Key validation failed: at most {max} keys are allowed, got {count}")]
    TooManyKeys { count: usize, max: usize },

    /// Key exceeds the maximum length
    #[error("Key validation failed: {key} cannot be larger than {max} characters")]
    KeyTooLong { key: String, max: usize },

    /// Key contains a comma
    #[error("Key validation failed: {key} cannot contain commas")]
    KeyContainsComma { key: String },

    /// Empty key
    #[error("Key validation failed: keys cannot be empty")]
    EmptyKey,

    /// No cache paths supplied
    #[error("Path validation failed: at least one cache path is required")]
    MissingPaths,

    /// Archive above the configured size limit
    #[error("Archive size of {size} bytes is over the {limit} byte limit, not saving cache")]
    ArchiveTooLarge { size: u64, limit: u64 },
}

/// Cache service transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed before a response was received
    #[error("HTTP request failed")]
    Http(#[source] reqwest::Error),

    /// Server answered with an unexpected status
    #[error("Cache service responded with HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Server asked us to slow down (HTTP 429)
    #[error("Rate limited by server (HTTP 429)")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    /// Every allowed attempt failed
    #[error("Request failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<TransportError>,
    },

    /// Successful response that breaks the service contract
    #[error("Cache service protocol violation: {reason}")]
    Protocol { reason: String },

    /// URL could not be built or parsed
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// No bytes received within the stall timeout
    #[error("Transfer stalled: no data received for {seconds} seconds")]
    Stalled { seconds: u64 },

    /// Rate limiter could not be built
    #[error("Rate limit must be non-zero")]
    InvalidRateLimit,
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        // Archive URLs carry access signatures
        TransportError::Http(error.without_url())
    }
}

/// Direct storage (blob container) errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object store request failed
    #[error("Storage request failed")]
    Store(#[from] object_store::Error),

    /// Blob does not exist
    #[error("Blob not found: {name}")]
    BlobNotFound { name: String },
}

impl StorageError {
    /// Whether the failure came from the network or the storage service
    /// rather than from the request itself
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Store(object_store::Error::Generic { .. }))
    }
}

/// Archive transfer errors (download and upload)
#[derive(Error, Debug)]
pub enum TransferError {
    /// Local file I/O failed
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Network error talking to the cache service or storage
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Direct storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Fewer bytes than announced were transferred
    #[error("Incomplete transfer: received {received} bytes, expected {expected} bytes")]
    IncompleteTransfer { received: u64, expected: u64 },

    /// Downloaded bytes do not match the announced checksum
    #[error("Checksum mismatch. Expected: {expected}, got: {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Temporary download file could not be moved onto the destination
    #[error("Atomic file operation failed: could not persist download to {path}")]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A download segment did not finish in time
    #[error("Segment {range} did not complete within {seconds} seconds")]
    SegmentTimeout { range: String, seconds: u64 },
}

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Lookup,
    Download,
    Reserve,
    Upload,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Lookup => "lookup",
            Stage::Download => "download",
            Stage::Reserve => "reserve",
            Stage::Upload => "upload",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Transfer error
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Failure attributed to one stage of the save/restore pipeline
    #[error("Cache {stage} failed")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Attribute an error to a pipeline stage
    pub fn stage(stage: Stage, error: impl Into<AppError>) -> Self {
        Self::Stage {
            stage,
            source: Box::new(error.into()),
        }
    }

    /// The stage this error was raised in, if known
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            AppError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Check if retrying the whole operation later might succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Transport(e) => e.is_transient(),
            AppError::Transfer(TransferError::Transport(e)) => e.is_transient(),
            AppError::Storage(e) | AppError::Transfer(TransferError::Storage(e)) => {
                e.is_transient()
            }
            AppError::Transfer(TransferError::IncompleteTransfer { .. })
            | AppError::Transfer(TransferError::ChecksumMismatch { .. })
            | AppError::Transfer(TransferError::SegmentTimeout { .. }) => true,
            AppError::Stage { source, .. } => source.is_recoverable(),

            AppError::Config(_) | AppError::Validation(_) => false,

            _ => false,
        }
    }

    /// The error and every underlying cause, joined with `: `
    ///
    /// `Display` shows only the outermost message; this is what should reach
    /// the user so the root cause is never lost.
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            report.push_str(": ");
            report.push_str(&cause.to_string());
            source = cause.source();
        }
        report
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::Transport(_) => "transport",
            AppError::Storage(_) => "storage",
            AppError::Transfer(_) => "transfer",
            AppError::Stage { source, .. } => source.category(),
            AppError::Io(_) => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Transport result type alias
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Storage result type alias
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Transfer result type alias
pub type TransferResult<T> = std::result::Result<T, TransferError>;
