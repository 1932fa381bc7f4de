//! Core application logic for the runner cache
//!
//! This module contains the cache version fingerprint, the HTTP transport,
//! entry lookup, the download and upload engines, the direct-storage
//! container backend and the [`CacheEngine`] that drives them.
//!
//! # Examples
//!
//! ```rust
//! use runner_cache::app::{compute_version, CompressionMethod};
//!
//! let gzip = compute_version(&["target", "~/.cargo/registry"], CompressionMethod::Gzip);
//! let zstd = compute_version(&["target", "~/.cargo/registry"], CompressionMethod::Zstd);
//!
//! // Archives compressed differently never share an entry
//! assert_ne!(gzip, zstd);
//! assert_eq!(gzip.as_str().len(), 64);
//! ```

pub mod chunks;
pub mod client;
pub mod download;
pub mod lookup;
pub mod models;
pub mod orchestrator;
pub mod secrets;
pub mod storage;
pub mod upload;
pub mod version;

// Re-export main public API
pub use client::{CacheServiceClient, ClientConfig, HttpHandler, RetryPolicy, ServiceConfig};
pub use download::{DownloadOptions, DownloadReport, DownloadStrategy, Downloader};
pub use lookup::{lookup_container, lookup_service};
pub use models::{ArtifactCacheEntry, CacheKey, ReservationTicket};
pub use orchestrator::{
    CacheBackend, CacheEngine, RestoreOutcome, RestoreRequest, SaveOutcome, SaveRequest,
};
pub use secrets::SecretMasker;
pub use storage::{
    azure_container, BlobEntry, BlobUpload, ConnectionString, ObjectContainer, StoreContainer,
};
pub use upload::{UploadOptions, UploadReport, Uploader};
pub use version::{
    compute_version, compute_version_with, CacheVersion, CompressionMethod, VersionOptions,
};
