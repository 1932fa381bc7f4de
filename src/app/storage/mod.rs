//! Direct blob-container storage
//!
//! When a storage connection string and container name are configured the
//! engine bypasses the cache service entirely: entries are stored as blobs
//! named `{version}/{key}`, found by listing the version prefix, fetched by
//! name and written with the object store's concurrent multipart upload.
//!
//! The [`ObjectContainer`] trait is the seam between the engine and the
//! storage service. [`StoreContainer`] implements it over any
//! `object_store` backend; [`azure_container`] builds one for an
//! Azure-compatible blob service from a SAS connection string.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use tokio::fs::File;
use url::Url;

use crate::app::models::CacheKey;
use crate::app::version::CacheVersion;
use crate::errors::{StorageResult, TransferResult};

pub mod azure;
pub mod connection;
pub mod store;

pub use azure::azure_container;
pub use connection::ConnectionString;
pub use store::StoreContainer;

/// A blob found in a container listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// Full blob name, including the version prefix
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// When the blob was last written
    pub creation_time: Option<DateTime<Utc>>,
}

/// Result of a create-only upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobUpload {
    /// The blob was created with this many bytes
    Created { size: u64 },
    /// Another writer created the blob first; nothing was replaced
    AlreadyExists,
}

/// Operations the engine needs from an object container
#[async_trait]
pub trait ObjectContainer: Send + Sync + Debug {
    /// List every blob under the `prefix` directory
    async fn list_entries(&self, prefix: &str) -> StorageResult<Vec<BlobEntry>>;

    /// Metadata of blob `name`, or `None` if it does not exist
    async fn entry(&self, name: &str) -> StorageResult<Option<BlobEntry>>;

    /// Stream the blob `name` into `file`, returning the number of bytes written
    async fn download_to(&self, name: &str, file: &mut File) -> TransferResult<u64>;

    /// Upload the file at `path` as blob `name` unless the blob already exists
    ///
    /// At most `concurrency` blocks are in flight at once. The blob becomes
    /// visible atomically and an existing blob is never overwritten.
    async fn upload_file(
        &self,
        name: &str,
        path: &Path,
        concurrency: usize,
    ) -> TransferResult<BlobUpload>;

    /// Downloadable URL of blob `name` including its access signature, when
    /// the container is reachable over plain HTTP
    fn blob_url(&self, name: &str) -> Option<Url>;
}

/// Blob name for a cache entry
///
/// Names are normalized the way the object store encodes them, so a name
/// built here compares equal to the same blob's name in a listing.
pub fn blob_name(version: &CacheVersion, key: &str) -> String {
    ObjectPath::from(format!("{}/{}", version.as_str(), key)).to_string()
}

/// Listing prefix shared by every entry of a version
pub fn version_prefix(version: &CacheVersion) -> String {
    format!("{}/", version.as_str())
}

/// Pick the entry matching the highest-priority key
///
/// The primary key wins over any fallback; fallbacks are tried in the order
/// the caller gave them. Returns the matched key and blob.
pub fn select_entry<'a>(
    keys: &'a CacheKey,
    version: &CacheVersion,
    entries: &'a [BlobEntry],
) -> Option<(&'a str, &'a BlobEntry)> {
    keys.iter().find_map(|key| {
        let name = blob_name(version, key);
        entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| (key, entry))
    })
}
