//! Archive download engine
//!
//! A found cache entry is downloaded by exactly one strategy, chosen up
//! front by [`DownloadStrategy::select`]:
//!
//! 1. [`DownloadStrategy::Segmented`]: the archive is hosted on managed blob
//!    storage and segmented downloads are enabled
//! 2. [`DownloadStrategy::Container`]: a direct-storage container is
//!    configured
//! 3. [`DownloadStrategy::Stream`]: everything else
//!
//! A strategy that fails does not fall through to the next one. Every
//! strategy writes into a [`StagedFile`] so the destination only appears
//! once the whole archive has arrived.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::app::client::HttpHandler;
use crate::app::models::ArtifactCacheEntry;
use crate::app::storage::ObjectContainer;
use crate::constants::download;
use crate::errors::{ConfigError, ConfigResult, TransferError, TransferResult, TransportError};

pub mod segmented;
pub mod staging;
pub mod stream;

pub use staging::StagedFile;

/// Download tuning options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Use parallel ranged downloads for managed blob storage
    pub segmented: bool,
    /// Segments in flight at once
    pub concurrency: usize,
    /// Bytes per segment
    pub segment_size: u64,
    /// Upper bound on fetching one segment
    pub segment_timeout: Duration,
    /// Abort a streaming download after this long without data
    pub stall_timeout: Duration,
    /// Resolve the entry but skip the download
    pub lookup_only: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            segmented: true,
            concurrency: download::DEFAULT_CONCURRENCY,
            segment_size: download::DEFAULT_SEGMENT_SIZE,
            segment_timeout: download::DEFAULT_SEGMENT_TIMEOUT,
            stall_timeout: download::DEFAULT_STALL_TIMEOUT,
            lookup_only: false,
        }
    }
}

impl DownloadOptions {
    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 {
            return Err(invalid("download.concurrency", "0", "Must be at least 1"));
        }
        if self.segment_size == 0 {
            return Err(invalid("download.segment_size", "0", "Must be at least 1 byte"));
        }
        if self.segment_timeout.is_zero() {
            return Err(invalid("download.segment_timeout", "0s", "Must be positive"));
        }
        if self.stall_timeout.is_zero() {
            return Err(invalid("download.stall_timeout", "0s", "Must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// How an archive will be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStrategy {
    Segmented,
    Container,
    Stream,
}

impl DownloadStrategy {
    /// Pick the strategy for an archive location
    ///
    /// Entries without a location can only be fetched from a container.
    pub fn select(location: Option<&Url>, options: &DownloadOptions, has_container: bool) -> Self {
        if options.segmented && location.is_some_and(is_managed_blob_host) {
            DownloadStrategy::Segmented
        } else if has_container {
            DownloadStrategy::Container
        } else {
            DownloadStrategy::Stream
        }
    }
}

impl fmt::Display for DownloadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadStrategy::Segmented => "segmented",
            DownloadStrategy::Container => "container",
            DownloadStrategy::Stream => "stream",
        };
        f.write_str(name)
    }
}

/// Whether `url` points at a managed blob storage endpoint
pub fn is_managed_blob_host(url: &Url) -> bool {
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        download::MANAGED_BLOB_DOMAINS
            .iter()
            .any(|suffix| host.ends_with(suffix))
    })
}

/// Result of a completed download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    /// Bytes written to the destination
    pub bytes: u64,
    /// Strategy that fetched the archive
    pub strategy: DownloadStrategy,
}

/// Downloads cache archives to local files
#[derive(Debug)]
pub struct Downloader {
    http: HttpHandler,
    container: Option<Arc<dyn ObjectContainer>>,
    options: DownloadOptions,
}

impl Downloader {
    /// Create a downloader
    ///
    /// `http` must be a credential-free handler: archive URLs are pre-signed
    /// and must never receive the cache service token.
    pub fn new(
        http: HttpHandler,
        container: Option<Arc<dyn ObjectContainer>>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            http,
            container,
            options,
        }
    }

    /// Options this downloader was built with
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Download the archive of `entry` to `destination`
    ///
    /// # Errors
    ///
    /// Returns `TransferError` if the entry has no usable location or the
    /// chosen strategy fails. The destination is left untouched on error.
    pub async fn download(
        &self,
        entry: &ArtifactCacheEntry,
        destination: &Path,
    ) -> TransferResult<DownloadReport> {
        // The location is signed; keep it out of error messages
        let url = entry
            .archive_location
            .as_deref()
            .map(|location| {
                Url::parse(location).map_err(|e| TransportError::InvalidUrl {
                    url: "<archive location>".to_string(),
                    error: e.to_string(),
                })
            })
            .transpose()?;

        let strategy =
            DownloadStrategy::select(url.as_ref(), &self.options, self.container.is_some());
        if strategy != DownloadStrategy::Container && url.is_none() {
            return Err(missing("cache entry has no archive location"));
        }
        info!(
            "Downloading cache {} from {} using {} strategy",
            entry.key(),
            url.as_ref()
                .and_then(Url::host_str)
                .unwrap_or("the configured container"),
            strategy
        );

        let mut staged = StagedFile::create(destination).await?;
        let bytes = match (strategy, &self.container, &url) {
            (DownloadStrategy::Segmented, _, Some(url)) => {
                segmented::download(&self.http, url, &self.options, staged.file_mut()).await?
            }
            (DownloadStrategy::Container, Some(container), _) => {
                let name = entry
                    .storage_name
                    .as_deref()
                    .ok_or_else(|| missing("container entry has no object name"))?;
                container.download_to(name, staged.file_mut()).await?
            }
            (DownloadStrategy::Stream, _, Some(url)) => {
                stream::download(&self.http, url, self.options.stall_timeout, staged.file_mut())
                    .await?
            }
            _ => return Err(missing("cache entry has no archive location")),
        };
        staged.persist(destination).await?;

        debug!("Downloaded {} bytes to {}", bytes, destination.display());
        Ok(DownloadReport { bytes, strategy })
    }
}

fn missing(reason: &str) -> TransferError {
    TransportError::Protocol {
        reason: reason.to_string(),
    }
    .into()
}
