//! Save and restore façade over the cache pipeline
//!
//! [`CacheEngine`] resolves its backend once at construction and then drives
//! each request through validation, lookup or reservation, transfer and
//! commit. Every failure is attributed to the stage that raised it via
//! [`AppError::Stage`]; a missing entry or a refused reservation is an
//! ordinary outcome.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::client::{storage_handler, CacheServiceClient};
use crate::app::download::Downloader;
use crate::app::lookup::{lookup_container, lookup_service};
use crate::app::models::{ArtifactCacheEntry, CacheKey};
use crate::app::secrets::SecretMasker;
use crate::app::storage::{azure_container, blob_name, BlobUpload, ObjectContainer};
use crate::app::upload::{UploadOptions, Uploader};
use crate::app::version::{compute_version_with, CacheVersion, CompressionMethod, VersionOptions};
use crate::config::EngineConfig;
use crate::errors::{AppError, ConfigError, Result, Stage, ValidationError};

/// Where cache entries live
#[derive(Debug, Clone)]
pub enum CacheBackend {
    /// The CI cache service (reserve, chunked upload, commit)
    Service(Uploader),
    /// A blob container addressed directly
    Container(Arc<dyn ObjectContainer>),
}

/// Request to save an archive
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Key to store the archive under
    pub key: String,
    /// Paths the archive was built from (they determine the version)
    pub paths: Vec<String>,
    /// Archive file to upload
    pub archive: PathBuf,
    pub compression: CompressionMethod,
    pub version_options: VersionOptions,
}

/// Request to restore an archive
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Primary key
    pub key: String,
    /// Fallback keys in priority order
    pub restore_keys: Vec<String>,
    /// Paths the archive was built from (they determine the version)
    pub paths: Vec<String>,
    /// Where to write the archive
    pub archive: PathBuf,
    pub compression: CompressionMethod,
    pub version_options: VersionOptions,
}

/// Result of a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Archive uploaded and committed
    Saved {
        /// Reserved id (direct-storage saves have none)
        cache_id: Option<i64>,
        size: u64,
    },
    /// Another writer owns the key; nothing was uploaded
    Skipped,
}

/// Result of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No key matched
    NotFound,
    /// An entry matched and downloading was not requested
    Found { matched_key: String, exact: bool },
    /// Archive written to the requested path
    Restored {
        matched_key: String,
        /// The primary key matched, not a fallback
        exact: bool,
        size: u64,
    },
}

/// Cache save/restore engine
#[derive(Debug)]
pub struct CacheEngine {
    backend: CacheBackend,
    downloader: Downloader,
    masker: SecretMasker,
    upload: UploadOptions,
    max_archive_size: u64,
}

impl CacheEngine {
    /// Assemble an engine from already-built parts
    pub fn new(
        backend: CacheBackend,
        downloader: Downloader,
        masker: SecretMasker,
        upload: UploadOptions,
        max_archive_size: u64,
    ) -> Self {
        Self {
            backend,
            downloader,
            masker,
            upload,
            max_archive_size,
        }
    }

    /// Build an engine from resolved configuration
    ///
    /// A configured container takes precedence over the cache service.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if no backend is configured or an HTTP client
    /// cannot be built.
    pub fn from_config(config: &EngineConfig, masker: SecretMasker) -> Result<Self> {
        let container: Option<Arc<dyn ObjectContainer>> = match &config.container {
            Some(container) => {
                let azure = azure_container(
                    &container.connection,
                    &container.container,
                    &config.client,
                    &config.retry,
                )?
                .with_stall_timeout(config.download.stall_timeout);
                masker.register(&container.connection.sas);
                info!("Using blob container {}", container.container);
                let azure: Arc<dyn ObjectContainer> = Arc::new(azure);
                Some(azure)
            }
            None => None,
        };

        let backend = match (&container, &config.service) {
            (Some(container), _) => CacheBackend::Container(Arc::clone(container)),
            (None, Some(service)) => {
                let client = CacheServiceClient::new(service, &config.client, config.retry.clone())?;
                CacheBackend::Service(Uploader::new(Arc::new(client), config.upload))
            }
            (None, None) => {
                return Err(ConfigError::MissingEnvVar {
                    name: crate::constants::env::CACHE_URL,
                }
                .into())
            }
        };

        let downloader = Downloader::new(
            storage_handler(&config.client, config.retry.clone())?,
            container,
            config.download.clone(),
        );

        Ok(Self::new(
            backend,
            downloader,
            masker,
            config.upload,
            config.max_archive_size,
        ))
    }

    /// Attribute a failure to `stage` and log it with secrets masked
    fn failed(&self, stage: Stage, error: impl Into<AppError>) -> AppError {
        let error = AppError::stage(stage, error);
        warn!("{}", self.masker.redact(&error.report()));
        error
    }

    /// Backend chosen at construction
    pub fn backend(&self) -> &CacheBackend {
        &self.backend
    }

    /// Secret registry shared with lookups
    pub fn masker(&self) -> &SecretMasker {
        &self.masker
    }

    /// Save an archive under a key
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stage` naming the stage that failed. A refused
    /// reservation or an existing entry is `SaveOutcome::Skipped`, including
    /// a container blob created by another job while ours was uploading.
    pub async fn save(&self, request: &SaveRequest) -> Result<SaveOutcome> {
        let keys = CacheKey::single(request.key.as_str())
            .map_err(|e| self.failed(Stage::Validate, e))?;
        let version = version_for(&request.paths, request.compression, request.version_options)?;

        let size = tokio::fs::metadata(&request.archive)
            .await
            .map_err(|e| self.failed(Stage::Validate, e))?
            .len();
        if size > self.max_archive_size {
            return Err(self.failed(
                Stage::Validate,
                ValidationError::ArchiveTooLarge {
                    size,
                    limit: self.max_archive_size,
                },
            ));
        }

        info!("Saving cache with key {} ({} bytes)", keys.primary(), size);

        match &self.backend {
            CacheBackend::Service(uploader) => {
                let ticket = uploader
                    .reserve(keys.primary(), &version, Some(size))
                    .await
                    .map_err(|e| self.failed(Stage::Reserve, e))?;
                let Some(cache_id) = ticket.cache_id else {
                    info!("Cache key {} is not available for saving, skipping", keys.primary());
                    return Ok(SaveOutcome::Skipped);
                };

                uploader
                    .upload(cache_id, &request.archive)
                    .await
                    .map_err(|e| self.failed(Stage::Upload, e))?;
                uploader
                    .commit(cache_id, size)
                    .await
                    .map_err(|e| self.failed(Stage::Commit, e))?;

                Ok(SaveOutcome::Saved {
                    cache_id: Some(cache_id),
                    size,
                })
            }
            CacheBackend::Container(container) => {
                let name = blob_name(&version, keys.primary());
                let existing = container
                    .entry(&name)
                    .await
                    .map_err(|e| self.failed(Stage::Reserve, e))?;
                if existing.is_some() {
                    warn!("Cache already exists for key {}, skipping", keys.primary());
                    return Ok(SaveOutcome::Skipped);
                }

                let uploaded = container
                    .upload_file(&name, &request.archive, self.upload.concurrency)
                    .await
                    .map_err(|e| self.failed(Stage::Upload, e))?;

                match uploaded {
                    BlobUpload::Created { size } => Ok(SaveOutcome::Saved {
                        cache_id: None,
                        size,
                    }),
                    BlobUpload::AlreadyExists => {
                        warn!(
                            "Cache for key {} was saved by another job first, skipping",
                            keys.primary()
                        );
                        Ok(SaveOutcome::Skipped)
                    }
                }
            }
        }
    }

    /// Find the best entry for a key list
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stage` with `Stage::Lookup` when the backend fails.
    pub async fn lookup(
        &self,
        keys: &CacheKey,
        version: &CacheVersion,
    ) -> Result<Option<ArtifactCacheEntry>> {
        let entry = match &self.backend {
            CacheBackend::Service(uploader) => {
                lookup_service(uploader.client(), keys, version, &self.masker)
                    .await
                    .map_err(|e| self.failed(Stage::Lookup, e))?
            }
            CacheBackend::Container(container) => {
                lookup_container(container.as_ref(), keys, version, &self.masker)
                    .await
                    .map_err(|e| self.failed(Stage::Lookup, e))?
            }
        };
        Ok(entry)
    }

    /// Restore the best matching archive
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stage` naming the stage that failed. The
    /// destination is untouched unless the download completed.
    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreOutcome> {
        let keys = CacheKey::new(request.key.as_str(), request.restore_keys.iter().cloned())
            .map_err(|e| self.failed(Stage::Validate, e))?;
        let version = version_for(&request.paths, request.compression, request.version_options)?;

        let Some(entry) = self.lookup(&keys, &version).await? else {
            info!("Cache not found for keys: {}", keys.joined());
            return Ok(RestoreOutcome::NotFound);
        };

        let matched_key = match entry.cache_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => keys.primary().to_string(),
        };
        let exact = keys.is_exact_match(&matched_key);

        if self.downloader.options().lookup_only {
            info!("Cache found for key {} (lookup only)", matched_key);
            return Ok(RestoreOutcome::Found { matched_key, exact });
        }

        let report = self
            .downloader
            .download(&entry, &request.archive)
            .await
            .map_err(|e| self.failed(Stage::Download, e))?;

        info!(
            "Cache restored from key {} ({} bytes)",
            matched_key, report.bytes
        );
        Ok(RestoreOutcome::Restored {
            matched_key,
            exact,
            size: report.bytes,
        })
    }
}

fn version_for(
    paths: &[String],
    compression: CompressionMethod,
    options: VersionOptions,
) -> Result<CacheVersion> {
    if paths.is_empty() {
        return Err(AppError::stage(Stage::Validate, ValidationError::MissingPaths));
    }
    Ok(compute_version_with(paths, compression, options))
}
