//! [`ObjectContainer`] over an `object_store` backend
//!
//! Uploads never overwrite. An archive that fits in one block is written
//! with a single create-only put. Larger archives are written to a unique
//! staging name with the store's concurrent multipart upload and then copied
//! onto the final name with `copy_if_not_exists`, so the entry appears in
//! one step and a concurrent writer that got there first wins cleanly.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, WriteMultipart};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use super::{BlobEntry, BlobUpload, ObjectContainer};
use crate::app::chunks::{partition, ChunkRange, SharedArchive};
use crate::constants::{download, storage};
use crate::errors::{StorageError, StorageResult, TransferError, TransferResult, TransportError};

/// Public location of the container, used to hand out signed blob URLs
#[derive(Clone)]
struct SignedContainer {
    url: Url,
    sas: String,
}

/// Blob container backed by an [`ObjectStore`]
pub struct StoreContainer {
    store: Arc<dyn ObjectStore>,
    signed: Option<SignedContainer>,
    block_size: u64,
    stall_timeout: Duration,
}

impl fmt::Debug for StoreContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The store's Debug output can include its credentials
        f.debug_struct("StoreContainer")
            .field("store", &self.store.to_string())
            .field("url", &self.signed.as_ref().map(|s| s.url.as_str()))
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl StoreContainer {
    /// Wrap a store whose root is the container
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            signed: None,
            block_size: storage::DEFAULT_BLOCK_SIZE,
            stall_timeout: download::DEFAULT_STALL_TIMEOUT,
        }
    }

    /// Hand out blob URLs under `container_url`, signed with `sas`
    pub fn with_signed_url(mut self, container_url: Url, sas: impl Into<String>) -> Self {
        self.signed = Some(SignedContainer {
            url: container_url,
            sas: sas.into(),
        });
        self
    }

    /// Override the block size used for uploads
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Abort a download after this long without data
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    async fn put_single(
        &self,
        target: &ObjectPath,
        archive: &SharedArchive,
    ) -> TransferResult<BlobUpload> {
        let size = archive.len();
        let body = if archive.is_empty() {
            Bytes::new()
        } else {
            archive
                .read_range(ChunkRange {
                    start: 0,
                    end: size - 1,
                })
                .await?
        };

        let result = self
            .store
            .put_opts(
                target,
                body.into(),
                PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                },
            )
            .await;

        match result {
            Ok(_) => Ok(BlobUpload::Created { size }),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(BlobUpload::AlreadyExists),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    async fn put_staged(
        &self,
        target: &ObjectPath,
        archive: &SharedArchive,
        concurrency: usize,
    ) -> TransferResult<BlobUpload> {
        let staging = staging_path(target);
        self.write_multipart(&staging, archive, concurrency).await?;

        let result = self.store.copy_if_not_exists(&staging, target).await;
        if let Err(e) = self.store.delete(&staging).await {
            warn!("Failed to remove staged upload {}: {}", staging, e);
        }

        match result {
            Ok(()) => Ok(BlobUpload::Created {
                size: archive.len(),
            }),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(BlobUpload::AlreadyExists),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    async fn write_multipart(
        &self,
        staging: &ObjectPath,
        archive: &SharedArchive,
        concurrency: usize,
    ) -> TransferResult<()> {
        let upload = self
            .store
            .put_multipart(staging)
            .await
            .map_err(StorageError::from)?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.block_size as usize);

        let written = async {
            for range in partition(archive.len(), self.block_size) {
                writer
                    .wait_for_capacity(concurrency.max(1))
                    .await
                    .map_err(StorageError::from)?;
                writer.put(archive.read_range(range).await?);
            }
            Ok::<(), TransferError>(())
        }
        .await;

        match written {
            Ok(()) => {
                writer.finish().await.map_err(StorageError::from)?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!("Failed to abort upload of {}: {}", staging, abort);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ObjectContainer for StoreContainer {
    async fn list_entries(&self, prefix: &str) -> StorageResult<Vec<BlobEntry>> {
        let prefix = ObjectPath::from(prefix);
        let entries: Vec<BlobEntry> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| blob_entry(&meta))
            .try_collect()
            .await?;

        debug!("Listed {} blobs under prefix {}", entries.len(), prefix);
        Ok(entries)
    }

    async fn entry(&self, name: &str) -> StorageResult<Option<BlobEntry>> {
        match self.store.head(&ObjectPath::from(name)).await {
            Ok(meta) => Ok(Some(blob_entry(&meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn download_to(&self, name: &str, file: &mut File) -> TransferResult<u64> {
        let object = match self.store.get(&ObjectPath::from(name)).await {
            Ok(object) => object,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::BlobNotFound {
                    name: name.to_string(),
                }
                .into())
            }
            Err(e) => return Err(StorageError::from(e).into()),
        };

        let expected = object.meta.size as u64;
        let mut stream = object.into_stream();
        let mut received = 0u64;
        loop {
            let next = tokio::time::timeout(self.stall_timeout, stream.next())
                .await
                .map_err(|_| TransportError::Stalled {
                    seconds: self.stall_timeout.as_secs(),
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(StorageError::from)?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;

        if received != expected {
            return Err(TransferError::IncompleteTransfer { received, expected });
        }
        Ok(received)
    }

    async fn upload_file(
        &self,
        name: &str,
        path: &Path,
        concurrency: usize,
    ) -> TransferResult<BlobUpload> {
        let archive = SharedArchive::open(path).await?;
        let target = ObjectPath::from(name);

        let outcome = if archive.len() <= self.block_size {
            self.put_single(&target, &archive).await?
        } else {
            debug!(
                "Uploading {} bytes in blocks of {} with concurrency {}",
                archive.len(),
                self.block_size,
                concurrency
            );
            self.put_staged(&target, &archive, concurrency).await?
        };

        match outcome {
            BlobUpload::Created { size } => info!("Uploaded {} bytes to blob {}", size, target),
            BlobUpload::AlreadyExists => info!("Blob {} was created by another writer", target),
        }
        Ok(outcome)
    }

    fn blob_url(&self, name: &str) -> Option<Url> {
        let signed = self.signed.as_ref()?;
        let mut url = signed.url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(ObjectPath::from(name).parts());
        url.set_query(Some(&signed.sas));
        Some(url)
    }
}

fn blob_entry(meta: &ObjectMeta) -> BlobEntry {
    BlobEntry {
        name: meta.location.to_string(),
        size: meta.size as u64,
        creation_time: Some(meta.last_modified),
    }
}

static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique name for a multi-block upload in progress
fn staging_path(target: &ObjectPath) -> ObjectPath {
    let nonce = format!(
        "{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    );
    ObjectPath::from(format!("{}/{}.{}", storage::STAGING_PREFIX, target, nonce))
}
