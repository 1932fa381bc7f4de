//! Reservation, chunked upload and commit against the cache service
//!
//! Saving an archive is a three step exchange:
//!
//! 1. [`Uploader::reserve`] asks for a cache id for `(key, version)`. A
//!    refusal is not an error; it yields a ticket without an id and the
//!    caller skips the save.
//! 2. [`Uploader::upload`] sends the archive as `PATCH` requests of at most
//!    `chunk_size` bytes from a pool of cooperative workers that share one
//!    claim cursor and one read-only file descriptor.
//! 3. [`Uploader::commit`] finalizes the entry with the total size, and is
//!    only called after every chunk was acknowledged.

use std::path::Path;
use std::sync::Arc;

use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::app::chunks::{run_workers, ChunkCursor, ChunkRange, SharedArchive};
use crate::app::client::http::status_error;
use crate::app::client::CacheServiceClient;
use crate::app::models::{
    CommitCacheRequest, ReservationTicket, ReserveCacheRequest, ReserveCacheResponse,
};
use crate::app::version::CacheVersion;
use crate::constants::{service, upload};
use crate::errors::{ConfigError, ConfigResult, TransferResult, TransportError, TransportResult};

/// Upload tuning options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Chunk workers running at once
    pub concurrency: usize,
    /// Bytes per chunk
    pub chunk_size: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            concurrency: upload::DEFAULT_CONCURRENCY,
            chunk_size: upload::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl UploadOptions {
    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 || self.concurrency > upload::MAX_CONCURRENCY {
            return Err(ConfigError::InvalidValue {
                field: "upload.concurrency".to_string(),
                value: self.concurrency.to_string(),
                reason: format!("Must be between 1 and {}", upload::MAX_CONCURRENCY),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "upload.chunk_size".to_string(),
                value: "0".to_string(),
                reason: "Chunk size must be at least 1 byte".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of a completed upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// Bytes sent
    pub bytes: u64,
    /// Number of chunks sent
    pub chunks: u64,
}

/// Uploads archives to the cache service
#[derive(Debug, Clone)]
pub struct Uploader {
    client: Arc<CacheServiceClient>,
    options: UploadOptions,
}

impl Uploader {
    /// Create an uploader over a shared service client
    pub fn new(client: Arc<CacheServiceClient>, options: UploadOptions) -> Self {
        Self { client, options }
    }

    /// Options this uploader was built with
    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Service client shared with lookups
    pub fn client(&self) -> &CacheServiceClient {
        &self.client
    }

    /// Reserve a cache id for `key` at `version`
    ///
    /// Any non-success status after retries produces a ticket without an id
    /// and a warning; it is not an error.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` only when no response could be obtained or a
    /// success response cannot be decoded.
    pub async fn reserve(
        &self,
        key: &str,
        version: &CacheVersion,
        cache_size: Option<u64>,
    ) -> TransportResult<ReservationTicket> {
        let url = self.client.endpoint("caches")?;
        let body = ReserveCacheRequest {
            key,
            version: version.as_str(),
            cache_size,
        };

        let response = match self
            .client
            .api()
            .send("cache reservation", |http| http.post(url.clone()).json(&body))
            .await
        {
            Ok(response) => response,
            // Retryable statuses that never cleared still came from the server
            Err(TransportError::RetriesExhausted { attempts, source }) => {
                let status = match *source {
                    TransportError::Status { status, .. } => status,
                    TransportError::RateLimited { .. } => 429,
                    other => {
                        return Err(TransportError::RetriesExhausted {
                            attempts,
                            source: Box::new(other),
                        })
                    }
                };
                warn!("Unable to reserve cache with key {}: HTTP {}", key, status);
                return Ok(ReservationTicket {
                    cache_id: None,
                    status_code: status,
                });
            }
            Err(e) => return Err(e),
        };

        let status = response.status();
        if !status.is_success() {
            let error = status_error(response).await;
            warn!(
                "Unable to reserve cache with key {}, another job may be creating this cache: {}",
                key, error
            );
            return Ok(ReservationTicket {
                cache_id: None,
                status_code: status.as_u16(),
            });
        }

        let reserved: ReserveCacheResponse = response.json().await?;
        debug!("Reserved cache id {} for key {}", reserved.cache_id, key);
        Ok(ReservationTicket {
            cache_id: Some(reserved.cache_id),
            status_code: status.as_u16(),
        })
    }

    /// Upload the archive at `path` to reserved cache `cache_id`
    ///
    /// # Errors
    ///
    /// Returns the first chunk failure; no further chunks are started after
    /// it. The archive descriptor is closed on every path.
    pub async fn upload(&self, cache_id: i64, path: &Path) -> TransferResult<UploadReport> {
        let archive = SharedArchive::open(path).await?;
        let cursor = ChunkCursor::new(archive.len(), self.options.chunk_size);
        let chunks = cursor.chunk_count();
        let url = self.client.endpoint(&format!("caches/{cache_id}"))?;

        info!(
            "Uploading {} bytes to cache {} in {} chunks with concurrency {}",
            archive.len(),
            cache_id,
            chunks,
            self.options.concurrency.min(chunks as usize)
        );

        run_workers(&cursor, self.options.concurrency, |range| {
            let archive = &archive;
            let url = &url;
            async move {
                let body = archive.read_range(range).await?;
                self.upload_chunk(url, range, body).await
            }
        })
        .await?;

        Ok(UploadReport {
            bytes: archive.len(),
            chunks,
        })
    }

    async fn upload_chunk(
        &self,
        url: &url::Url,
        range: ChunkRange,
        body: bytes::Bytes,
    ) -> TransferResult<()> {
        let content_range = range.content_range();
        let response = self
            .client
            .api()
            .send("chunk upload", |http| {
                http.patch(url.clone())
                    .header(CONTENT_TYPE, service::OCTET_STREAM)
                    .header(CONTENT_RANGE, content_range.as_str())
                    .body(body.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await.into());
        }
        debug!("Uploaded chunk {}", range);
        Ok(())
    }

    /// Commit cache `cache_id` with its final size
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the service does not accept the commit.
    pub async fn commit(&self, cache_id: i64, size: u64) -> TransportResult<()> {
        let url = self.client.endpoint(&format!("caches/{cache_id}"))?;
        let body = CommitCacheRequest { size };

        let response = self
            .client
            .api()
            .send("cache commit", |http| http.post(url.clone()).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        info!("Committed cache {} ({} bytes)", cache_id, size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::{ClientConfig, RetryPolicy, ServiceConfig};
    use crate::app::version::{compute_version, CompressionMethod};
    use crate::errors::TransferError;
    use tempfile::tempdir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn uploader(server: &MockServer, options: UploadOptions) -> Uploader {
        let service = ServiceConfig::new(&server.uri(), "token").unwrap();
        let client =
            CacheServiceClient::new(&service, &ClientConfig::default(), RetryPolicy::immediate(2))
                .unwrap();
        Uploader::new(Arc::new(client), options)
    }

    fn version() -> CacheVersion {
        compute_version(&["target"], CompressionMethod::Gzip)
    }

    #[test]
    fn test_options_validation() {
        assert!(UploadOptions::default().validate().is_ok());
        assert!(UploadOptions {
            concurrency: 0,
            ..UploadOptions::default()
        }
        .validate()
        .is_err());
        assert!(UploadOptions {
            chunk_size: 0,
            ..UploadOptions::default()
        }
        .validate()
        .is_err());
    }

    #[tokio::test]
    async fn test_reserve_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_apis/artifactcache/caches"))
            .and(body_json(serde_json::json!({
                "key": "k",
                "version": version().as_str(),
                "cacheSize": 42
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"cacheId": 7})))
            .mount(&server)
            .await;

        let ticket = uploader(&server, UploadOptions::default())
            .reserve("k", &version(), Some(42))
            .await
            .unwrap();
        assert_eq!(ticket.cache_id, Some(7));
        assert!(ticket.is_reserved());
    }

    #[tokio::test]
    async fn test_reserve_conflict_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
            .expect(1)
            .mount(&server)
            .await;

        let ticket = uploader(&server, UploadOptions::default())
            .reserve("k", &version(), None)
            .await
            .unwrap();
        assert_eq!(ticket.cache_id, None);
        assert_eq!(ticket.status_code, 409);
    }

    #[tokio::test]
    async fn test_reserve_server_errors_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let ticket = uploader(&server, UploadOptions::default())
            .reserve("k", &version(), None)
            .await
            .unwrap();
        assert_eq!(ticket.cache_id, None);
        assert_eq!(ticket.status_code, 503);
    }

    #[tokio::test]
    async fn test_upload_sends_content_ranges() {
        let server = MockServer::start().await;
        for range in ["bytes 0-3/*", "bytes 4-7/*", "bytes 8-9/*"] {
            Mock::given(method("PATCH"))
                .and(path("/_apis/artifactcache/caches/5"))
                .and(header("content-range", range))
                .and(header("content-type", "application/octet-stream"))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;
        }

        let dir = tempdir().unwrap();
        let archive = dir.path().join("cache.tgz");
        std::fs::write(&archive, b"0123456789").unwrap();

        let report = uploader(
            &server,
            UploadOptions {
                concurrency: 2,
                chunk_size: 4,
            },
        )
        .upload(5, &archive)
        .await
        .unwrap();

        assert_eq!(report, UploadReport { bytes: 10, chunks: 3 });
    }

    #[tokio::test]
    async fn test_empty_archive_sends_no_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.tgz");
        std::fs::write(&archive, b"").unwrap();

        let report = uploader(&server, UploadOptions::default())
            .upload(5, &archive)
            .await
            .unwrap();
        assert_eq!(report, UploadReport { bytes: 0, chunks: 0 });
    }

    #[tokio::test]
    async fn test_failed_chunk_stops_upload() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad chunk"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let archive = dir.path().join("cache.tgz");
        std::fs::write(&archive, vec![0u8; 100]).unwrap();

        let result = uploader(
            &server,
            UploadOptions {
                concurrency: 1,
                chunk_size: 10,
            },
        )
        .upload(5, &archive)
        .await;

        assert!(matches!(
            result,
            Err(TransferError::Transport(TransportError::Status { status: 400, .. }))
        ));
    }

    #[tokio::test]
    async fn test_commit_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_apis/artifactcache/caches/5"))
            .and(body_json(serde_json::json!({"size": 10})))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let result = uploader(&server, UploadOptions::default()).commit(5, 10).await;
        assert!(matches!(result, Err(TransportError::Status { status: 400, .. })));
    }
}
