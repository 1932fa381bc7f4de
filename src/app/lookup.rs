//! Cache entry lookup
//!
//! Two strategies resolve keys to an [`ArtifactCacheEntry`]:
//!
//! - [`lookup_service`] asks the cache service, which matches the primary key
//!   exactly and fallback keys by prefix on its side.
//! - [`lookup_container`] lists the version prefix of a blob container and
//!   matches names exactly, primary key first.
//!
//! "Nothing found" is `Ok(None)`. Any archive location that is returned has
//! already been registered with the [`SecretMasker`], since it carries a
//! download signature. Container entries always carry their blob name and
//! only carry a location when the container hands out signed URLs.

use reqwest::StatusCode;
use tracing::{debug, info};

use crate::app::client::http::status_error;
use crate::app::client::CacheServiceClient;
use crate::app::models::{ArtifactCacheEntry, CacheKey};
use crate::app::secrets::SecretMasker;
use crate::app::storage::{select_entry, version_prefix, ObjectContainer};
use crate::app::version::CacheVersion;
use crate::errors::{StorageResult, TransportError, TransportResult};

/// Look up the best entry for `keys` through the cache service
///
/// # Errors
///
/// Returns `TransportError::Status` for unexpected statuses and
/// `TransportError::Protocol` when a found entry has no archive location.
pub async fn lookup_service(
    client: &CacheServiceClient,
    keys: &CacheKey,
    version: &CacheVersion,
    masker: &SecretMasker,
) -> TransportResult<Option<ArtifactCacheEntry>> {
    let mut url = client.endpoint("cache")?;
    url.query_pairs_mut()
        .append_pair("keys", &keys.joined())
        .append_pair("version", version.as_str());

    let response = client
        .api()
        .send("cache lookup", |http| http.get(url.clone()))
        .await?;

    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        debug!("No cache entry for keys {}", keys.joined());
        return Ok(None);
    }
    if !status.is_success() {
        return Err(status_error(response).await);
    }

    let entry: ArtifactCacheEntry = response.json().await?;
    let location = entry
        .archive_location
        .as_deref()
        .filter(|location| !location.is_empty())
        .ok_or_else(|| TransportError::Protocol {
            reason: "cache entry has no archive location".to_string(),
        })?;
    masker.register(location);

    info!("Cache hit for key {}", entry.key());
    Ok(Some(entry))
}

/// Look up the best entry for `keys` in a blob container
///
/// # Errors
///
/// Returns `StorageError` if the container cannot be listed.
pub async fn lookup_container(
    container: &dyn ObjectContainer,
    keys: &CacheKey,
    version: &CacheVersion,
    masker: &SecretMasker,
) -> StorageResult<Option<ArtifactCacheEntry>> {
    let entries = container.list_entries(&version_prefix(version)).await?;

    let Some((key, blob)) = select_entry(keys, version, &entries) else {
        debug!(
            "No blob among {} listed matches keys {}",
            entries.len(),
            keys.joined()
        );
        return Ok(None);
    };

    let location = container.blob_url(&blob.name).map(|url| url.to_string());
    if let Some(location) = &location {
        masker.register(location);
    }

    info!("Cache hit for key {} ({} bytes)", key, blob.size);
    Ok(Some(ArtifactCacheEntry {
        cache_key: Some(key.to_string()),
        archive_location: location,
        creation_time: blob.creation_time,
        storage_name: Some(blob.name.clone()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::{ClientConfig, RetryPolicy, ServiceConfig};
    use crate::app::storage::{blob_name, StoreContainer};
    use crate::app::version::{compute_version, CompressionMethod};
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;
    use object_store::{ObjectStore, PutPayload};
    use std::sync::Arc;
    use url::Url;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CacheServiceClient {
        let service = ServiceConfig::new(&server.uri(), "token").unwrap();
        CacheServiceClient::new(&service, &ClientConfig::default(), RetryPolicy::immediate(2))
            .unwrap()
    }

    fn version() -> CacheVersion {
        compute_version(&["~/.cargo"], CompressionMethod::Zstd)
    }

    async fn container_with(names: &[&str]) -> StoreContainer {
        let store = Arc::new(InMemory::new());
        for name in names {
            store
                .put(&ObjectPath::from(*name), PutPayload::from_static(b"archive"))
                .await
                .unwrap();
        }
        StoreContainer::new(store).with_signed_url(
            Url::parse("https://acct.blob.core.windows.net/caches").unwrap(),
            "sv=1&sig=secret",
        )
    }

    #[tokio::test]
    async fn test_container_prefers_primary_key() {
        let v = version();
        let fallback = blob_name(&v, "cargo-");
        let primary = blob_name(&v, "cargo-linux");
        let container = container_with(&[fallback.as_str(), primary.as_str()]).await;

        let masker = SecretMasker::silent();
        let keys = CacheKey::new("cargo-linux", ["cargo-"]).unwrap();
        let entry = lookup_container(&container, &keys, &v, &masker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.key(), "cargo-linux");
        assert_eq!(entry.storage_name, Some(primary));
        let location = entry.archive_location.unwrap();
        assert!(location.ends_with("?sv=1&sig=secret"));
        assert!(masker.is_registered(&location));
    }

    #[tokio::test]
    async fn test_container_ignores_other_versions() {
        let other = compute_version(&["~/.npm"], CompressionMethod::Zstd);
        let name = blob_name(&other, "cargo-linux");
        let container = container_with(&[name.as_str()]).await;

        let masker = SecretMasker::silent();
        let keys = CacheKey::single("cargo-linux").unwrap();
        let entry = lookup_container(&container, &keys, &version(), &masker)
            .await
            .unwrap();

        assert!(entry.is_none());
        assert!(masker.is_empty());
    }

    #[tokio::test]
    async fn test_no_content_is_a_miss_and_registers_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_apis/artifactcache/cache"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let masker = SecretMasker::silent();
        let keys = CacheKey::new("primary", ["fallback"]).unwrap();
        let entry = lookup_service(&client(&server), &keys, &version(), &masker)
            .await
            .unwrap();

        assert!(entry.is_none());
        assert!(masker.is_empty());
    }

    #[tokio::test]
    async fn test_hit_registers_location() {
        let server = MockServer::start().await;
        let location = format!("{}/archive?sig=secret", server.uri());
        Mock::given(method("GET"))
            .and(path("/_apis/artifactcache/cache"))
            .and(query_param("keys", "primary,fallback"))
            .and(query_param("version", version().as_str()))
            .and(header("authorization", "Bearer token"))
            .and(header("accept", "application/json;api-version=6.0-preview.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cacheKey": "fallback",
                "archiveLocation": location,
            })))
            .mount(&server)
            .await;

        let masker = SecretMasker::silent();
        let keys = CacheKey::new("primary", ["fallback"]).unwrap();
        let entry = lookup_service(&client(&server), &keys, &version(), &masker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.key(), "fallback");
        assert!(masker.is_registered(&location));
    }

    #[tokio::test]
    async fn test_hit_without_location_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"cacheKey": "k"})),
            )
            .mount(&server)
            .await;

        let keys = CacheKey::single("k").unwrap();
        let result =
            lookup_service(&client(&server), &keys, &version(), &SecretMasker::silent()).await;
        assert!(matches!(result, Err(TransportError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_unexpected_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad keys"))
            .mount(&server)
            .await;

        let keys = CacheKey::single("k").unwrap();
        let result =
            lookup_service(&client(&server), &keys, &version(), &SecretMasker::silent()).await;
        match result {
            Err(TransportError::Status { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad keys");
            }
            other => panic!("Expected Status error, got {:?}", other),
        }
    }
}
