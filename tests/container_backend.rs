//! Save and restore through a direct blob container
//!
//! Most tests run against an in-memory object store. The configured Azure
//! backend is exercised against a mock endpoint for authentication and
//! failure attribution.

mod common;

use std::sync::Arc;

use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use runner_cache::app::client::storage_handler;
use runner_cache::app::{
    compute_version, CacheBackend, CacheEngine, ClientConfig, CompressionMethod, DownloadOptions,
    Downloader, ObjectContainer, RestoreOutcome, RestoreRequest, RetryPolicy, SaveOutcome,
    SaveRequest, SecretMasker, StoreContainer, UploadOptions, VersionOptions,
};
use runner_cache::errors::Stage;

use common::{archive_bytes, engine, engine_config, write_archive};

fn container_engine(container: StoreContainer) -> CacheEngine {
    let container: Arc<dyn ObjectContainer> = Arc::new(container);
    CacheEngine::new(
        CacheBackend::Container(Arc::clone(&container)),
        Downloader::new(
            storage_handler(&ClientConfig::default(), RetryPolicy::immediate(1)).unwrap(),
            Some(container),
            DownloadOptions::default(),
        ),
        SecretMasker::silent(),
        UploadOptions {
            concurrency: 2,
            ..UploadOptions::default()
        },
        u64::MAX,
    )
}

fn blob(key: &str) -> String {
    let version = compute_version(&["node_modules"], CompressionMethod::Zstd);
    format!("{}/{}", version.as_str(), key)
}

async fn read_blob(store: &InMemory, name: &str) -> Vec<u8> {
    store
        .get(&ObjectPath::from(name))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap()
        .to_vec()
}

async fn put_blob(store: &InMemory, name: &str, body: Vec<u8>) {
    store
        .put(&ObjectPath::from(name), PutPayload::from(body))
        .await
        .unwrap();
}

fn save_request(archive: std::path::PathBuf) -> SaveRequest {
    SaveRequest {
        key: "node-modules".to_string(),
        paths: vec!["node_modules".to_string()],
        archive,
        compression: CompressionMethod::Zstd,
        version_options: VersionOptions::default(),
    }
}

fn restore_request(archive: std::path::PathBuf) -> RestoreRequest {
    RestoreRequest {
        key: "node-modules".to_string(),
        restore_keys: vec!["node-".to_string()],
        paths: vec!["node_modules".to_string()],
        archive,
        compression: CompressionMethod::Zstd,
        version_options: VersionOptions::default(),
    }
}

#[tokio::test]
async fn test_container_backend_is_preferred() {
    let engine = engine(&engine_config(&[
        (
            "RUNNER_CACHE_CONNECTION_STRING",
            "BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1;SharedAccessSignature=sv=1&sig=x",
        ),
        ("RUNNER_CACHE_CONTAINER", "build-cache"),
        // Service settings are ignored once a container is configured
        ("ACTIONS_CACHE_URL", "http://unused.invalid/"),
        ("ACTIONS_RUNTIME_TOKEN", "unused"),
    ]));
    assert!(matches!(engine.backend(), CacheBackend::Container(_)));
}

#[tokio::test]
async fn test_save_uploads_blocks() {
    let store = Arc::new(InMemory::new());
    let engine = container_engine(StoreContainer::new(store.clone()).with_block_size(1024));

    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), 3000);

    let outcome = engine.save(&save_request(archive)).await.unwrap();
    assert_eq!(
        outcome,
        SaveOutcome::Saved {
            cache_id: None,
            size: 3000
        }
    );
    assert_eq!(read_blob(&store, &blob("node-modules")).await, archive_bytes(3000));
}

#[tokio::test]
async fn test_save_skips_existing_blob() {
    let store = Arc::new(InMemory::new());
    put_blob(&store, &blob("node-modules"), b"original".to_vec()).await;
    let engine = container_engine(StoreContainer::new(store.clone()));

    let dir = TempDir::new().unwrap();
    let archive = write_archive(dir.path(), 10);

    let outcome = engine.save(&save_request(archive)).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Skipped);
    assert_eq!(read_blob(&store, &blob("node-modules")).await, b"original");
}

#[tokio::test]
async fn test_concurrent_saves_keep_one_archive() {
    let store = Arc::new(InMemory::new());
    let first = container_engine(StoreContainer::new(store.clone()).with_block_size(512));
    let second = container_engine(StoreContainer::new(store.clone()).with_block_size(512));

    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let archive_a = write_archive(dir_a.path(), 2000);
    let archive_b = dir_b.path().join("cache.tzst");
    std::fs::write(&archive_b, vec![0xAB; 1500]).unwrap();

    let request_a = save_request(archive_a);
    let request_b = save_request(archive_b);
    let (a, b) = tokio::join!(first.save(&request_a), second.save(&request_b));
    let outcomes = [a.unwrap(), b.unwrap()];

    let saved: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, SaveOutcome::Saved { .. }))
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(outcomes.contains(&SaveOutcome::Skipped));

    let stored = read_blob(&store, &blob("node-modules")).await;
    match saved[0] {
        SaveOutcome::Saved { size: 2000, .. } => assert_eq!(stored, archive_bytes(2000)),
        SaveOutcome::Saved { size: 1500, .. } => assert_eq!(stored, vec![0xAB; 1500]),
        other => panic!("Unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_restore_prefers_primary_key_and_downloads_blob() {
    let store = Arc::new(InMemory::new());
    put_blob(&store, &blob("node-"), archive_bytes(4)).await;
    put_blob(&store, &blob("node-modules"), archive_bytes(2048)).await;
    let engine = container_engine(StoreContainer::new(store).with_signed_url(
        Url::parse("https://storage.example.com/build-cache").unwrap(),
        "sv=1&sig=container-secret",
    ));

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("cache.tzst");

    let outcome = engine
        .restore(&restore_request(destination.clone()))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RestoreOutcome::Restored {
            matched_key: "node-modules".to_string(),
            exact: true,
            size: 2048
        }
    );
    assert_eq!(std::fs::read(&destination).unwrap(), archive_bytes(2048));
    assert_eq!(engine.masker().len(), 1);
}

#[tokio::test]
async fn test_restore_falls_back_without_signed_url() {
    let store = Arc::new(InMemory::new());
    put_blob(&store, &blob("node-"), archive_bytes(64)).await;
    let engine = container_engine(StoreContainer::new(store));

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("cache.tzst");

    let outcome = engine
        .restore(&restore_request(destination.clone()))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RestoreOutcome::Restored {
            matched_key: "node-".to_string(),
            exact: false,
            size: 64
        }
    );
    assert_eq!(std::fs::read(&destination).unwrap(), archive_bytes(64));
    assert!(engine.masker().is_empty());
}

#[tokio::test]
async fn test_restore_miss_in_container() {
    let store = Arc::new(InMemory::new());
    put_blob(&store, "other/node-modules", vec![1]).await;
    let engine = container_engine(StoreContainer::new(store));

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("cache.tzst");

    let outcome = engine
        .restore(&restore_request(destination.clone()))
        .await
        .unwrap();
    assert_eq!(outcome, RestoreOutcome::NotFound);
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_listing_failure_is_a_lookup_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devstoreaccount1/build-cache"))
        .and(query_param("comp", "list"))
        .and(query_param("sig", "container-secret"))
        .respond_with(ResponseTemplate::new(403).set_body_string("AuthenticationFailed"))
        .expect(1)
        .mount(&server)
        .await;

    let connection = format!(
        "BlobEndpoint={}/devstoreaccount1;SharedAccessSignature=sv=2021-08-06&sig=container-secret",
        server.uri()
    );
    let engine = engine(&engine_config(&[
        ("RUNNER_CACHE_CONNECTION_STRING", connection.as_str()),
        ("RUNNER_CACHE_CONTAINER", "build-cache"),
    ]));

    let dir = TempDir::new().unwrap();
    let error = engine
        .restore(&restore_request(dir.path().join("cache.tzst")))
        .await
        .unwrap_err();
    assert_eq!(error.failed_stage(), Some(Stage::Lookup));
    assert_eq!(error.category(), "storage");
    assert!(!engine
        .masker()
        .redact(&error.report())
        .contains("container-secret"));
}
