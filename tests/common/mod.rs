//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use runner_cache::app::{CacheEngine, RetryPolicy, SecretMasker};
use runner_cache::config::{AppConfig, EngineConfig};

/// Resolve the default configuration against a fixed set of variables
///
/// Retries are immediate so failure paths stay fast.
pub fn engine_config(vars: &[(&str, &str)]) -> EngineConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut config = AppConfig::default()
        .resolve(|name| vars.get(name).cloned())
        .unwrap();
    config.retry = RetryPolicy::immediate(2);
    config
}

/// Build an engine that records secrets without printing mask commands
pub fn engine(config: &EngineConfig) -> CacheEngine {
    CacheEngine::from_config(config, SecretMasker::silent()).unwrap()
}

/// Deterministic archive contents of `len` bytes
pub fn archive_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Write an archive of `len` bytes into `dir`
pub fn write_archive(dir: &Path, len: usize) -> PathBuf {
    let path = dir.join("cache.tzst");
    std::fs::write(&path, archive_bytes(len)).unwrap();
    path
}
