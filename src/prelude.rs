//! Prelude module for the runner cache library
//!
//! Re-exports the items needed for typical usage with a single
//! `use runner_cache::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use runner_cache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load(None).await?.resolve(|name| std::env::var(name).ok())?;
//!     let engine = CacheEngine::from_config(&config, SecretMasker::new())?;
//!
//!     let outcome = engine
//!         .restore(&RestoreRequest {
//!             key: "cargo-linux-abc123".to_string(),
//!             restore_keys: vec!["cargo-linux-".to_string()],
//!             paths: vec!["target".to_string()],
//!             archive: PathBuf::from("cache.tzst"),
//!             compression: CompressionMethod::Zstd,
//!             version_options: VersionOptions::default(),
//!         })
//!         .await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result, Stage};

// Engine and request/outcome types
pub use crate::app::{
    ArtifactCacheEntry, CacheEngine, CacheKey, CacheVersion, CompressionMethod, RestoreOutcome,
    RestoreRequest, SaveOutcome, SaveRequest, SecretMasker, VersionOptions,
    // Fingerprinting
    compute_version, compute_version_with,
};

// Configuration
pub use crate::config::{AppConfig, EngineConfig};

// Commonly used constants
pub use crate::constants::{DEFAULT_RATE_LIMIT_RPS, ENV_CACHE_URL, ENV_RUNTIME_TOKEN, USER_AGENT};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;
