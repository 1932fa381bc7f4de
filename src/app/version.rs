//! Cache version fingerprinting
//!
//! A cache version disambiguates archives stored under the same key but
//! produced from different path sets or compression methods. Two saves with
//! the same paths (in the same order) and the same compression method always
//! produce the same version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::keys;
use crate::errors::ConfigError;

/// Compression method used to build the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionMethod {
    /// Implicit default, contributes nothing to the version
    #[default]
    Gzip,
    /// zstd without long-distance matching
    ZstdWithoutLong,
    /// zstd with long-distance matching
    Zstd,
}

impl CompressionMethod {
    /// Wire token for this method
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::ZstdWithoutLong => "zstd-without-long",
            CompressionMethod::Zstd => "zstd",
        }
    }

    /// Whether this is the implicit default method
    pub fn is_default(&self) -> bool {
        *self == CompressionMethod::Gzip
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" => Ok(CompressionMethod::Gzip),
            "zstd-without-long" => Ok(CompressionMethod::ZstdWithoutLong),
            "zstd" => Ok(CompressionMethod::Zstd),
            other => Err(ConfigError::InvalidValue {
                field: "compression".to_string(),
                value: other.to_string(),
                reason: "Expected one of: gzip, zstd-without-long, zstd".to_string(),
            }),
        }
    }
}

/// Options that influence the version beyond paths and compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionOptions {
    /// Allow archives created on Windows to be restored elsewhere and vice versa
    pub cross_os_archive: bool,
}

impl VersionOptions {
    fn windows_only(&self) -> bool {
        cfg!(windows) && !self.cross_os_archive
    }
}

/// Deterministic cache version identifier (lowercase hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheVersion(String);

impl CacheVersion {
    /// Get the hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the cache version for a path list and compression method
///
/// Paths are hashed in the order given. Reordering them yields a different
/// version.
///
/// # Examples
///
/// ```rust
/// use runner_cache::app::{compute_version, CompressionMethod};
///
/// let a = compute_version(&["/a", "/b"], CompressionMethod::Zstd);
/// let b = compute_version(&["/b", "/a"], CompressionMethod::Zstd);
/// assert_ne!(a, b);
/// assert_eq!(a.as_str().len(), 64);
/// ```
pub fn compute_version<S: AsRef<str>>(paths: &[S], compression: CompressionMethod) -> CacheVersion {
    compute_version_with(paths, compression, VersionOptions::default())
}

/// Compute the cache version with explicit [`VersionOptions`]
pub fn compute_version_with<S: AsRef<str>>(
    paths: &[S],
    compression: CompressionMethod,
    options: VersionOptions,
) -> CacheVersion {
    let mut components: Vec<&str> = paths.iter().map(AsRef::as_ref).collect();

    if !compression.is_default() {
        components.push(compression.as_str());
    }

    if options.windows_only() {
        components.push(keys::WINDOWS_ONLY);
    }

    components.push(keys::VERSION_SALT);

    let digest = Sha256::digest(components.join(keys::VERSION_SEPARATOR).as_bytes());
    CacheVersion(hex::encode(digest))
}
