//! Data models for the cache transfer engine
//!
//! Keys, cache entries, reservation tickets and the JSON bodies exchanged
//! with the cache service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::keys;
use crate::errors::ValidationError;

/// Ordered, prioritized list of cache keys
///
/// The primary key is tried first, then each fallback in the order given.
/// Keys are validated once on construction and cannot change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    keys: Vec<String>,
}

impl CacheKey {
    /// Create a key list from a primary key and fallback (restore) keys
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if a key is empty, too long, contains a
    /// comma, or more than the allowed number of keys are given.
    pub fn new<P, I, S>(primary: P, fallbacks: I) -> Result<Self, ValidationError>
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = std::iter::once(primary.into())
            .chain(fallbacks.into_iter().map(Into::into))
            .collect();

        if keys.len() > keys::MAX_KEYS {
            return Err(ValidationError::TooManyKeys {
                count: keys.len(),
                max: keys::MAX_KEYS,
            });
        }

        for key in &keys {
            validate_key(key)?;
        }

        Ok(Self { keys })
    }

    /// Create a key list with only a primary key
    pub fn single(primary: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(primary, std::iter::empty::<String>())
    }

    /// The most specific key
    pub fn primary(&self) -> &str {
        &self.keys[0]
    }

    /// Fallback keys in priority order
    pub fn fallbacks(&self) -> &[String] {
        &self.keys[1..]
    }

    /// All keys in priority order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Keys joined with commas, as sent to the cache service
    pub fn joined(&self) -> String {
        self.keys.join(",")
    }

    /// Whether `key` is the primary key
    pub fn is_exact_match(&self, key: &str) -> bool {
        self.primary() == key
    }
}

/// Validate a single cache key
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    if key.chars().count() > keys::MAX_KEY_LENGTH {
        return Err(ValidationError::KeyTooLong {
            key: key.to_string(),
            max: keys::MAX_KEY_LENGTH,
        });
    }
    if key.contains(',') {
        return Err(ValidationError::KeyContainsComma {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// A stored cache entry as returned by lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactCacheEntry {
    /// Key the entry was stored under
    pub cache_key: Option<String>,
    /// URL the archive can be downloaded from
    pub archive_location: Option<String>,
    /// When the entry was created
    pub creation_time: Option<DateTime<Utc>>,
    /// Object name when the entry lives in a direct-storage container
    #[serde(skip)]
    pub storage_name: Option<String>,
}

impl ArtifactCacheEntry {
    /// Key the entry was stored under, or an empty string
    pub fn key(&self) -> &str {
        self.cache_key.as_deref().unwrap_or_default()
    }
}

/// Result of a reservation attempt
///
/// A ticket without a cache id means another writer already owns the key and
/// the save should stop without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationTicket {
    /// Reserved cache id, if the reservation succeeded
    pub cache_id: Option<i64>,
    /// HTTP status returned by the reservation request
    pub status_code: u16,
}

impl ReservationTicket {
    /// Whether the reservation produced a cache id
    pub fn is_reserved(&self) -> bool {
        self.cache_id.is_some()
    }
}

/// Request body for reserving a cache id
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveCacheRequest<'a> {
    pub key: &'a str,
    pub version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<u64>,
}

/// Response body of a successful reservation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveCacheResponse {
    pub cache_id: i64,
}

/// Request body for committing an uploaded cache
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitCacheRequest {
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_priority_order() {
        let key = CacheKey::new("linux-cargo-abc", ["linux-cargo-", "linux-"]).unwrap();

        assert_eq!(key.primary(), "linux-cargo-abc");
        assert_eq!(key.fallbacks(), ["linux-cargo-", "linux-"]);
        assert_eq!(key.joined(), "linux-cargo-abc,linux-cargo-,linux-");
        assert!(key.is_exact_match("linux-cargo-abc"));
        assert!(!key.is_exact_match("linux-"));
    }

    #[test]
    fn test_cache_key_rejects_commas() {
        let result = CacheKey::single("a,b");
        assert_eq!(
            result.unwrap_err(),
            ValidationError::KeyContainsComma {
                key: "a,b".to_string()
            }
        );
    }

    #[test]
    fn test_cache_key_rejects_long_keys() {
        let long = "k".repeat(keys::MAX_KEY_LENGTH + 1);
        assert!(matches!(
            CacheKey::single(long),
            Err(ValidationError::KeyTooLong { .. })
        ));

        let limit = "k".repeat(keys::MAX_KEY_LENGTH);
        assert!(CacheKey::single(limit).is_ok());
    }

    #[test]
    fn test_cache_key_rejects_too_many_keys() {
        let fallbacks: Vec<String> = (0..keys::MAX_KEYS).map(|i| format!("k{i}")).collect();
        assert_eq!(
            CacheKey::new("primary", fallbacks).unwrap_err(),
            ValidationError::TooManyKeys {
                count: keys::MAX_KEYS + 1,
                max: keys::MAX_KEYS
            }
        );
    }

    #[test]
    fn test_cache_key_rejects_empty_fallback() {
        assert_eq!(
            CacheKey::new("primary", [""]).unwrap_err(),
            ValidationError::EmptyKey
        );
    }

    #[test]
    fn test_entry_deserializes_camel_case() {
        let json = r#"{
            "cacheKey": "linux-cargo-abc",
            "archiveLocation": "https://example.blob.core.windows.net/c/a?sig=x",
            "creationTime": "2024-03-01T12:00:00Z"
        }"#;

        let entry: ArtifactCacheEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.key(), "linux-cargo-abc");
        assert!(entry.archive_location.is_some());
        assert!(entry.creation_time.is_some());
    }

    #[test]
    fn test_entry_tolerates_missing_fields() {
        let entry: ArtifactCacheEntry = serde_json::from_str(r#"{"cacheKey":"k"}"#).unwrap();
        assert_eq!(entry.archive_location, None);
        assert_eq!(entry.creation_time, None);
    }

    #[test]
    fn test_reserve_request_serialization() {
        let body = ReserveCacheRequest {
            key: "k",
            version: "v",
            cache_size: Some(10),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"key": "k", "version": "v", "cacheSize": 10})
        );

        let body = ReserveCacheRequest {
            key: "k",
            version: "v",
            cache_size: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"key": "k", "version": "v"})
        );
    }
}
