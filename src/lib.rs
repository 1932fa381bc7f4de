//! Runner Cache Library
//!
//! Saves and restores CI build caches: archives are fingerprinted by the
//! paths and compression that produced them, uploaded in parallel chunks to
//! the cache service or a blob container, and restored with segmented
//! ranged downloads.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(ENV_CACHE_URL, "ACTIONS_CACHE_URL");
        assert_eq!(ENV_RUNTIME_TOKEN, "ACTIONS_RUNTIME_TOKEN");
        assert!(USER_AGENT.starts_with("runner-cache/"));
    }

    #[test]
    fn test_error_types() {
        let error = AppError::from(errors::ValidationError::MissingPaths);

        assert_eq!(error.category(), "validation");
        assert!(!error.is_recoverable());
    }
}
