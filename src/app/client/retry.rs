//! Uniform retry policy for cache service and storage requests
//!
//! Every network call goes through [`RetryPolicy::run`]. Server errors,
//! throttling and recoverable socket failures are retried with exponential
//! backoff up to a fixed number of attempts; everything else fails at once.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::limits;
use crate::errors::{ConfigError, ConfigResult, TransportError, TransportResult};

/// Socket-level failures that are worth another attempt
const RETRYABLE_IO_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::TimedOut,
    io::ErrorKind::UnexpectedEof,
    io::ErrorKind::NotConnected,
];

/// Check whether an HTTP status is worth retrying
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

fn is_retryable_reqwest(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }

    // Walk the source chain looking for a recoverable io error
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return RETRYABLE_IO_KINDS.contains(&io_error.kind());
        }
        source = cause.source();
    }
    false
}

impl TransportError {
    /// Whether the retry policy may try this request again
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => is_retryable_status(*status),
            TransportError::RateLimited { .. } | TransportError::Stalled { .. } => true,
            TransportError::Http(e) => is_retryable_reqwest(e),
            TransportError::RetriesExhausted { .. }
            | TransportError::Protocol { .. }
            | TransportError::InvalidUrl { .. }
            | TransportError::InvalidRateLimit => false,
        }
    }

    /// Whether the underlying failure was transient, even if retries ran out
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::RetriesExhausted { source, .. } => source.is_transient(),
            other => other.is_retryable(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Bounded exponential-backoff retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per request, first try included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: limits::DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(limits::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(limits::RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt budget and no delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 || self.max_attempts > limits::MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                value: self.max_attempts.to_string(),
                reason: format!("Must be between 1 and {}", limits::MAX_RETRY_ATTEMPTS),
            });
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::InvalidValue {
                field: "retry.base_delay".to_string(),
                value: format!("{:?}", self.base_delay),
                reason: "Base delay cannot exceed max delay".to_string(),
            });
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `attempt` until it succeeds, fails permanently, or the budget is spent
    ///
    /// The closure receives the 1-based attempt number and must build a
    /// fresh request each time.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error unchanged, or
    /// `TransportError::RetriesExhausted` wrapping the last retryable one.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> TransportResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts_made = 0u32;

        backoff::future::retry_notify(
            self.backoff(),
            || {
                attempts_made += 1;
                let current = attempts_made;
                let request = attempt(current);
                async move {
                    match request.await {
                        Ok(value) => Ok(value),
                        Err(e) if !e.is_retryable() => Err(backoff::Error::permanent(e)),
                        Err(e) if current >= max_attempts => {
                            Err(backoff::Error::permanent(TransportError::RetriesExhausted {
                                attempts: current,
                                source: Box::new(e),
                            }))
                        }
                        Err(e) => match e.retry_after() {
                            Some(delay) => Err(backoff::Error::retry_after(e, delay)),
                            None => Err(backoff::Error::transient(e)),
                        },
                    }
                }
            },
            |error: TransportError, delay: Duration| {
                warn!("{} failed: {}. Retrying in {}ms", operation, error, delay.as_millis());
            },
        )
        .await
    }
}
