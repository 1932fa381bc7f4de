//! Core HTTP operations with rate limiting and retry logic
//!
//! This module provides the fundamental request operation shared by every
//! cache service and storage call: a rate-limited send wrapped in the
//! [`RetryPolicy`]. Retryable statuses are turned into errors so the policy
//! can retry them; all other responses are handed back for the caller to
//! interpret.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::retry::{is_retryable_status, RetryPolicy};
use crate::errors::{TransportError, TransportResult};

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// HTTP operations handler with resilience patterns
#[derive(Debug)]
pub struct HttpHandler {
    client: Client,
    rate_limiter: DirectRateLimiter,
    retry: RetryPolicy,
}

impl HttpHandler {
    /// Creates a new HttpHandler with the given client, rate limit and retry policy
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidRateLimit` if `rate_limit_rps` is zero
    pub fn new(client: Client, rate_limit_rps: u32, retry: RetryPolicy) -> TransportResult<Self> {
        let rate_limiter = Self::build_rate_limiter(rate_limit_rps)?;
        Ok(Self {
            client,
            rate_limiter,
            retry,
        })
    }

    fn build_rate_limiter(rate_limit_rps: u32) -> TransportResult<DirectRateLimiter> {
        let rps = NonZeroU32::new(rate_limit_rps).ok_or(TransportError::InvalidRateLimit)?;
        Ok(RateLimiter::direct(Quota::per_second(rps)))
    }

    /// Sends a request built by `build`, retrying per the handler's policy
    ///
    /// `build` is called once per attempt so bodies and headers are fresh.
    /// Non-retryable responses (2xx, 3xx, most 4xx) are returned as `Ok`;
    /// callers must check the status.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when the request cannot be sent, fails with a
    /// non-retryable transport error, or exhausts its retry budget.
    pub async fn send<F>(&self, operation: &str, build: F) -> TransportResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry
            .run(operation, |attempt| {
                let request = build(&self.client);
                async move {
                    // Apply rate limiting with jitter to avoid thundering herd
                    self.rate_limiter
                        .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
                        .await;

                    let response = request.send().await?;
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(TransportError::RateLimited {
                            retry_after: parse_retry_after(response.headers()),
                        });
                    }

                    if is_retryable_status(status.as_u16()) {
                        return Err(status_error(response).await);
                    }

                    debug!("{} attempt {} returned HTTP {}", operation, attempt, status);
                    Ok(response)
                }
            })
            .await
    }

    /// Get a reference to the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get the retry policy applied by this handler
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Convert an unexpected response into a `TransportError::Status`
///
/// The response body, if readable, becomes the error message.
pub async fn status_error(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| e.to_string());
    TransportError::Status { status, message }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
