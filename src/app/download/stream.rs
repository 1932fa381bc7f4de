//! Plain HTTP streaming download
//!
//! One GET, written chunk by chunk. Every read is bounded by the stall
//! timeout, the byte count is checked against `Content-Length`, and when the
//! server sends `Content-MD5` the digest of the streamed bytes must match.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::app::client::http::status_error;
use crate::app::client::HttpHandler;
use crate::errors::{TransferError, TransferResult, TransportError};

const CONTENT_MD5: &str = "content-md5";

/// Stream `url` into `file`, returning the number of bytes written
pub async fn download(
    http: &HttpHandler,
    url: &Url,
    stall_timeout: Duration,
    file: &mut File,
) -> TransferResult<u64> {
    let response = http
        .send("archive download", |client| client.get(url.clone()))
        .await?;

    if !response.status().is_success() {
        return Err(status_error(response).await.into());
    }

    let expected_len = response.content_length();
    let expected_md5 = content_md5(response.headers());
    let mut digest = expected_md5.as_ref().map(|_| md5::Context::new());

    let mut stream = response.bytes_stream();
    let mut received = 0u64;
    loop {
        let chunk = match tokio::time::timeout(stall_timeout, stream.next()).await {
            Ok(Some(chunk)) => chunk.map_err(TransportError::from)?,
            Ok(None) => break,
            Err(_) => {
                return Err(TransportError::Stalled {
                    seconds: stall_timeout.as_secs(),
                }
                .into())
            }
        };

        file.write_all(&chunk).await?;
        if let Some(context) = digest.as_mut() {
            context.consume(&chunk);
        }
        received += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = expected_len {
        if received != expected {
            return Err(TransferError::IncompleteTransfer { received, expected });
        }
    }

    if let (Some(expected), Some(context)) = (expected_md5, digest) {
        let actual = format!("{:x}", context.compute());
        if actual != expected {
            return Err(TransferError::ChecksumMismatch { expected, actual });
        }
        debug!("Verified MD5 of {} bytes", received);
    }

    Ok(received)
}

/// Hex form of a base64 `Content-MD5` header, if present and well formed
fn content_md5(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_MD5)?.to_str().ok()?;
    let raw = BASE64.decode(value.trim()).ok()?;
    (raw.len() == 16).then(|| hex::encode(raw))
}
