//! Segmented parallel range download for managed blob storage
//!
//! The first ranged GET both fetches segment zero and discovers the archive
//! size from `Content-Range`. The remaining segments are requested with up to
//! `concurrency` in flight and written strictly in order by this task, which
//! is the only writer of the destination file.

use futures::{stream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::DownloadOptions;
use crate::app::chunks::ChunkRange;
use crate::app::client::http::status_error;
use crate::app::client::HttpHandler;
use crate::errors::{TransferError, TransferResult, TransportError};

/// Download `url` into `file` in ranged segments, returning the total size
pub async fn download(
    http: &HttpHandler,
    url: &Url,
    options: &DownloadOptions,
    file: &mut File,
) -> TransferResult<u64> {
    let segment_size = options.segment_size.max(1);
    let first = ChunkRange {
        start: 0,
        end: segment_size - 1,
    };

    let response = with_timeout(options, first, request_range(http, url, first)).await?;

    let total = match response.status() {
        StatusCode::PARTIAL_CONTENT => total_from_content_range(&response)?,
        StatusCode::RANGE_NOT_SATISFIABLE => {
            debug!("Archive is empty");
            return Ok(0);
        }
        // Server ignored the range and sent the whole archive
        status if status.is_success() => {
            let body = with_timeout(options, first, read_body(response)).await?;
            file.write_all(&body).await?;
            file.flush().await?;
            return Ok(body.len() as u64);
        }
        _ => return Err(status_error(response).await.into()),
    };

    let first = ChunkRange {
        start: 0,
        end: first.end.min(total.saturating_sub(1)),
    };
    let body = with_timeout(options, first, read_body(response)).await?;
    check_segment_len(first, body.len())?;
    file.write_all(&body).await?;

    let remaining: Vec<ChunkRange> = (1..)
        .map(|i: u64| i * segment_size)
        .take_while(|start| *start < total)
        .map(|start| ChunkRange {
            start,
            end: (start + segment_size).min(total) - 1,
        })
        .collect();

    debug!(
        "Downloading {} bytes in {} segments with concurrency {}",
        total,
        remaining.len() + 1,
        options.concurrency
    );

    let mut segments = stream::iter(remaining)
        .map(|range| fetch_segment(http, url, options, range))
        .buffered(options.concurrency.max(1));

    let mut written = first.byte_len();
    while let Some((range, bytes)) = segments.try_next().await? {
        file.write_all(&bytes).await?;
        written += range.byte_len();
        debug!("Wrote segment {} ({}/{} bytes)", range, written, total);
    }
    file.flush().await?;

    if written != total {
        return Err(TransferError::IncompleteTransfer {
            received: written,
            expected: total,
        });
    }
    Ok(total)
}

async fn fetch_segment(
    http: &HttpHandler,
    url: &Url,
    options: &DownloadOptions,
    range: ChunkRange,
) -> TransferResult<(ChunkRange, bytes::Bytes)> {
    let body = with_timeout(options, range, fetch_range(http, url, range)).await?;
    Ok((range, body))
}

async fn fetch_range(http: &HttpHandler, url: &Url, range: ChunkRange) -> TransferResult<bytes::Bytes> {
    let response = request_range(http, url, range).await?;
    if response.status() != StatusCode::PARTIAL_CONTENT {
        if response.status().is_success() {
            return Err(TransportError::Protocol {
                reason: format!("segment {range} returned HTTP {}", response.status()),
            }
            .into());
        }
        return Err(status_error(response).await.into());
    }
    let body = read_body(response).await?;
    check_segment_len(range, body.len())?;
    Ok(body)
}

async fn request_range(
    http: &HttpHandler,
    url: &Url,
    range: ChunkRange,
) -> TransferResult<Response> {
    let header = range.range_header();
    let response = http
        .send("segment download", |client| {
            client.get(url.clone()).header(RANGE, header.as_str())
        })
        .await?;
    Ok(response)
}

async fn read_body(response: Response) -> TransferResult<bytes::Bytes> {
    let body = response.bytes().await.map_err(TransportError::from)?;
    Ok(body)
}

async fn with_timeout<T, F>(options: &DownloadOptions, range: ChunkRange, work: F) -> TransferResult<T>
where
    F: std::future::Future<Output = TransferResult<T>>,
{
    tokio::time::timeout(options.segment_timeout, work)
        .await
        .map_err(|_| TransferError::SegmentTimeout {
            range: range.to_string(),
            seconds: options.segment_timeout.as_secs(),
        })?
}

fn check_segment_len(range: ChunkRange, received: usize) -> TransferResult<()> {
    if received as u64 != range.byte_len() {
        return Err(TransferError::IncompleteTransfer {
            received: received as u64,
            expected: range.byte_len(),
        });
    }
    Ok(())
}

/// Total size from a `Content-Range: bytes s-e/total` header
fn total_from_content_range(response: &Response) -> TransferResult<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_total)
        .ok_or_else(|| {
            TransportError::Protocol {
                reason: "ranged response without a usable Content-Range".to_string(),
            }
            .into()
        })
}

fn parse_total(content_range: &str) -> Option<u64> {
    content_range
        .trim()
        .strip_prefix("bytes ")?
        .rsplit_once('/')?
        .1
        .parse()
        .ok()
}
