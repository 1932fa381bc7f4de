//! Byte-range partitioning and the shared upload cursor
//!
//! Upload workers do not receive a fixed slice of the archive. They share a
//! [`ChunkCursor`] and repeatedly claim the next unclaimed range until the
//! cursor reaches the end of the file, so a slow chunk never leaves other
//! workers idle. The archive itself is opened once as a [`SharedArchive`]
//! and every worker reads its own range from that single descriptor.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use futures::future::join_all;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

/// Inclusive byte range within the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes in the range (never zero)
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for a `Content-Range` header on a chunk upload
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.start, self.end)
    }

    /// Value for a `Range` header on a ranged download
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Number of chunks of at most `chunk_size` bytes needed to cover `len` bytes
pub fn chunk_count(len: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// Split `len` bytes into contiguous ranges of at most `chunk_size` bytes
///
/// Only the last range may be shorter. A zero-length file yields no ranges.
pub fn partition(len: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let cursor = ChunkCursor::new(len, chunk_size);
    std::iter::from_fn(|| cursor.claim()).collect()
}

/// Shared, monotonically advancing claim cursor over the archive
#[derive(Debug)]
pub struct ChunkCursor {
    next: AtomicU64,
    len: u64,
    chunk_size: u64,
    cancelled: AtomicBool,
}

impl ChunkCursor {
    /// Create a cursor over `len` bytes handing out `chunk_size` ranges
    pub fn new(len: u64, chunk_size: u64) -> Self {
        Self {
            next: AtomicU64::new(0),
            len,
            chunk_size,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Claim the next unclaimed range
    ///
    /// Returns `None` once the whole file has been handed out or after
    /// [`cancel`](Self::cancel) has been called.
    pub fn claim(&self) -> Option<ChunkRange> {
        if self.chunk_size == 0 || self.cancelled.load(Ordering::SeqCst) {
            return None;
        }

        let start = self.next.fetch_add(self.chunk_size, Ordering::SeqCst);
        if start >= self.len {
            return None;
        }

        let end = start.saturating_add(self.chunk_size).min(self.len) - 1;
        Some(ChunkRange { start, end })
    }

    /// Stop handing out new ranges
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the cursor has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Total number of ranges this cursor covers
    pub fn chunk_count(&self) -> u64 {
        chunk_count(self.len, self.chunk_size)
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the cursor covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Drain `cursor` with `min(concurrency, chunk_count)` cooperative workers
///
/// Each worker claims ranges until the cursor is exhausted and runs `op` on
/// each. The first failure cancels the cursor so no new range starts; ranges
/// already in flight on other workers run to completion. The earliest error
/// is returned once every worker has stopped.
pub async fn run_workers<F, Fut, E>(cursor: &ChunkCursor, concurrency: usize, op: F) -> Result<(), E>
where
    F: Fn(ChunkRange) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let workers = cursor.chunk_count().min(concurrency.max(1) as u64) as usize;
    let first_error = std::sync::Mutex::new(None);
    let op = &op;
    let first_error_ref = &first_error;

    join_all((0..workers).map(|_| async move {
        while let Some(range) = cursor.claim() {
            if let Err(e) = op(range).await {
                cursor.cancel();
                if let Ok(mut slot) = first_error_ref.lock() {
                    slot.get_or_insert(e);
                }
                break;
            }
        }
    }))
    .await;

    let error = match first_error.into_inner() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Archive opened read-only once and shared by all upload workers
///
/// Each read seeks to its own range while holding the lock, so workers never
/// observe each other's file position.
#[derive(Debug)]
pub struct SharedArchive {
    file: Mutex<File>,
    len: u64,
}

impl SharedArchive {
    /// Open the archive read-only and measure it
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }

    /// Size of the archive in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the archive is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read exactly the bytes of `range`
    pub async fn read_range(&self, range: ChunkRange) -> std::io::Result<Bytes> {
        let mut buffer = vec![0u8; range.byte_len() as usize];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    const MIB: u64 = 1024 * 1024;

    fn assert_exact_cover(ranges: &[ChunkRange], len: u64, chunk_size: u64) {
        assert_eq!(ranges.len() as u64, chunk_count(len, chunk_size));
        let mut expected_start = 0;
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.start, expected_start, "gap or overlap at chunk {i}");
            assert!(range.byte_len() <= chunk_size);
            if i + 1 < ranges.len() {
                assert_eq!(range.byte_len(), chunk_size, "only the tail may be short");
            }
            expected_start = range.end + 1;
        }
        assert_eq!(expected_start, len);
    }

    #[test]
    fn test_partition_ten_mib_in_four_mib_chunks() {
        let ranges = partition(10 * MIB, 4 * MIB);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], ChunkRange { start: 0, end: 4 * MIB - 1 });
        assert_eq!(ranges[1], ChunkRange { start: 4 * MIB, end: 8 * MIB - 1 });
        assert_eq!(ranges[2], ChunkRange { start: 8 * MIB, end: 10 * MIB - 1 });
        assert_eq!(ranges[2].byte_len(), 2 * MIB);
    }

    #[test]
    fn test_partition_covers_file_exactly() {
        for (len, chunk_size) in [(1, 1), (1, 7), (7, 7), (8, 7), (100, 9), (4096, 1024), (5, 64)] {
            assert_exact_cover(&partition(len, chunk_size), len, chunk_size);
        }
    }

    #[test]
    fn test_partition_empty_file() {
        assert!(partition(0, 4 * MIB).is_empty());
        assert_eq!(chunk_count(0, 4 * MIB), 0);
    }

    #[test]
    fn test_content_range_header() {
        let range = ChunkRange { start: 0, end: 1023 };
        assert_eq!(range.content_range(), "bytes 0-1023/*");
        assert_eq!(range.range_header(), "bytes=0-1023");
        assert_eq!(range.byte_len(), 1024);
    }

    #[test]
    fn test_cancelled_cursor_hands_out_nothing() {
        let cursor = ChunkCursor::new(100, 10);
        assert!(cursor.claim().is_some());
        cursor.cancel();
        assert!(cursor.claim().is_none());
        assert!(cursor.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_overlap() {
        let cursor = Arc::new(ChunkCursor::new(10_000, 7));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cursor = Arc::clone(&cursor);
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(range) = cursor.claim() {
                    claimed.push(range);
                    tokio::task::yield_now().await;
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        all.sort_by_key(|r| r.start);
        assert_exact_cover(&all, 10_000, 7);
    }

    #[tokio::test]
    async fn test_run_workers_visits_every_range_once() {
        let cursor = ChunkCursor::new(100, 10);
        let seen = std::sync::Mutex::new(Vec::new());

        let result: Result<(), String> = run_workers(&cursor, 3, |range| {
            seen.lock().unwrap().push(range);
            async { Ok(()) }
        })
        .await;

        assert!(result.is_ok());
        let mut seen = seen.into_inner().unwrap();
        seen.sort_by_key(|r| r.start);
        assert_eq!(seen, partition(100, 10));
    }

    #[tokio::test]
    async fn test_run_workers_stops_after_first_error() {
        let cursor = ChunkCursor::new(100, 10);
        let calls = AtomicU64::new(0);

        let result: Result<(), String> = run_workers(&cursor, 1, |range| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if range.start == 20 {
                    Err(format!("chunk {range} failed"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "chunk 20-29 failed");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cursor.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_workers_empty_cursor() {
        let cursor = ChunkCursor::new(0, 10);
        let result: Result<(), String> =
            run_workers(&cursor, 4, |_| async { Err("never called".to_string()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shared_archive_reads_ranges() {
        let temp = NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(temp.path(), &content).unwrap();

        let archive = SharedArchive::open(temp.path()).await.unwrap();
        assert_eq!(archive.len(), 1000);

        let tail = archive
            .read_range(ChunkRange { start: 900, end: 999 })
            .await
            .unwrap();
        let head = archive
            .read_range(ChunkRange { start: 0, end: 99 })
            .await
            .unwrap();

        assert_eq!(&tail[..], &content[900..]);
        assert_eq!(&head[..], &content[..100]);
    }
}
