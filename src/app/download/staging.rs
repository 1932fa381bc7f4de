//! Temporary sibling files for atomic downloads
//!
//! Bytes are written to a hidden temporary file next to the destination and
//! renamed onto it only after the transfer is complete. Dropping a
//! [`StagedFile`] without persisting it deletes the temporary file, so a
//! failed download never leaves the destination behind.

use std::path::Path;

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::constants::files;
use crate::errors::{TransferError, TransferResult};

/// Temporary file being filled by a download
#[derive(Debug)]
pub struct StagedFile {
    file: File,
    path: TempPath,
}

impl StagedFile {
    /// Create a temporary file in the destination's directory
    pub async fn create(destination: &Path) -> TransferResult<Self> {
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        tokio::fs::create_dir_all(&parent).await?;

        let named = tempfile::Builder::new()
            .prefix(files::TEMP_FILE_PREFIX)
            .suffix(files::TEMP_FILE_SUFFIX)
            .tempfile_in(&parent)?;
        let (file, path) = named.into_parts();

        debug!("Staging download in {}", path.display());
        Ok(Self {
            file: File::from_std(file),
            path,
        })
    }

    /// File handle to write the download into
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Location of the temporary file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the data and atomically move it onto `destination`
    pub async fn persist(mut self, destination: &Path) -> TransferResult<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        self.path
            .persist(destination)
            .map_err(|e| TransferError::PersistFailed {
                path: destination.to_path_buf(),
                source: e.error,
            })?;
        Ok(())
    }
}
