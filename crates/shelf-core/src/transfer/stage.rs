//! Local staging of byte streams.
//!
//! The asset store needs a size before an upload starts and the cache must
//! never accept unverified bytes, so every transfer first lands in a staging
//! file while its SHA-256 is computed. A staged file is deleted when dropped
//! unless it is persisted to a final path.

use super::progress::{ProgressSender, TransferProgress};
use crate::cancel::CancellationToken;
use crate::config::TransferConfig;
use crate::error::{Result, ShelfError};
use crate::remote::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// A fully written, hashed staging file.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    pub sha256: String,
    pub size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically rename the staged file to `target`.
    ///
    /// `target` must be on the same filesystem as the staging directory.
    pub fn persist(self, target: &Path) -> Result<()> {
        self.path
            .persist(target)
            .map_err(|e| ShelfError::io_with_path(e.error, target))
    }
}

/// Drain `stream` into a new staging file in `dir`, hashing as it goes.
///
/// Cancellation is checked between chunks; a cancelled or failed stream
/// leaves nothing behind in `dir`.
pub async fn stage_stream(
    mut stream: ByteStream,
    dir: &Path,
    total_bytes: Option<u64>,
    progress: Option<ProgressSender>,
    cancel: &CancellationToken,
) -> Result<StagedFile> {
    std::fs::create_dir_all(dir).map_err(|e| ShelfError::io_with_path(e, dir))?;
    let (mut file, path) = tempfile::Builder::new()
        .prefix(TransferConfig::STAGING_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| ShelfError::io_with_path(e, dir))?
        .into_parts();

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;

    if let Some(tx) = &progress {
        let _ = tx
            .send(TransferProgress {
                bytes_transferred: 0,
                total_bytes,
            })
            .await;
    }

    while let Some(chunk) = stream.next().await {
        cancel.check()?;
        let chunk = chunk?;

        hasher.update(&chunk);
        file.write_all(&chunk)
            .map_err(|e| ShelfError::io_with_path(e, path.to_path_buf()))?;
        size += chunk.len() as u64;

        if let Some(tx) = &progress {
            let _ = tx
                .send(TransferProgress {
                    bytes_transferred: size,
                    total_bytes,
                })
                .await;
        }
    }
    cancel.check()?;

    file.sync_all()
        .map_err(|e| ShelfError::io_with_path(e, path.to_path_buf()))?;

    let sha256 = hex::encode(hasher.finalize());
    debug!("Staged {} bytes (sha256 {}) at {}", size, sha256, path.display());
    Ok(StagedFile { path, sha256, size })
}

/// Stream a local file in chunks. Returns the stream and the file size.
pub async fn file_stream(path: &Path) -> Result<(ByteStream, u64)> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ShelfError::io_with_path(e, path))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| ShelfError::io_with_path(e, path))?
        .len();

    let stream = futures::stream::try_unfold(
        (file, path.to_path_buf()),
        |(mut file, path): (tokio::fs::File, PathBuf)| async move {
            let mut buffer = vec![0u8; TransferConfig::CHUNK_SIZE];
            let bytes_read = file
                .read(&mut buffer)
                .await
                .map_err(|e| ShelfError::io_with_path(e, &path))?;
            if bytes_read == 0 {
                return Ok(None);
            }
            buffer.truncate(bytes_read);
            Ok(Some((Bytes::from(buffer), (file, path))))
        },
    );

    Ok((stream.boxed(), size))
}

/// Stage a copy of a local file.
pub async fn stage_file(
    source: &Path,
    dir: &Path,
    progress: Option<ProgressSender>,
    cancel: &CancellationToken,
) -> Result<StagedFile> {
    let (stream, size) = file_stream(source).await?;
    stage_stream(stream, dir, Some(size), progress, cancel).await
}
