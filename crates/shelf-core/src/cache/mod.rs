//! Local mirror of remote assets.
//!
//! Each cached file lives at `<root>/<owner>/<repo>/<book_id>/<asset>`, with
//! every component percent-encoded so distinct tuples never share a path.
//! Absence is always valid (the file is re-downloaded lazily); presence
//! implies a verified download. No hash is persisted next to the file: drift
//! is recomputed against whatever the catalog currently records.

use crate::cancel::CancellationToken;
use crate::error::{Result, ShelfError};
use crate::hashing::{ensure_digest, verify_sha256};
use crate::models::Book;
use crate::remote::ByteStream;
use crate::transfer::progress::ProgressSender;
use crate::transfer::stage::{stage_stream, StagedFile};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory under the cache root used for transfers not yet bound to a book.
const STAGING_DIR_NAME: &str = ".staging";

/// Cache state of one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    NotCached,
    Cached,
    /// Cached, but the live hash differs from the catalog checksum.
    Modified,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CacheStatus::NotCached => "not cached",
            CacheStatus::Cached => "cached",
            CacheStatus::Modified => "modified",
        };
        f.write_str(label)
    }
}

/// A file found on disk by [`CacheManager::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub owner: String,
    pub repo: String,
    pub book_id: String,
    pub asset: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Deterministic on-disk cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// A cache rooted at `root`; nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directory for downloads whose final location is not yet known.
    ///
    /// Lives under the root so staged files can be renamed into place.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR_NAME)
    }

    /// Cache location for a tuple. Pure; touches no disk.
    pub fn path(&self, owner: &str, repo: &str, id: &str, asset: &str) -> PathBuf {
        self.root
            .join(encode_component(owner))
            .join(encode_component(repo))
            .join(encode_component(id))
            .join(encode_component(asset))
    }

    /// Cache location for a catalog entry, if its source is fully qualified.
    pub fn path_for(&self, book: &Book) -> Option<PathBuf> {
        let source = &book.source;
        source
            .is_complete()
            .then(|| self.path(&source.owner, &source.repo, &book.id, &source.asset))
    }

    pub fn exists(&self, owner: &str, repo: &str, id: &str, asset: &str) -> bool {
        self.path(owner, repo, id, asset).is_file()
    }

    /// Stream bytes into the cache, accepting them only if their SHA-256
    /// equals `expected_sha256`.
    ///
    /// Data is staged beside the final path and renamed into place after
    /// verification. On mismatch or cancellation the staged data is removed
    /// and nothing is left at the final path.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        owner: &str,
        repo: &str,
        id: &str,
        asset: &str,
        stream: ByteStream,
        expected_sha256: &str,
        total_bytes: Option<u64>,
        progress: Option<ProgressSender>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let target = self.path(owner, repo, id, asset);
        let dir = target
            .parent()
            .ok_or_else(|| ShelfError::Other(format!("Invalid cache path {}", target.display())))?;

        let staged = match stage_stream(stream, dir, total_bytes, progress, cancel).await {
            Ok(staged) => staged,
            Err(err) => {
                self.prune_empty_dirs(dir);
                return Err(err);
            }
        };
        self.place(staged, &target, expected_sha256)
    }

    /// Move an already-staged file into the cache after verifying it.
    pub fn adopt(
        &self,
        owner: &str,
        repo: &str,
        id: &str,
        asset: &str,
        staged: StagedFile,
        expected_sha256: &str,
    ) -> Result<PathBuf> {
        let target = self.path(owner, repo, id, asset);
        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ShelfError::io_with_path(e, dir))?;
        }
        self.place(staged, &target, expected_sha256)
    }

    fn place(&self, staged: StagedFile, target: &Path, expected_sha256: &str) -> Result<PathBuf> {
        if let Err(err) = ensure_digest(expected_sha256, &staged.sha256) {
            warn!("Rejecting download for {}: {}", target.display(), err);
            drop(staged);
            if let Some(dir) = target.parent() {
                self.prune_empty_dirs(dir);
            }
            return Err(err);
        }

        staged.persist(target)?;
        debug!("Cached {}", target.display());
        Ok(target.to_path_buf())
    }

    /// Delete a cached file. Returns whether anything was removed.
    pub fn remove(&self, owner: &str, repo: &str, id: &str, asset: &str) -> Result<bool> {
        let path = self.path(owner, repo, id, asset);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed cache entry {}", path.display());
                if let Some(dir) = path.parent() {
                    self.prune_empty_dirs(dir);
                }
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ShelfError::io_with_path(e, path)),
        }
    }

    /// Remove every cached file for one book.
    pub fn clear_book(&self, owner: &str, repo: &str, id: &str) -> Result<bool> {
        let dir = self
            .root
            .join(encode_component(owner))
            .join(encode_component(repo))
            .join(encode_component(id));
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Cleared cache for {}", id);
                if let Some(parent) = dir.parent() {
                    self.prune_empty_dirs(parent);
                }
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ShelfError::io_with_path(e, dir)),
        }
    }

    /// Whether the cached file's live hash differs from `catalog_sha256`.
    ///
    /// An absent file has not been modified.
    pub fn has_been_modified(
        &self,
        owner: &str,
        repo: &str,
        id: &str,
        asset: &str,
        catalog_sha256: &str,
    ) -> Result<bool> {
        let path = self.path(owner, repo, id, asset);
        if !path.is_file() {
            return Ok(false);
        }
        match verify_sha256(&path, catalog_sha256) {
            Ok(()) => Ok(false),
            Err(ShelfError::ChecksumMismatch { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub fn status(&self, book: &Book) -> Result<CacheStatus> {
        let source = &book.source;
        if !source.is_complete() || !self.exists(&source.owner, &source.repo, &book.id, &source.asset)
        {
            return Ok(CacheStatus::NotCached);
        }
        let modified = self.has_been_modified(
            &source.owner,
            &source.repo,
            &book.id,
            &source.asset,
            book.sha256(),
        )?;
        Ok(if modified {
            CacheStatus::Modified
        } else {
            CacheStatus::Cached
        })
    }

    /// Enumerate cached files. Staging data is skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(4)
            .max_depth(4)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let parts: Vec<String> = relative
                .components()
                .map(|c| decode_component(&c.as_os_str().to_string_lossy()))
                .collect();
            let [owner, repo, book_id, asset] = parts.as_slice() else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(CacheEntry {
                owner: owner.clone(),
                repo: repo.clone(),
                book_id: book_id.clone(),
                asset: asset.clone(),
                path: entry.path().to_path_buf(),
                size,
            });
        }

        Ok(entries)
    }

    /// Remove empty directories from `dir` up to (not including) the root.
    fn prune_empty_dirs(&self, dir: &Path) {
        let mut current = Some(dir);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Percent-encode one path component. A leading dot is escaped so no
/// component is hidden or special (`.`/`..`); an empty component becomes `%`.
fn encode_component(value: &str) -> String {
    if value.is_empty() {
        return "%".to_string();
    }
    let encoded = urlencoding::encode(value).into_owned();
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded,
    }
}

fn decode_component(value: &str) -> String {
    if value == "%" {
        return String::new();
    }
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| value.to_string())
}
