//! Saga-style operations across the catalog, the asset store and the cache.
//!
//! There is no transaction spanning the stores, so each operation orders its
//! steps so that an interruption leaves recoverable excess state (an orphaned
//! asset, a harmless duplicate record) rather than a catalog entry pointing at
//! nothing. [`Orchestrator::verify`] is the compensating repair.
//!
//! Batch operations run strictly sequentially and are best-effort: per-item
//! failures are recorded in a [`BatchReport`] and the run continues.

mod delete;
mod edit;
mod import;
mod ingest;
mod migrate;
pub mod progress;
mod relocate;
mod retrieve;
pub mod stage;
mod sync;
mod verify;

pub use delete::{DeleteReport, StepOutcome};
pub use import::ImportOptions;
pub use ingest::{IngestRequest, IngestSource};
pub use progress::{ProgressCallback, TransferProgress};
pub use retrieve::BookStatus;
pub use verify::{OrphanedAsset, OrphanedEntry, VerifyReport};

use crate::cache::CacheManager;
use crate::cancel::CancellationToken;
use crate::catalog::CatalogManager;
use crate::error::{Result, ShelfError};
use crate::hashing::ensure_digest;
use crate::models::{Book, Source};
use crate::remote::{content_type_for, AssetHandle, ReleaseHandle, RemoteStore};
use serde::Serialize;
use stage::{stage_file, stage_stream, StagedFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One failed item of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub error: String,
}

/// Outcome of a best-effort batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn record_success(&mut self, item: impl Into<String>) {
        self.succeeded.push(item.into());
    }

    pub fn record_skip(&mut self, item: impl Into<String>) {
        self.skipped.push(item.into());
    }

    pub fn record_failure(&mut self, item: impl Into<String>, error: &ShelfError) {
        let item = item.into();
        warn!("{}: {}", item, error);
        self.failed.push(ItemFailure {
            item,
            error: error.to_string(),
        });
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded.extend(other.succeeded);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    /// One-line summary, e.g. `3 succeeded, 1 skipped, 0 failed`.
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} skipped, {} failed",
            self.succeeded.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }
}

/// Explicit context for every saga: the remote store, the catalogs it holds,
/// the local cache, plus cancellation and progress hooks.
#[derive(Clone)]
pub struct Orchestrator {
    remote: Arc<dyn RemoteStore>,
    catalogs: CatalogManager,
    cache: CacheManager,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl Orchestrator {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: CacheManager) -> Self {
        Self {
            catalogs: CatalogManager::new(remote.clone()),
            remote,
            cache,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Report byte-count progress of large transfers to `callback`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Share `token` with the host; sagas stop at their next step boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Catalog access through the same remote store.
    pub fn catalogs(&self) -> &CatalogManager {
        &self.catalogs
    }

    /// The local cache.
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// The remote store every saga talks to.
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// The token sagas poll; cancel it to stop the current run.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolve the release and asset a book's source names.
    async fn locate_asset(&self, source: &Source) -> Result<(ReleaseHandle, AssetHandle)> {
        if !source.is_complete() {
            return Err(ShelfError::validation(
                "source",
                "record does not name an owner, repo, release and asset",
            ));
        }
        let release = self
            .remote
            .get_release_by_tag(&source.owner, &source.repo, &source.release)
            .await?;
        let asset = self
            .remote
            .find_asset(&source.owner, &source.repo, release.id, &source.asset)
            .await?
            .ok_or_else(|| {
                ShelfError::not_found(format!(
                    "asset '{}' in release '{}' of {}/{}",
                    source.asset, source.release, source.owner, source.repo
                ))
            })?;
        Ok((release, asset))
    }

    /// Download an asset into the staging area, with progress and cancellation.
    async fn download_to_staging(
        &self,
        owner: &str,
        repo: &str,
        asset: &AssetHandle,
    ) -> Result<StagedFile> {
        let remote = self.remote.clone();
        let cancel = self.cancel.clone();
        let staging = self.cache.staging_dir();
        let owner = owner.to_string();
        let repo = repo.to_string();
        let asset_id = asset.id;
        let size = asset.size;

        progress::run_tracked(&asset.name, self.progress.as_ref(), move |tx| async move {
            let stream = remote.download_asset(&owner, &repo, asset_id).await?;
            stage_stream(stream, &staging, Some(size), Some(tx), &cancel).await
        })
        .await
    }

    /// Download an asset and fail unless it matches the recorded checksum.
    async fn download_verified(&self, book: &Book, asset: &AssetHandle) -> Result<StagedFile> {
        let staged = self
            .download_to_staging(&book.source.owner, &book.source.repo, asset)
            .await?;
        if !book.sha256().is_empty() {
            ensure_digest(book.sha256(), &staged.sha256)?;
        }
        Ok(staged)
    }

    /// Copy a local file into the staging area.
    async fn stage_local(&self, path: &Path) -> Result<StagedFile> {
        let cancel = self.cancel.clone();
        let staging = self.cache.staging_dir();
        let source = path.to_path_buf();
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        progress::run_tracked(&label, self.progress.as_ref(), move |tx| async move {
            stage_file(&source, &staging, Some(tx), &cancel).await
        })
        .await
    }

    /// Upload staged bytes. Refuses to start once cancelled.
    async fn upload_staged(
        &self,
        owner: &str,
        repo: &str,
        release: &ReleaseHandle,
        name: &str,
        staged: &StagedFile,
    ) -> Result<AssetHandle> {
        self.cancel.check()?;
        let asset = self
            .remote
            .upload_asset(
                owner,
                repo,
                release.id,
                name,
                staged.path(),
                staged.size,
                content_type_for(name),
            )
            .await?;
        info!(
            "Uploaded {} ({} bytes) to {}/{}@{}",
            name, staged.size, owner, repo, release.tag
        );
        Ok(asset)
    }

    /// Fail with `NameCollision` if `name` is taken in `release`, unless
    /// `replace` is set, in which case the existing asset is deleted.
    async fn claim_asset_name(
        &self,
        owner: &str,
        repo: &str,
        release: &ReleaseHandle,
        name: &str,
        replace: bool,
    ) -> Result<()> {
        let Some(existing) = self.remote.find_asset(owner, repo, release.id, name).await? else {
            return Ok(());
        };
        if !replace {
            return Err(ShelfError::NameCollision {
                release: release.tag.clone(),
                asset: name.to_string(),
            });
        }
        debug!("Replacing existing asset {} in {}", name, release.tag);
        self.remote.delete_asset(owner, repo, existing.id).await
    }

    /// Move verified staged bytes into the cache. Failures are logged only.
    fn cache_staged(&self, book: &Book, staged: StagedFile) -> Option<PathBuf> {
        let source = &book.source;
        match self.cache.adopt(
            &source.owner,
            &source.repo,
            &book.id,
            &source.asset,
            staged,
            book.sha256(),
        ) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Could not cache {}: {}", book.id, e);
                None
            }
        }
    }

    /// Drop the cache entry for a book's current source. Failures are logged only.
    fn invalidate_cache(&self, book: &Book) {
        let source = &book.source;
        if !source.is_complete() {
            return;
        }
        if let Err(e) = self
            .cache
            .remove(&source.owner, &source.repo, &book.id, &source.asset)
        {
            warn!("Could not invalidate cache for {}: {}", book.id, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::hashing::sha256_bytes;
    use crate::models::{Checksum, Shelf};
    use crate::remote::MemoryStore;
    use tempfile::TempDir;

    pub struct Harness {
        pub temp: TempDir,
        pub store: Arc<MemoryStore>,
        pub orchestrator: Orchestrator,
        pub shelf: Shelf,
    }

    pub fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::new(temp.path().join("cache"));
        let orchestrator = Orchestrator::new(store.clone(), cache);
        Harness {
            temp,
            store,
            orchestrator,
            shelf: Shelf::new("main", "alice", "books"),
        }
    }

    impl Harness {
        /// Seed an asset plus its catalog record (no commit recorded).
        pub async fn seed(&self, id: &str, asset: &str, data: &'static [u8]) -> Book {
            let handle = self.store.put_asset(
                &self.shelf.owner,
                &self.shelf.repo,
                &self.shelf.default_release,
                asset,
                data,
            );
            let mut book = Book::new(id).unwrap();
            book.title = id.to_uppercase();
            book.checksum = Checksum::sha256(sha256_bytes(data));
            book.size_bytes = handle.size;
            book.source = Source::release_asset(
                &self.shelf.owner,
                &self.shelf.repo,
                &self.shelf.default_release,
                asset,
            );

            let mut books = self.orchestrator.catalogs.load_shelf(&self.shelf).await.unwrap();
            crate::catalog::upsert_in_place(&mut books, book.clone());
            let bytes = crate::catalog::codec::marshal(&books).unwrap();
            self.store
                .put_file(&self.shelf.owner, &self.shelf.repo, &self.shelf.catalog_path, bytes);
            book
        }

        pub async fn books(&self) -> Vec<Book> {
            self.orchestrator.catalogs.load_shelf(&self.shelf).await.unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_report() {
        let mut report = BatchReport::default();
        report.record_success("a");
        report.record_skip("b");
        assert!(!report.has_failures());

        let mut other = BatchReport::default();
        other.record_failure("c", &ShelfError::not_found("c"));
        report.merge(other);

        assert!(report.has_failures());
        assert_eq!(report.summary(), "1 succeeded, 1 skipped, 1 failed");
        assert_eq!(report.failed[0].error, "Not found: c");
    }

    #[tokio::test]
    async fn test_locate_missing_asset_is_not_found() {
        let h = testing::harness();
        let book = h.seed("sicp", "sicp.pdf", b"content").await;

        let mut missing = book.source.clone();
        missing.asset = "other.pdf".into();
        let err = h.orchestrator.locate_asset(&missing).await.unwrap_err();
        assert!(err.is_not_found());

        let (release, asset) = h.orchestrator.locate_asset(&book.source).await.unwrap();
        assert_eq!(release.tag, "library");
        assert_eq!(asset.name, "sicp.pdf");
    }

    #[tokio::test]
    async fn test_download_verified_rejects_wrong_bytes() {
        let h = testing::harness();
        let mut book = h.seed("sicp", "sicp.pdf", b"content").await;
        book.checksum = crate::models::Checksum::sha256(crate::hashing::sha256_bytes(b"other"));

        let (_, asset) = h.orchestrator.locate_asset(&book.source).await.unwrap();
        let err = h
            .orchestrator
            .download_verified(&book, &asset)
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::ChecksumMismatch { .. }));
    }
}
