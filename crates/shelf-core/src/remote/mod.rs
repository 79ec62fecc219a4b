//! Remote store collaborator.
//!
//! The engine talks to the metadata catalog and the binary asset store
//! through [`RemoteStore`]. Every orchestrator is constructed with an
//! explicit `Arc<dyn RemoteStore>`, so the sagas run unchanged against
//! [`GitHubStore`] or the in-memory [`MemoryStore`].

mod github;
pub mod memory;
mod retry;

pub use github::GitHubStore;
pub use memory::{MemoryStore, RemoteOp};
pub use retry::{retry_async, RetryConfig, RetryStats};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::path::Path;

/// A stream of downloaded chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Raw catalog bytes plus the store's revision identifier for them.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub bytes: Bytes,
    pub revision: String,
}

/// A release (the asset store's grouping unit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseHandle {
    pub id: u64,
    pub tag: String,
}

/// One binary asset inside a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub id: u64,
    pub name: String,
    pub size: u64,
}

/// Contract for the remote metadata and asset stores.
///
/// "Not found" is always reported as [`crate::ShelfError::NotFound`] so
/// callers can treat absence as a legitimate state.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch a file from the metadata repository at `git_ref` (default branch if `None`).
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<FileContent>;

    /// Replace a file in one atomic commit, creating it if absent.
    async fn commit_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        bytes: Bytes,
        message: &str,
    ) -> Result<()>;

    /// Get-or-create a release by tag. Idempotent.
    async fn ensure_release(&self, owner: &str, repo: &str, tag: &str) -> Result<ReleaseHandle>;

    async fn get_release_by_tag(&self, owner: &str, repo: &str, tag: &str)
        -> Result<ReleaseHandle>;

    /// Every release of the repository, in no particular order.
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseHandle>>;

    async fn list_release_assets(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
    ) -> Result<Vec<AssetHandle>>;

    async fn find_asset(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
        name: &str,
    ) -> Result<Option<AssetHandle>> {
        let assets = self.list_release_assets(owner, repo, release_id).await?;
        Ok(assets.into_iter().find(|a| a.name == name))
    }

    /// Upload `size` bytes read from `source` as a new asset.
    #[allow(clippy::too_many_arguments)]
    async fn upload_asset(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
        name: &str,
        source: &Path,
        size: u64,
        content_type: &str,
    ) -> Result<AssetHandle>;

    async fn download_asset(&self, owner: &str, repo: &str, asset_id: u64) -> Result<ByteStream>;

    async fn delete_asset(&self, owner: &str, repo: &str, asset_id: u64) -> Result<()>;
}

/// Content type for an asset, from its file extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("epub") => "application/epub+zip",
        Some("djvu") => "image/vnd.djvu",
        Some("mobi") => "application/x-mobipocket-ebook",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("zip") => "application/zip",
        _ => crate::config::TransferConfig::DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("sicp.PDF"), "application/pdf");
        assert_eq!(content_type_for("book.epub"), "application/epub+zip");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
