//! In-memory remote store.
//!
//! Behaves like the GitHub-backed store (404s become `NotFound`, duplicate
//! asset names are rejected with 422) and records every commit so tests can
//! assert on commit batching. One-shot failures can be injected per
//! operation to exercise saga partial-failure windows.

use super::{AssetHandle, ByteStream, FileContent, ReleaseHandle, RemoteStore};
use crate::error::{Result, ShelfError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Chunk size of download streams; small so progress events are observable.
const DOWNLOAD_CHUNK: usize = 16 * 1024;

/// Remote operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    GetFile,
    Commit,
    EnsureRelease,
    GetRelease,
    ListReleases,
    ListAssets,
    Upload,
    Download,
    Delete,
}

/// A commit recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct RepoState {
    files: HashMap<String, (Bytes, u64)>,
    releases: Vec<MemRelease>,
    commits: Vec<CommitRecord>,
}

#[derive(Debug)]
struct MemRelease {
    id: u64,
    tag: String,
    assets: Vec<MemAsset>,
}

#[derive(Debug)]
struct MemAsset {
    id: u64,
    name: String,
    data: Bytes,
}

impl MemAsset {
    fn handle(&self) -> AssetHandle {
        AssetHandle {
            id: self.id,
            name: self.name.clone(),
            size: self.data.len() as u64,
        }
    }
}

/// In-memory [`RemoteStore`].
#[derive(Debug)]
pub struct MemoryStore {
    repos: Mutex<HashMap<(String, String), RepoState>>,
    failures: Mutex<HashMap<RemoteOp, u32>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store: no repositories, files or releases.
    pub fn new() -> Self {
        Self {
            repos: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make the next call of `op` fail with a remote error.
    pub fn fail_next(&self, op: RemoteOp) {
        self.fail_times(op, 1);
    }

    /// Make the next `times` calls of `op` fail with a remote error.
    pub fn fail_times(&self, op: RemoteOp, times: u32) {
        *lock(&self.failures).entry(op).or_insert(0) += times;
    }

    /// Current content of a metadata file.
    pub fn file(&self, owner: &str, repo: &str, path: &str) -> Option<Bytes> {
        lock(&self.repos)
            .get(&key(owner, repo))
            .and_then(|r| r.files.get(path))
            .map(|(bytes, _)| bytes.clone())
    }

    /// Commits made to a repository, oldest first.
    pub fn commits(&self, owner: &str, repo: &str) -> Vec<CommitRecord> {
        lock(&self.repos)
            .get(&key(owner, repo))
            .map(|r| r.commits.clone())
            .unwrap_or_default()
    }

    /// Sorted asset names of a release; empty if the release doesn't exist.
    pub fn asset_names(&self, owner: &str, repo: &str, tag: &str) -> Vec<String> {
        let repos = lock(&self.repos);
        let mut names: Vec<String> = repos
            .get(&key(owner, repo))
            .and_then(|r| r.releases.iter().find(|rel| rel.tag == tag))
            .map(|rel| rel.assets.iter().map(|a| a.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Bytes of an asset, looked up by release tag and name.
    pub fn asset_data(&self, owner: &str, repo: &str, tag: &str, name: &str) -> Option<Bytes> {
        lock(&self.repos)
            .get(&key(owner, repo))
            .and_then(|r| r.releases.iter().find(|rel| rel.tag == tag))
            .and_then(|rel| rel.assets.iter().find(|a| a.name == name))
            .map(|a| a.data.clone())
    }

    /// Seed an asset directly, creating the release if needed.
    pub fn put_asset(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
        name: &str,
        data: impl Into<Bytes>,
    ) -> AssetHandle {
        let mut repos = lock(&self.repos);
        let state = repos.entry(key(owner, repo)).or_default();
        let release_id = self.release_in(state, tag);
        let asset = MemAsset {
            id: self.next_id(),
            name: name.to_string(),
            data: data.into(),
        };
        let handle = asset.handle();
        if let Some(release) = state.releases.iter_mut().find(|r| r.id == release_id) {
            release.assets.retain(|a| a.name != name);
            release.assets.push(asset);
        }
        handle
    }

    /// Seed a metadata file without recording a commit.
    pub fn put_file(&self, owner: &str, repo: &str, path: &str, bytes: impl Into<Bytes>) {
        let mut repos = lock(&self.repos);
        let state = repos.entry(key(owner, repo)).or_default();
        state.files.insert(path.to_string(), (bytes.into(), 1));
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn release_in(&self, state: &mut RepoState, tag: &str) -> u64 {
        if let Some(release) = state.releases.iter().find(|r| r.tag == tag) {
            return release.id;
        }
        let id = self.next_id();
        state.releases.push(MemRelease {
            id,
            tag: tag.to_string(),
            assets: Vec::new(),
        });
        id
    }

    fn take_failure(&self, op: RemoteOp) -> Result<()> {
        let mut failures = lock(&self.failures);
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ShelfError::Remote {
                    message: format!("injected failure for {:?}", op),
                    status_code: Some(500),
                })
            }
            _ => Ok(()),
        }
    }

    fn with_release<T>(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
        f: impl FnOnce(&mut MemRelease) -> Result<T>,
    ) -> Result<T> {
        let mut repos = lock(&self.repos);
        let release = repos
            .get_mut(&key(owner, repo))
            .and_then(|r| r.releases.iter_mut().find(|rel| rel.id == release_id))
            .ok_or_else(|| {
                ShelfError::not_found(format!("release {} in {}/{}", release_id, owner, repo))
            })?;
        f(release)
    }
}

fn key(owner: &str, repo: &str) -> (String, String) {
    (owner.to_string(), repo.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        _git_ref: Option<&str>,
    ) -> Result<FileContent> {
        self.take_failure(RemoteOp::GetFile)?;
        lock(&self.repos)
            .get(&key(owner, repo))
            .and_then(|r| r.files.get(path))
            .map(|(bytes, revision)| FileContent {
                bytes: bytes.clone(),
                revision: revision.to_string(),
            })
            .ok_or_else(|| ShelfError::not_found(format!("{}/{}:{}", owner, repo, path)))
    }

    async fn commit_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        bytes: Bytes,
        message: &str,
    ) -> Result<()> {
        self.take_failure(RemoteOp::Commit)?;
        let mut repos = lock(&self.repos);
        let state = repos.entry(key(owner, repo)).or_default();
        let revision = state.files.get(path).map(|(_, rev)| rev + 1).unwrap_or(1);
        state.files.insert(path.to_string(), (bytes, revision));
        state.commits.push(CommitRecord {
            path: path.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn ensure_release(&self, owner: &str, repo: &str, tag: &str) -> Result<ReleaseHandle> {
        self.take_failure(RemoteOp::EnsureRelease)?;
        let mut repos = lock(&self.repos);
        let state = repos.entry(key(owner, repo)).or_default();
        let id = self.release_in(state, tag);
        Ok(ReleaseHandle {
            id,
            tag: tag.to_string(),
        })
    }

    async fn get_release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<ReleaseHandle> {
        self.take_failure(RemoteOp::GetRelease)?;
        lock(&self.repos)
            .get(&key(owner, repo))
            .and_then(|r| r.releases.iter().find(|rel| rel.tag == tag))
            .map(|rel| ReleaseHandle {
                id: rel.id,
                tag: rel.tag.clone(),
            })
            .ok_or_else(|| ShelfError::not_found(format!("release '{}' in {}/{}", tag, owner, repo)))
    }

    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseHandle>> {
        self.take_failure(RemoteOp::ListReleases)?;
        Ok(lock(&self.repos)
            .get(&key(owner, repo))
            .map(|r| {
                r.releases
                    .iter()
                    .map(|rel| ReleaseHandle {
                        id: rel.id,
                        tag: rel.tag.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_release_assets(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
    ) -> Result<Vec<AssetHandle>> {
        self.take_failure(RemoteOp::ListAssets)?;
        self.with_release(owner, repo, release_id, |release| {
            Ok(release.assets.iter().map(MemAsset::handle).collect())
        })
    }

    async fn upload_asset(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
        name: &str,
        source: &Path,
        size: u64,
        _content_type: &str,
    ) -> Result<AssetHandle> {
        self.take_failure(RemoteOp::Upload)?;
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| ShelfError::io_with_path(e, source))?;
        if data.len() as u64 != size {
            return Err(ShelfError::Remote {
                message: format!("declared size {} but body has {} bytes", size, data.len()),
                status_code: Some(400),
            });
        }

        let id = self.next_id();
        self.with_release(owner, repo, release_id, |release| {
            if release.assets.iter().any(|a| a.name == name) {
                return Err(ShelfError::Remote {
                    message: format!("asset '{}' already_exists", name),
                    status_code: Some(422),
                });
            }
            let asset = MemAsset {
                id,
                name: name.to_string(),
                data: Bytes::from(data),
            };
            let handle = asset.handle();
            release.assets.push(asset);
            Ok(handle)
        })
    }

    async fn download_asset(&self, owner: &str, repo: &str, asset_id: u64) -> Result<ByteStream> {
        self.take_failure(RemoteOp::Download)?;
        let data = lock(&self.repos)
            .get(&key(owner, repo))
            .and_then(|r| {
                r.releases
                    .iter()
                    .flat_map(|rel| rel.assets.iter())
                    .find(|a| a.id == asset_id)
            })
            .map(|a| a.data.clone())
            .ok_or_else(|| ShelfError::not_found(format!("asset {} in {}/{}", asset_id, owner, repo)))?;

        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(DOWNLOAD_CHUNK)
            .map(|start| Ok(data.slice(start..(start + DOWNLOAD_CHUNK).min(data.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn delete_asset(&self, owner: &str, repo: &str, asset_id: u64) -> Result<()> {
        self.take_failure(RemoteOp::Delete)?;
        let mut repos = lock(&self.repos);
        let state = repos
            .get_mut(&key(owner, repo))
            .ok_or_else(|| ShelfError::not_found(format!("{}/{}", owner, repo)))?;
        for release in &mut state.releases {
            let before = release.assets.len();
            release.assets.retain(|a| a.id != asset_id);
            if release.assets.len() != before {
                return Ok(());
            }
        }
        Err(ShelfError::not_found(format!(
            "asset {} in {}/{}",
            asset_id, owner, repo
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .get_file_content("alice", "books", "catalog.json", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_commit_records_history() {
        let store = MemoryStore::new();
        store
            .commit_file("alice", "books", "catalog.json", Bytes::from("[]"), "init")
            .await
            .unwrap();

        let content = store
            .get_file_content("alice", "books", "catalog.json", None)
            .await
            .unwrap();
        assert_eq!(content.bytes, Bytes::from("[]"));
        assert_eq!(store.commits("alice", "books").len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_release_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.ensure_release("alice", "books", "library").await.unwrap();
        let second = store.ensure_release("alice", "books", "library").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_upload_download_and_collision() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sicp.pdf");
        let body = vec![7u8; DOWNLOAD_CHUNK * 2 + 10];
        std::fs::write(&path, &body).unwrap();

        let store = MemoryStore::new();
        let release = store.ensure_release("alice", "books", "library").await.unwrap();
        let asset = store
            .upload_asset("alice", "books", release.id, "sicp.pdf", &path, body.len() as u64, "application/pdf")
            .await
            .unwrap();
        assert_eq!(asset.size, body.len() as u64);

        let chunks: Vec<Bytes> = store
            .download_asset("alice", "books", asset.id)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), body);

        let err = store
            .upload_asset("alice", "books", release.id, "sicp.pdf", &path, body.len() as u64, "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::Remote { status_code: Some(422), .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next(RemoteOp::EnsureRelease);

        assert!(store.ensure_release("alice", "books", "library").await.is_err());
        assert!(store.ensure_release("alice", "books", "library").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_asset() {
        let store = MemoryStore::new();
        let asset = store.put_asset("alice", "books", "library", "a.pdf", "data");
        store.delete_asset("alice", "books", asset.id).await.unwrap();
        assert!(store.asset_names("alice", "books", "library").is_empty());
        assert!(store
            .delete_asset("alice", "books", asset.id)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
