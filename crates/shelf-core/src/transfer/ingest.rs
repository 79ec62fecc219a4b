//! Ingest: add a new book to a shelf.
//!
//! Order: stage and hash, duplicate check, get-or-create the release, name
//! collision check, upload, then upsert and commit. The upload precedes the
//! commit, so a crash in between leaves an orphaned asset for verify to
//! clean up rather than a record pointing at nothing.

use super::stage::{stage_stream, StagedFile};
use super::{progress, BatchReport, Orchestrator};
use crate::catalog::{find, find_by_sha256, upsert_in_place};
use crate::config::NetworkConfig;
use crate::error::{Result, ShelfError};
use crate::models::{slugify, Book, Checksum, Meta, Shelf, Source};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the bytes of a new book come from.
#[derive(Debug, Clone)]
pub enum IngestSource {
    File(PathBuf),
    Url(String),
    /// In-memory content with its asset name.
    Bytes { name: String, data: Bytes },
}

impl IngestSource {
    /// Stable identifier for logs, reports and the migration ledger.
    pub fn key(&self) -> String {
        match self {
            IngestSource::File(path) => path.display().to_string(),
            IngestSource::Url(url) => url.clone(),
            IngestSource::Bytes { name, .. } => name.clone(),
        }
    }

    /// File name the source suggests for the asset.
    fn file_name(&self) -> Option<String> {
        match self {
            IngestSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            IngestSource::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty() && !s.contains(':'))
                    .map(|s| {
                        urlencoding::decode(s)
                            .map(|d| d.into_owned())
                            .unwrap_or_else(|_| s.to_string())
                    })
            }
            IngestSource::Bytes { name, .. } => Some(name.clone()),
        }
    }
}

/// Parameters for one ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: IngestSource,
    /// Book id; derived from the title or file name when absent.
    pub id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
    pub tags: Vec<String>,
    /// Asset name in the release; defaults to the source's file name.
    pub asset_name: Option<String>,
    /// Release tag; defaults to the shelf's default release.
    pub release: Option<String>,
    /// Accept duplicate content and replace a same-named asset.
    pub force: bool,
    pub migrated_from: Option<String>,
}

impl IngestRequest {
    pub fn new(source: IngestSource) -> Self {
        Self {
            source,
            id: None,
            title: None,
            author: None,
            year: None,
            tags: Vec::new(),
            asset_name: None,
            release: None,
            force: false,
            migrated_from: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn asset_name(&self) -> Result<String> {
        self.asset_name
            .clone()
            .or_else(|| self.source.file_name())
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ShelfError::validation("asset", "cannot derive an asset name from the source"))
    }

    fn book_id(&self, asset_name: &str) -> Result<String> {
        if let Some(id) = &self.id {
            return Ok(id.clone());
        }
        let stem = Path::new(asset_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.title
            .as_deref()
            .and_then(slugify)
            .or_else(|| slugify(&stem))
            .ok_or_else(|| ShelfError::validation("id", "cannot derive an id; pass one explicitly"))
    }
}

impl Orchestrator {
    /// Add one book to `shelf`. Returns the committed record.
    pub async fn ingest(&self, shelf: &Shelf, request: &IngestRequest) -> Result<Book> {
        self.cancel.check()?;
        let asset_name = request.asset_name()?;
        let id = request.book_id(&asset_name)?;
        let mut book = Book::new(&id)?;
        let release_tag = request
            .release
            .clone()
            .unwrap_or_else(|| shelf.default_release.clone());

        let staged = self.stage_source(&request.source, &asset_name).await?;
        debug!("Staged {} as {} ({} bytes)", request.source.key(), id, staged.size);
        self.cancel.check()?;

        let mut books = self.catalogs.load_shelf(shelf).await?;
        if let Some(existing) = find_by_sha256(&books, &staged.sha256) {
            if !request.force {
                return Err(ShelfError::DuplicateContent {
                    sha256: staged.sha256.clone(),
                    existing_id: existing.id.clone(),
                });
            }
        }
        if let Some(existing) = find(&books, &id) {
            if !request.force && existing.sha256() != staged.sha256 {
                return Err(ShelfError::validation(
                    "id",
                    format!("'{}' is already used on shelf {}", id, shelf.name),
                ));
            }
        }

        let release = self
            .remote
            .ensure_release(&shelf.owner, &shelf.repo, &release_tag)
            .await?;
        self.claim_asset_name(&shelf.owner, &shelf.repo, &release, &asset_name, request.force)
            .await?;
        let asset = self
            .upload_staged(&shelf.owner, &shelf.repo, &release, &asset_name, &staged)
            .await?;

        book.title = request.title.clone().unwrap_or_else(|| {
            Path::new(&asset_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        book.author = request.author.clone().unwrap_or_default();
        book.year = request.year;
        book.tags = request.tags.iter().cloned().collect();
        book.format = Path::new(&asset_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        book.checksum = Checksum::sha256(&staged.sha256);
        book.size_bytes = asset.size;
        book.source = Source::release_asset(&shelf.owner, &shelf.repo, &release.tag, &asset.name);
        book.meta = Meta {
            added_at: Some(Utc::now()),
            migrated_from: request.migrated_from.clone().unwrap_or_default(),
        };

        self.cancel.check()?;
        upsert_in_place(&mut books, book.clone());
        self.catalogs
            .save_shelf(shelf, &books, &format!("Add {}", book.id))
            .await?;
        info!("Shelved {} on {}", book.id, shelf.name);

        self.cache_staged(&book, staged);
        Ok(book)
    }

    /// Ingest several sources one after another. A cancellation stops the run.
    pub async fn ingest_many(&self, shelf: &Shelf, requests: &[IngestRequest]) -> BatchReport {
        let mut report = BatchReport::default();
        for request in requests {
            let key = request.source.key();
            match self.ingest(shelf, request).await {
                Ok(book) => report.record_success(book.id),
                Err(e @ ShelfError::Cancelled) => {
                    report.record_failure(key, &e);
                    break;
                }
                Err(e) => report.record_failure(key, &e),
            }
        }
        report
    }

    async fn stage_source(&self, source: &IngestSource, label: &str) -> Result<StagedFile> {
        match source {
            IngestSource::File(path) => self.stage_local(path).await,
            IngestSource::Url(url) => self.stage_url(url, label).await,
            IngestSource::Bytes { data, .. } => {
                let stream = futures::stream::iter(vec![Ok(data.clone())]).boxed();
                stage_stream(
                    stream,
                    &self.cache.staging_dir(),
                    Some(data.len() as u64),
                    None,
                    &self.cancel,
                )
                .await
            }
        }
    }

    async fn stage_url(&self, url: &str, label: &str) -> Result<StagedFile> {
        let client = reqwest::Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .build()?;
        let response = client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ShelfError::not_found(url));
        }
        if !status.is_success() {
            return Err(ShelfError::Remote {
                message: format!("GET {} returned {}", url, status),
                status_code: Some(status.as_u16()),
            });
        }

        let total = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ShelfError::from))
            .boxed();
        let cancel = self.cancel.clone();
        let staging = self.cache.staging_dir();

        progress::run_tracked(label, self.progress.as_ref(), move |tx| async move {
            stage_stream(stream, &staging, total, Some(tx), &cancel).await
        })
        .await
    }
}
