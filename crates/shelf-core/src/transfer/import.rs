//! Copy books from a foreign shelf without modifying it.

use super::{BatchReport, Orchestrator};
use crate::catalog::{find, find_by_sha256};
use crate::error::{Result, ShelfError};
use crate::models::{Book, Checksum, Meta, Shelf, Source};
use chrono::Utc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Target release; defaults to the local shelf's default release.
    pub release: Option<String>,
    /// Stop after this many books have been imported.
    pub limit: Option<usize>,
    /// Only consider these foreign ids.
    pub ids: Option<Vec<String>>,
}

impl Orchestrator {
    /// Import books from `foreign` into `local`.
    ///
    /// Books whose content already exists locally are skipped. Each remaining
    /// book is downloaded, verified and re-uploaded to the local release; the
    /// local catalog is committed once at the end of the run.
    pub async fn import(
        &self,
        foreign: &Shelf,
        local: &Shelf,
        options: &ImportOptions,
    ) -> Result<BatchReport> {
        let foreign_books = self.catalogs.load_shelf(foreign).await?;
        let mut local_books = self.catalogs.load_shelf(local).await?;
        let release_tag = options
            .release
            .clone()
            .unwrap_or_else(|| local.default_release.clone());
        let mut report = BatchReport::default();

        let candidates = foreign_books.iter().filter(|b| {
            options
                .ids
                .as_ref()
                .is_none_or(|ids| ids.iter().any(|id| id == &b.id))
        });

        for book in candidates {
            if options.limit.is_some_and(|limit| report.succeeded.len() >= limit) {
                info!("Import limit reached");
                break;
            }
            self.cancel.check()?;

            if let Some(existing) = find_by_sha256(&local_books, book.sha256()) {
                info!("{} already on {} as {}", book.id, local.name, existing.id);
                report.record_skip(&book.id);
                continue;
            }
            if find(&local_books, &book.id).is_some() {
                warn!("{} already used on {} by different content", book.id, local.name);
                report.record_skip(&book.id);
                continue;
            }

            match self.import_one(foreign, local, &release_tag, book).await {
                Ok(imported) => {
                    report.record_success(&imported.id);
                    local_books.push(imported);
                }
                Err(e @ ShelfError::Cancelled) => return Err(e),
                Err(e) => report.record_failure(&book.id, &e),
            }
        }

        if report.succeeded.is_empty() {
            return Ok(report);
        }

        self.cancel.check()?;
        let message = format!(
            "Import {} book(s) from {}",
            report.succeeded.len(),
            foreign.slug()
        );
        self.catalogs.save_shelf(local, &local_books, &message).await?;
        info!("{}", message);
        Ok(report)
    }

    async fn import_one(
        &self,
        foreign: &Shelf,
        local: &Shelf,
        release_tag: &str,
        book: &Book,
    ) -> Result<Book> {
        book.validate()?;
        let (_, asset) = self.locate_asset(&book.source).await?;
        let staged = self.download_verified(book, &asset).await?;

        let release = self
            .remote
            .ensure_release(&local.owner, &local.repo, release_tag)
            .await?;
        self.claim_asset_name(&local.owner, &local.repo, &release, &asset.name, false)
            .await?;
        let uploaded = self
            .upload_staged(&local.owner, &local.repo, &release, &asset.name, &staged)
            .await?;

        let mut imported = book.clone();
        imported.checksum = Checksum::sha256(&staged.sha256);
        imported.size_bytes = uploaded.size;
        imported.source = Source::release_asset(&local.owner, &local.repo, &release.tag, &uploaded.name);
        imported.meta = Meta {
            added_at: Some(Utc::now()),
            migrated_from: foreign.slug(),
        };

        self.cache_staged(&imported, staged);
        Ok(imported)
    }
}
