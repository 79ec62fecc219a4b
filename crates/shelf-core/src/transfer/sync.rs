//! Push locally edited cache files back to the asset store.
//!
//! Drift is recomputed live against the catalog checksum. Changed books have
//! their old asset replaced under the same name and their record updated;
//! catalog writes are batched so one run produces one commit per shelf.

use super::{BatchReport, Orchestrator};
use crate::error::{Result, ShelfError};
use crate::models::{Book, Checksum, Shelf};
use tracing::{debug, info};

impl Orchestrator {
    /// Sync every modified book on each shelf.
    pub async fn sync(&self, shelves: &[Shelf]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for shelf in shelves {
            match self.sync_shelf(shelf, None).await {
                Ok(shelf_report) => report.merge(shelf_report),
                Err(e @ ShelfError::Cancelled) => return Err(e),
                Err(e) => report.record_failure(&shelf.name, &e),
            }
        }
        Ok(report)
    }

    /// Sync modified books on one shelf, optionally restricted to `ids`.
    ///
    /// Cancellation aborts the run without committing; already replaced
    /// assets still show as drift and are pushed again by the next run.
    pub async fn sync_shelf(&self, shelf: &Shelf, ids: Option<&[String]>) -> Result<BatchReport> {
        let mut books = self.catalogs.load_shelf(shelf).await?;
        let mut report = BatchReport::default();

        if let Some(ids) = ids {
            for id in ids {
                if !books.iter().any(|b| &b.id == id) {
                    report.record_failure(id, &ShelfError::not_found(format!("book '{}'", id)));
                }
            }
        }

        for book in books.iter_mut() {
            if ids.is_some_and(|ids| !ids.contains(&book.id)) {
                continue;
            }
            self.cancel.check()?;

            match self.push_if_modified(book).await {
                Ok(true) => report.record_success(&book.id),
                Ok(false) => report.record_skip(&book.id),
                Err(e @ ShelfError::Cancelled) => return Err(e),
                Err(e) => report.record_failure(&book.id, &e),
            }
        }

        if report.succeeded.is_empty() {
            debug!("Nothing to sync on {}", shelf.name);
            return Ok(report);
        }

        self.cancel.check()?;
        let message = format!("Sync {} book(s)", report.succeeded.len());
        if let Err(e) = self.catalogs.save_shelf(shelf, &books, &message).await {
            for id in std::mem::take(&mut report.succeeded) {
                report.record_failure(id, &e);
            }
        } else {
            info!("Synced {} book(s) on {}", report.succeeded.len(), shelf.name);
        }
        Ok(report)
    }

    /// Replace the remote asset if the cached copy drifted. Updates `book`
    /// in place and returns whether anything was pushed.
    async fn push_if_modified(&self, book: &mut Book) -> Result<bool> {
        let source = book.source.clone();
        if !source.is_complete() {
            return Ok(false);
        }
        let modified = self.cache.has_been_modified(
            &source.owner,
            &source.repo,
            &book.id,
            &source.asset,
            book.sha256(),
        )?;
        if !modified {
            return Ok(false);
        }

        let cached = self
            .cache
            .path(&source.owner, &source.repo, &book.id, &source.asset);
        let staged = self.stage_local(&cached).await?;

        let release = self
            .remote
            .ensure_release(&source.owner, &source.repo, &source.release)
            .await?;
        // A missing old asset means an earlier run got this far; just upload.
        if let Some(old) = self
            .remote
            .find_asset(&source.owner, &source.repo, release.id, &source.asset)
            .await?
        {
            self.cancel.check()?;
            self.remote
                .delete_asset(&source.owner, &source.repo, old.id)
                .await?;
        }
        let uploaded = self
            .upload_staged(&source.owner, &source.repo, &release, &source.asset, &staged)
            .await?;

        book.checksum = Checksum::sha256(&staged.sha256);
        book.size_bytes = uploaded.size;
        Ok(true)
    }
}
