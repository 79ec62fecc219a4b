//! Retrieval and listing.

use super::{progress, Orchestrator};
use crate::cache::CacheStatus;
use crate::catalog::find;
use crate::error::{Result, ShelfError};
use crate::models::{Book, Shelf};
use std::path::PathBuf;
use tracing::{debug, warn};

/// A catalog record with the state of its local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookStatus {
    pub book: Book,
    pub cache: CacheStatus,
}

impl Orchestrator {
    /// Local path of a book, downloading and verifying it if not cached.
    ///
    /// A cached copy with local edits is returned as is (with a warning) so
    /// unsynced changes are never overwritten.
    pub async fn retrieve(&self, shelf: &Shelf, id: &str) -> Result<PathBuf> {
        let books = self.catalogs.load_shelf(shelf).await?;
        let book = find(&books, id)
            .ok_or_else(|| ShelfError::not_found(format!("book '{}' on shelf {}", id, shelf.name)))?;
        self.retrieve_book(book).await
    }

    pub async fn retrieve_book(&self, book: &Book) -> Result<PathBuf> {
        let source = &book.source;
        let path = self
            .cache
            .path_for(book)
            .ok_or_else(|| ShelfError::validation("source", format!("'{}' has no resolvable source", book.id)))?;

        if path.is_file() {
            if self.cache.has_been_modified(
                &source.owner,
                &source.repo,
                &book.id,
                &source.asset,
                book.sha256(),
            )? {
                warn!("{} has local changes not yet synced", book.id);
            } else {
                debug!("{} served from cache", book.id);
            }
            return Ok(path);
        }

        if book.sha256().is_empty() {
            return Err(ShelfError::validation(
                "checksum",
                format!("'{}' has no recorded checksum to verify against", book.id),
            ));
        }

        let (_, asset) = self.locate_asset(source).await?;
        let cache = self.cache.clone();
        let remote = self.remote.clone();
        let cancel = self.cancel.clone();
        let book = book.clone();
        let size = asset.size;

        progress::run_tracked(&asset.name, self.progress.as_ref(), move |tx| async move {
            let stream = remote
                .download_asset(&book.source.owner, &book.source.repo, asset.id)
                .await?;
            cache
                .store(
                    &book.source.owner,
                    &book.source.repo,
                    &book.id,
                    &book.source.asset,
                    stream,
                    book.sha256(),
                    Some(size),
                    Some(tx),
                    &cancel,
                )
                .await
        })
        .await
    }

    /// Every record on a shelf with its cache status.
    pub async fn list(&self, shelf: &Shelf) -> Result<Vec<BookStatus>> {
        let books = self.catalogs.load_shelf(shelf).await?;
        books
            .into_iter()
            .map(|book| {
                let cache = self.cache.status(&book)?;
                Ok(BookStatus { book, cache })
            })
            .collect()
    }
}
