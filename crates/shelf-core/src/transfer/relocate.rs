//! Move a book to another release or another shelf.
//!
//! The asset is downloaded, verified and re-uploaded to the destination
//! before any catalog changes. A cross-shelf move commits the destination
//! catalog first and the source catalog second, so an interruption between
//! the two commits leaves the book listed twice rather than nowhere. The
//! source asset is deleted only after the catalogs point away from it.

use super::Orchestrator;
use crate::catalog::{find, remove_in_place, upsert_in_place};
use crate::error::{Result, ShelfError};
use crate::models::{Book, Shelf, Source};
use tracing::{info, warn};

fn same_catalog(a: &Shelf, b: &Shelf) -> bool {
    a.owner == b.owner && a.repo == b.repo && a.catalog_path == b.catalog_path
}

impl Orchestrator {
    /// Move book `id` from `from` to `release` on `to` (its default release if
    /// `None`). With `keep_source` the original asset is left in place.
    pub async fn move_book(
        &self,
        from: &Shelf,
        id: &str,
        to: &Shelf,
        release: Option<&str>,
        keep_source: bool,
    ) -> Result<Book> {
        self.cancel.check()?;
        let same_shelf = same_catalog(from, to);
        let release_tag = release.unwrap_or(&to.default_release).to_string();

        let mut source_books = self.catalogs.load_shelf(from).await?;
        let book = find(&source_books, id)
            .cloned()
            .ok_or_else(|| ShelfError::not_found(format!("book '{}' on shelf {}", id, from.name)))?;
        let old = book.source.clone();

        if same_shelf && old.release == release_tag && old.owner == to.owner && old.repo == to.repo {
            return Err(ShelfError::validation(
                "release",
                format!("'{}' is already in release '{}'", id, release_tag),
            ));
        }

        let mut dest_books = if same_shelf {
            Vec::new()
        } else {
            self.catalogs.load_shelf(to).await?
        };

        // A previous interrupted move may already have committed the destination.
        let resumed = !same_shelf
            && find(&dest_books, id).is_some_and(|existing| {
                existing.sha256() == book.sha256()
                    && existing.source.owner == to.owner
                    && existing.source.repo == to.repo
            });

        let moved = if resumed {
            info!("{} already present on {}, finishing interrupted move", id, to.name);
            find(&dest_books, id).cloned().unwrap_or_else(|| book.clone())
        } else {
            if !same_shelf && find(&dest_books, id).is_some() {
                return Err(ShelfError::validation(
                    "id",
                    format!("'{}' is already used on shelf {}", id, to.name),
                ));
            }

            let (_, asset) = self.locate_asset(&old).await?;
            let staged = self.download_verified(&book, &asset).await?;

            let dest_release = self
                .remote
                .ensure_release(&to.owner, &to.repo, &release_tag)
                .await?;
            self.claim_asset_name(&to.owner, &to.repo, &dest_release, &old.asset, false)
                .await?;
            let uploaded = self
                .upload_staged(&to.owner, &to.repo, &dest_release, &old.asset, &staged)
                .await?;

            let mut moved = book.clone();
            moved.source = Source::release_asset(&to.owner, &to.repo, &dest_release.tag, &uploaded.name);
            moved.size_bytes = uploaded.size;
            moved
        };

        self.cancel.check()?;
        if same_shelf {
            upsert_in_place(&mut source_books, moved.clone());
            self.catalogs
                .save_shelf(
                    from,
                    &source_books,
                    &format!("Move {} to release {}", id, release_tag),
                )
                .await?;
        } else {
            if !resumed {
                upsert_in_place(&mut dest_books, moved.clone());
                self.catalogs
                    .save_shelf(to, &dest_books, &format!("Move {} from {}", id, from.name))
                    .await?;
            }
            remove_in_place(&mut source_books, id);
            self.catalogs
                .save_shelf(from, &source_books, &format!("Move {} to {}", id, to.name))
                .await?;
        }

        if !keep_source && old != moved.source {
            match self.locate_asset(&old).await {
                Ok((_, asset)) => {
                    if let Err(e) = self.remote.delete_asset(&old.owner, &old.repo, asset.id).await {
                        warn!("Could not delete source asset {}: {}", old.asset, e);
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Could not locate source asset {}: {}", old.asset, e),
            }
        }

        self.invalidate_cache(&book);
        info!("Moved {} to {}@{}", id, to.name, moved.source.release);
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::harness;
    use super::*;
    use crate::remote::RemoteOp;

    #[tokio::test]
    async fn test_same_shelf_release_move() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        h.orchestrator.retrieve(&h.shelf, "sicp").await.unwrap();

        let moved = h
            .orchestrator
            .move_book(&h.shelf, "sicp", &h.shelf, Some("archive"), false)
            .await
            .unwrap();

        assert_eq!(moved.source.release, "archive");
        assert!(h.store.asset_names("alice", "books", "library").is_empty());
        assert_eq!(h.store.asset_names("alice", "books", "archive"), vec!["sicp.pdf"]);
        assert_eq!(h.books().await, vec![moved]);
        assert_eq!(h.store.commits("alice", "books").len(), 1);
        assert!(!h.orchestrator.cache().exists("alice", "books", "sicp", "sicp.pdf"));
    }

    #[tokio::test]
    async fn test_move_to_current_release_is_rejected() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        let err = h
            .orchestrator
            .move_book(&h.shelf, "sicp", &h.shelf, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_cross_shelf_move() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        let other = Shelf::new("work", "bob", "papers");

        let moved = h
            .orchestrator
            .move_book(&h.shelf, "sicp", &other, None, false)
            .await
            .unwrap();

        assert_eq!(moved.source.owner, "bob");
        assert!(h.books().await.is_empty());
        let dest = h.orchestrator.catalogs().load_shelf(&other).await.unwrap();
        assert_eq!(dest, vec![moved]);
        assert_eq!(h.store.asset_names("bob", "papers", "library"), vec!["sicp.pdf"]);
        assert!(h.store.asset_names("alice", "books", "library").is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_cross_shelf_move_resumes() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        let other = Shelf::new("work", "bob", "papers");

        h.orchestrator
            .move_book(&h.shelf, "sicp", &other, None, true)
            .await
            .unwrap();

        // State after a crash between the destination and source commits.
        h.seed("sicp", "sicp.pdf", b"content").await;
        let resumed = h
            .orchestrator
            .move_book(&h.shelf, "sicp", &other, None, false)
            .await
            .unwrap();

        assert_eq!(resumed.source.owner, "bob");
        assert!(h.books().await.is_empty());
        assert_eq!(
            h.orchestrator.catalogs().load_shelf(&other).await.unwrap().len(),
            1
        );
        assert!(h.store.asset_names("alice", "books", "library").is_empty());
    }

    #[tokio::test]
    async fn test_move_collision() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        h.store.put_asset("alice", "books", "archive", "sicp.pdf", &b"other"[..]);

        let err = h
            .orchestrator
            .move_book(&h.shelf, "sicp", &h.shelf, Some("archive"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::NameCollision { .. }));
        assert_eq!(h.books().await[0].source.release, "library");
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_catalog_untouched() {
        let h = harness();
        let book = h.seed("sicp", "sicp.pdf", b"content").await;
        h.store.fail_next(RemoteOp::Upload);

        let err = h
            .orchestrator
            .move_book(&h.shelf, "sicp", &h.shelf, Some("archive"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::Remote { .. }));
        assert_eq!(h.books().await, vec![book]);
        assert!(h.store.commits("alice", "books").is_empty());
        assert_eq!(h.store.asset_names("alice", "books", "library"), vec!["sicp.pdf"]);
    }
}
