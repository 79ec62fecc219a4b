//! Catalog/asset-store audit with optional repair.
//!
//! Compares the asset names the catalog references against the assets every
//! release of the shelf's repository actually holds. Records without an
//! asset are orphaned entries; assets without a record are orphaned assets,
//! whichever release they sit in. With `fix`, both are removed so the two sets match.

use super::Orchestrator;
use crate::catalog::remove_in_place;
use crate::error::{Result, ShelfError};
use crate::models::{Book, Shelf};
use crate::remote::AssetHandle;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A catalog record whose asset does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedEntry {
    pub id: String,
    pub release: String,
    pub asset: String,
}

/// A release asset no catalog record references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedAsset {
    pub release: String,
    pub name: String,
    #[serde(skip)]
    pub asset_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub shelf: String,
    pub books_checked: usize,
    pub assets_checked: usize,
    pub orphaned_entries: Vec<OrphanedEntry>,
    pub orphaned_assets: Vec<OrphanedAsset>,
    /// Whether repairs were attempted.
    pub fixed: bool,
    /// Repair steps that failed.
    pub fix_failures: Vec<String>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned_entries.is_empty() && self.orphaned_assets.is_empty()
    }
}

impl Orchestrator {
    /// Audit `shelf`; with `fix`, remove orphaned entries (catalog and cache)
    /// and delete orphaned assets.
    pub async fn verify(&self, shelf: &Shelf, fix: bool) -> Result<VerifyReport> {
        let mut books = self.catalogs.load_shelf(shelf).await?;
        let mut report = VerifyReport {
            shelf: shelf.name.clone(),
            books_checked: books.len(),
            ..Default::default()
        };

        // release tag -> asset names referenced by the catalog
        let mut referenced: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for book in &books {
            let source = &book.source;
            if !source.is_complete() {
                report.orphaned_entries.push(orphaned_entry(book));
                continue;
            }
            if source.owner != shelf.owner || source.repo != shelf.repo {
                warn!(
                    "{} points at {}/{}, outside {}; not audited",
                    book.id,
                    source.owner,
                    source.repo,
                    shelf.slug()
                );
                continue;
            }
            referenced
                .entry(source.release.clone())
                .or_default()
                .insert(source.asset.clone());
        }

        // Every release of the repository is audited, referenced or not.
        let mut present: BTreeMap<String, Vec<AssetHandle>> = BTreeMap::new();
        for release in self.remote.list_releases(&shelf.owner, &shelf.repo).await? {
            self.cancel.check()?;
            let assets = self
                .remote
                .list_release_assets(&shelf.owner, &shelf.repo, release.id)
                .await?;
            report.assets_checked += assets.len();
            present.entry(release.tag).or_default().extend(assets);
        }
        for tag in referenced.keys() {
            if !present.contains_key(tag) {
                debug!("Release {} does not exist on {}", tag, shelf.slug());
            }
        }

        let no_assets = Vec::new();
        let no_names = BTreeSet::new();
        let tags: BTreeSet<&String> = referenced.keys().chain(present.keys()).collect();
        for tag in tags {
            let assets = present.get(tag).unwrap_or(&no_assets);
            let names = referenced.get(tag).unwrap_or(&no_names);

            let present_names: BTreeSet<&str> = assets.iter().map(|a| a.name.as_str()).collect();
            for book in &books {
                let source = &book.source;
                if source.is_complete()
                    && source.owner == shelf.owner
                    && source.repo == shelf.repo
                    && &source.release == tag
                    && !present_names.contains(source.asset.as_str())
                {
                    report.orphaned_entries.push(orphaned_entry(book));
                }
            }
            for asset in assets {
                if !names.contains(&asset.name) {
                    report.orphaned_assets.push(OrphanedAsset {
                        release: tag.clone(),
                        name: asset.name.clone(),
                        asset_id: asset.id,
                    });
                }
            }
        }

        info!(
            "Verified {}: {} orphaned entries, {} orphaned assets",
            shelf.name,
            report.orphaned_entries.len(),
            report.orphaned_assets.len()
        );

        if fix && !report.is_consistent() {
            self.repair(shelf, &mut books, &mut report).await?;
        }
        Ok(report)
    }

    async fn repair(
        &self,
        shelf: &Shelf,
        books: &mut Vec<Book>,
        report: &mut VerifyReport,
    ) -> Result<()> {
        report.fixed = true;

        if !report.orphaned_entries.is_empty() {
            let removed: Vec<Book> = report
                .orphaned_entries
                .iter()
                .filter_map(|entry| remove_in_place(books, &entry.id))
                .collect();
            let message = format!("Verify: drop {} orphaned record(s)", removed.len());
            self.catalogs.save_shelf(shelf, books, &message).await?;
            for book in &removed {
                self.invalidate_cache(book);
            }
        }

        for asset in &report.orphaned_assets {
            self.cancel.check()?;
            match self
                .remote
                .delete_asset(&shelf.owner, &shelf.repo, asset.asset_id)
                .await
            {
                Ok(()) => info!("Deleted orphaned asset {}/{}", asset.release, asset.name),
                Err(ShelfError::NotFound { .. }) => {}
                Err(e) => {
                    warn!("Could not delete orphaned asset {}: {}", asset.name, e);
                    report
                        .fix_failures
                        .push(format!("{}/{}: {}", asset.release, asset.name, e));
                }
            }
        }
        Ok(())
    }
}

fn orphaned_entry(book: &Book) -> OrphanedEntry {
    OrphanedEntry {
        id: book.id.clone(),
        release: book.source.release.clone(),
        asset: book.source.asset.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::harness;
    use super::*;
    use crate::remote::{RemoteOp, RemoteStore};

    #[tokio::test]
    async fn test_consistent_shelf() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;

        let report = h.orchestrator.verify(&h.shelf, false).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.books_checked, 1);
        assert_eq!(report.assets_checked, 1);
    }

    #[tokio::test]
    async fn test_detects_both_orphan_kinds() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        h.seed("htdp", "htdp.pdf", b"htdp").await;
        h.store.put_asset("alice", "books", "library", "stray.pdf", &b"stray"[..]);
        let (_, asset) = h
            .orchestrator
            .locate_asset(&h.books().await[1].source)
            .await
            .unwrap();
        h.store.delete_asset("alice", "books", asset.id).await.unwrap();

        let report = h.orchestrator.verify(&h.shelf, false).await.unwrap();
        assert_eq!(report.orphaned_entries.len(), 1);
        assert_eq!(report.orphaned_entries[0].id, "htdp");
        assert_eq!(report.orphaned_assets.len(), 1);
        assert_eq!(report.orphaned_assets[0].name, "stray.pdf");
        assert!(!report.fixed);
        // Audit alone changes nothing.
        assert_eq!(h.books().await.len(), 2);
    }

    #[tokio::test]
    async fn test_fix_makes_sets_equal() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        h.seed("htdp", "htdp.pdf", b"htdp").await;
        h.store.put_asset("alice", "books", "library", "stray.pdf", &b"stray"[..]);
        // Point htdp at a release that does not exist; its asset becomes unreferenced.
        let mut books = h.books().await;
        books[1].source.release = "gone".into();
        h.store.put_file(
            "alice",
            "books",
            "catalog.json",
            crate::catalog::codec::marshal(&books).unwrap(),
        );

        let report = h.orchestrator.verify(&h.shelf, true).await.unwrap();
        assert!(report.fixed);
        assert!(report.fix_failures.is_empty());

        let referenced: BTreeSet<String> =
            h.books().await.into_iter().map(|b| b.source.asset).collect();
        let present: BTreeSet<String> = h
            .store
            .asset_names("alice", "books", "library")
            .into_iter()
            .collect();
        assert_eq!(referenced, present);

        let after = h.orchestrator.verify(&h.shelf, false).await.unwrap();
        assert!(after.is_consistent());
    }

    #[tokio::test]
    async fn test_fix_sweeps_unreferenced_release() {
        let h = harness();
        h.seed("sicp", "sicp.pdf", b"content").await;
        h.orchestrator
            .move_book(&h.shelf, "sicp", &h.shelf, Some("archive"), false)
            .await
            .unwrap();
        // Moving back leaves a copy behind in archive when the cleanup fails.
        h.store.fail_next(RemoteOp::Delete);
        let book = h
            .orchestrator
            .move_book(&h.shelf, "sicp", &h.shelf, Some("library"), false)
            .await
            .unwrap();
        assert_eq!(book.source.release, "library");
        assert_eq!(h.store.asset_names("alice", "books", "archive"), vec!["sicp.pdf"]);

        let report = h.orchestrator.verify(&h.shelf, true).await.unwrap();
        assert!(report.orphaned_entries.is_empty());
        assert_eq!(report.orphaned_assets.len(), 1);
        assert_eq!(report.orphaned_assets[0].release, "archive");
        assert_eq!(report.assets_checked, 2);
        assert!(report.fix_failures.is_empty());

        assert!(h.store.asset_names("alice", "books", "archive").is_empty());
        assert_eq!(h.store.asset_names("alice", "books", "library"), vec!["sicp.pdf"]);
        assert!(h.orchestrator.verify(&h.shelf, false).await.unwrap().is_consistent());
    }
}
