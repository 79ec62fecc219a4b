//! Best-effort removal of a book from all three stores.
//!
//! The catalog entry, the remote asset and the cache entry are removed
//! independently; a failure in one step is recorded and does not block the
//! others. A leftover asset is picked up by verify as an orphan.

use super::{BatchReport, Orchestrator};
use crate::catalog::{find, remove_in_place};
use crate::error::{Result, ShelfError};
use crate::models::Shelf;
use serde::Serialize;
use tracing::{info, warn};

/// Result of one removal step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    Done,
    /// Nothing to remove.
    Absent,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub id: String,
    pub catalog: StepOutcome,
    pub asset: StepOutcome,
    pub cache: StepOutcome,
}

impl DeleteReport {
    /// True when no step failed.
    pub fn is_complete(&self) -> bool {
        !self.catalog.is_failed() && !self.asset.is_failed() && !self.cache.is_failed()
    }

    fn first_failure(&self) -> Option<&str> {
        [&self.catalog, &self.asset, &self.cache]
            .into_iter()
            .find_map(|step| match step {
                StepOutcome::Failed(message) => Some(message.as_str()),
                _ => None,
            })
    }
}

fn outcome(step: &str, id: &str, result: Result<bool>) -> StepOutcome {
    match result {
        Ok(true) => StepOutcome::Done,
        Ok(false) => StepOutcome::Absent,
        Err(e) if e.is_not_found() => StepOutcome::Absent,
        Err(e) => {
            warn!("Delete {}: {} step failed: {}", id, step, e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

impl Orchestrator {
    /// Remove book `id` from `shelf`. `NotFound` if the catalog lacks it.
    pub async fn delete(&self, shelf: &Shelf, id: &str) -> Result<DeleteReport> {
        let mut books = self.catalogs.load_shelf(shelf).await?;
        let book = find(&books, id)
            .cloned()
            .ok_or_else(|| ShelfError::not_found(format!("book '{}' on shelf {}", id, shelf.name)))?;

        remove_in_place(&mut books, id);
        let catalog = self
            .catalogs
            .save_shelf(shelf, &books, &format!("Remove {}", id))
            .await
            .map(|()| true);

        let asset = async {
            // A record that names no asset has nothing to delete remotely.
            if !book.source.is_complete() {
                return Ok::<_, ShelfError>(false);
            }
            let (_, asset) = self.locate_asset(&book.source).await?;
            self.remote
                .delete_asset(&book.source.owner, &book.source.repo, asset.id)
                .await?;
            Ok::<_, ShelfError>(true)
        }
        .await;

        let cache = if book.source.is_complete() {
            self.cache
                .remove(&book.source.owner, &book.source.repo, &book.id, &book.source.asset)
        } else {
            Ok(false)
        };

        let report = DeleteReport {
            id: id.to_string(),
            catalog: outcome("catalog", id, catalog),
            asset: outcome("asset", id, asset),
            cache: outcome("cache", id, cache),
        };
        if report.is_complete() {
            info!("Removed {} from {}", id, shelf.name);
        }
        Ok(report)
    }

    /// Delete several books one after another.
    pub async fn delete_many(&self, shelf: &Shelf, ids: &[String]) -> BatchReport {
        let mut batch = BatchReport::default();
        for id in ids {
            match self.delete(shelf, id).await {
                Ok(report) => match report.first_failure() {
                    None => batch.record_success(id),
                    Some(message) => {
                        batch.record_failure(id, &ShelfError::Other(message.to_string()))
                    }
                },
                Err(e) => batch.record_failure(id, &e),
            }
        }
        batch
    }
}
