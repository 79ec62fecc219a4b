//! Resumable batch ingest backed by the migration ledger.

use super::ingest::IngestRequest;
use super::{BatchReport, Orchestrator};
use crate::error::ShelfError;
use crate::ledger::{Ledger, LedgerEntry};
use crate::models::Shelf;
use tracing::{info, warn};

impl Orchestrator {
    /// Ingest `requests` in order, recording each completed source in `ledger`.
    ///
    /// With `skip_done`, sources already in the ledger are skipped without
    /// being fetched. Content that is already cataloged counts as skipped and
    /// is recorded so a re-run does not fetch it again. A cancellation stops
    /// the run.
    pub async fn migrate(
        &self,
        shelf: &Shelf,
        requests: &[IngestRequest],
        ledger: &Ledger,
        skip_done: bool,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for request in requests {
            let key = request.source.key();
            if skip_done {
                match ledger.contains(&key) {
                    Ok(true) => {
                        info!("Skipping {} (already migrated)", key);
                        report.record_skip(key);
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        report.record_failure(key, &e);
                        continue;
                    }
                }
            }

            let mut request = request.clone();
            if request.migrated_from.is_none() {
                request.migrated_from = Some(key.clone());
            }

            let book_id = match self.ingest(shelf, &request).await {
                Ok(book) => {
                    report.record_success(&key);
                    book.id
                }
                Err(ShelfError::DuplicateContent { existing_id, .. }) => {
                    info!("{} is already cataloged as {}", key, existing_id);
                    report.record_skip(&key);
                    existing_id
                }
                Err(e @ ShelfError::Cancelled) => {
                    report.record_failure(key, &e);
                    break;
                }
                Err(e) => {
                    report.record_failure(key, &e);
                    continue;
                }
            };

            if let Err(e) = ledger.append(&LedgerEntry::now(&key, book_id, &shelf.name)) {
                warn!("Migrated {} but could not record it: {}", key, e);
            }
        }

        info!("Migration finished: {}", report.summary());
        report
    }
}
