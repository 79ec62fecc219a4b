//! Metadata edits.

use super::{BatchReport, Orchestrator};
use crate::catalog::upsert_in_place;
use crate::error::{Result, ShelfError};
use crate::models::{Book, BookPatch, Shelf};
use tracing::info;

impl Orchestrator {
    /// Apply `patch` to book `id` and commit. `NotFound` if absent.
    pub async fn edit(&self, shelf: &Shelf, id: &str, patch: &BookPatch) -> Result<Book> {
        let book = self
            .catalogs
            .update(shelf, &format!("Edit {}", id), |books| {
                let mut book = books
                    .iter()
                    .find(|b| b.id == id)
                    .cloned()
                    .ok_or_else(|| {
                        ShelfError::not_found(format!("book '{}' on shelf {}", id, shelf.name))
                    })?;
                patch.apply(&mut book);
                upsert_in_place(books, book.clone());
                Ok(book)
            })
            .await?;
        info!("Edited {}", id);
        Ok(book)
    }

    /// Apply the same patch to several books in a single commit.
    ///
    /// Unknown ids are reported as failures; if the commit itself fails every
    /// edited id is reported as failed.
    pub async fn edit_many(&self, shelf: &Shelf, ids: &[String], patch: &BookPatch) -> BatchReport {
        let mut report = BatchReport::default();
        let message = format!("Edit {} book(s)", ids.len());

        let result = self
            .catalogs
            .update(shelf, &message, |books| {
                let mut edited = Vec::new();
                let mut missing = Vec::new();
                for id in ids {
                    match books.iter_mut().find(|b| &b.id == id) {
                        Some(book) => {
                            patch.apply(book);
                            edited.push(id.clone());
                        }
                        None => missing.push(id.clone()),
                    }
                }
                Ok((edited, missing))
            })
            .await;

        match result {
            Ok((edited, missing)) => {
                for id in edited {
                    report.record_success(id);
                }
                for id in missing {
                    let error = ShelfError::not_found(format!("book '{}'", id));
                    report.record_failure(id, &error);
                }
            }
            Err(e) => {
                for id in ids {
                    report.record_failure(id, &e);
                }
            }
        }
        report
    }
}
