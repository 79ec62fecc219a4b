//! Shelf Core - catalog and cache consistency engine for a personal document library.
//!
//! Book metadata lives in a version-controlled JSON catalog, binaries live as
//! release assets in a remote store, and a local cache mirrors a subset of
//! them. None of the three stores share a transaction; the [`Orchestrator`]
//! sequences every multi-store operation so partial failure leaves
//! recoverable excess state, and [`Orchestrator::verify`] repairs it.
//!
//! # Example
//!
//! ```rust,no_run
//! use shelf_core::{CacheManager, GitHubStore, Orchestrator, Shelf};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> shelf_core::Result<()> {
//!     let remote = Arc::new(GitHubStore::new(None)?);
//!     let orchestrator = Orchestrator::new(remote, CacheManager::new("/tmp/shelf-cache"));
//!     let shelf = Shelf::new("main", "alice", "books");
//!
//!     for entry in orchestrator.list(&shelf).await? {
//!         println!("{} [{}]", entry.book.id, entry.cache);
//!     }
//!
//!     let report = orchestrator.verify(&shelf, false).await?;
//!     println!("consistent: {}", report.is_consistent());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hashing;
pub mod ledger;
pub mod models;
pub mod remote;
pub mod transfer;

pub use cache::{CacheEntry, CacheManager, CacheStatus};
pub use cancel::{CancellationToken, CancelledError};
pub use catalog::CatalogManager;
pub use config::{ShelfConfig, TransferConfig};
pub use error::{Result, ShelfError};
pub use ledger::{Ledger, LedgerEntry};
pub use models::{Book, BookPatch, Checksum, Meta, Shelf, Source};
pub use remote::{GitHubStore, MemoryStore, RemoteStore};
pub use transfer::{
    BatchReport, BookStatus, DeleteReport, ImportOptions, IngestRequest, IngestSource,
    ItemFailure, Orchestrator, ProgressCallback, StepOutcome, TransferProgress, VerifyReport,
};
