//! Append-only migration ledger.
//!
//! One JSON object per line, one line per completed migration. Lines are
//! never rewritten; the set of recorded `source_path` values is the
//! idempotency key space for resumable batch migration.

use crate::error::{Result, ShelfError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub source_path: String,
    pub book_id: String,
    pub shelf: String,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn now(
        source_path: impl Into<String>,
        book_id: impl Into<String>,
        shelf: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            book_id: book_id.into(),
            shelf: shelf.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Handle to a ledger file. The file is created on first append.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// A ledger backed by the JSON-lines file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk.
    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ShelfError::io_with_path(e, parent))?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ShelfError::io_with_path(e, &self.path))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ShelfError::io_with_path(e, &self.path))?;
        file.sync_all()
            .map_err(|e| ShelfError::io_with_path(e, &self.path))?;

        debug!("Ledger: recorded {} -> {}", entry.source_path, entry.book_id);
        Ok(())
    }

    /// Whether `source_path` has a recorded migration. Linear scan.
    pub fn contains(&self, source_path: &str) -> Result<bool> {
        Ok(self
            .entries()?
            .iter()
            .any(|entry| entry.source_path == source_path))
    }

    /// All readable records in file order. Malformed lines are skipped.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ShelfError::io_with_path(e, &self.path)),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| ShelfError::io_with_path(e, &self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping malformed ledger line {} in {}: {}",
                    index + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_ledger_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::new(temp_dir.path().join("ledger.jsonl"));

        assert!(!ledger.contains("books/sicp.pdf").unwrap());
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[test]
    fn test_append_and_contains() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::new(temp_dir.path().join("nested").join("ledger.jsonl"));

        ledger
            .append(&LedgerEntry::now("books/sicp.pdf", "sicp", "main"))
            .unwrap();
        ledger
            .append(&LedgerEntry::now("books/taocp.pdf", "taocp", "main"))
            .unwrap();

        assert!(ledger.contains("books/sicp.pdf").unwrap());
        assert!(ledger.contains("books/taocp.pdf").unwrap());
        assert!(!ledger.contains("books/other.pdf").unwrap());

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_append_never_rewrites_prior_lines() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::new(temp_dir.path().join("ledger.jsonl"));

        ledger.append(&LedgerEntry::now("a", "a1", "main")).unwrap();
        let first = std::fs::read_to_string(ledger.path()).unwrap();
        ledger.append(&LedgerEntry::now("b", "b1", "main")).unwrap();
        let second = std::fs::read_to_string(ledger.path()).unwrap();

        assert!(second.starts_with(&first));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger.jsonl");
        let ledger = Ledger::new(&path);
        ledger.append(&LedgerEntry::now("a", "a1", "main")).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        drop(file);
        ledger.append(&LedgerEntry::now("b", "b1", "main")).unwrap();

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].book_id, "b1");
    }
}
