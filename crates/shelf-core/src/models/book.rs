//! Catalog record types.

use crate::error::{Result, ShelfError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Source type written for assets held in a remote release.
pub const RELEASE_SOURCE_TYPE: &str = "github-release";

/// Maximum id length (one leading character plus up to 62 more).
const MAX_ID_LEN: usize = 63;

static BOOK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,62}$").expect("book id regex must compile"));

/// One catalog record.
///
/// Field order here is the canonical order in the encoded catalog. Empty
/// optional fields are omitted when marshalled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Checksum::is_empty")]
    pub checksum: Checksum,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Source::is_empty")]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

impl Checksum {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            sha256: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sha256.is_empty()
    }
}

/// Fully qualified location of a book's binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub asset: String,
}

impl Source {
    pub fn release_asset(
        owner: impl Into<String>,
        repo: impl Into<String>,
        release: impl Into<String>,
        asset: impl Into<String>,
    ) -> Self {
        Self {
            kind: RELEASE_SOURCE_TYPE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            release: release.into(),
            asset: asset.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
            && self.owner.is_empty()
            && self.repo.is_empty()
            && self.release.is_empty()
            && self.asset.is_empty()
    }

    /// Whether every coordinate needed to locate the asset is present.
    pub fn is_complete(&self) -> bool {
        !self.owner.is_empty()
            && !self.repo.is_empty()
            && !self.release.is_empty()
            && !self.asset.is_empty()
    }
}

/// Provenance. Never required for correctness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub migrated_from: String,
}

impl Meta {
    pub fn is_empty(&self) -> bool {
        self.added_at.is_none() && self.migrated_from.is_empty()
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Book {
    /// Create a minimal record with a validated id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self {
            id,
            ..Default::default()
        })
    }

    pub fn sha256(&self) -> &str {
        &self.checksum.sha256
    }

    /// Check the id and, when present, the shape of the recorded digest.
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.id)?;
        let digest = self.sha256();
        if !digest.is_empty() && !(digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())) {
            return Err(ShelfError::validation(
                "checksum",
                format!("'{}' of {} is not a SHA-256 hex digest", digest, self.id),
            ));
        }
        Ok(())
    }
}

/// Check a book id against the slug rule `^[a-z0-9][a-z0-9-]{1,62}$`.
pub fn validate_id(id: &str) -> Result<()> {
    if BOOK_ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(ShelfError::validation(
            "id",
            format!(
                "'{}' must be 2-63 characters of lowercase letters, digits and '-', not starting with '-'",
                id
            ),
        ))
    }
}

/// Derive a valid id from free text such as a file stem or title.
///
/// Returns `None` when nothing usable remains after normalisation.
pub fn slugify(input: &str) -> Option<String> {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    slug.truncate(MAX_ID_LEN);
    let slug = slug.trim_matches('-').to_string();
    if validate_id(&slug).is_ok() {
        Some(slug)
    } else {
        None
    }
}

/// Metadata changes applied by an edit.
#[derive(Debug, Clone, Default)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
    pub format: Option<String>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
}

impl BookPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.year.is_none()
            && self.format.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
    }

    /// Apply the patch in place. Removals run after additions.
    pub fn apply(&self, book: &mut Book) {
        if let Some(title) = &self.title {
            book.title = title.clone();
        }
        if let Some(author) = &self.author {
            book.author = author.clone();
        }
        if let Some(year) = self.year {
            book.year = Some(year);
        }
        if let Some(format) = &self.format {
            book.format = format.to_lowercase();
        }
        for tag in &self.add_tags {
            book.tags.insert(tag.clone());
        }
        for tag in &self.remove_tags {
            book.tags.remove(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["sicp", "a1", "taocp-vol-1", "0day"] {
            assert!(validate_id(id).is_ok(), "{} should be valid", id);
        }
    }

    #[test]
    fn test_invalid_ids() {
        let too_long = "a".repeat(64);
        for id in ["", "a", "-sicp", "SICP", "sicp book", "sicp_2", too_long.as_str()] {
            assert!(validate_id(id).is_err(), "{} should be invalid", id);
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify("Structure and Interpretation (2nd ed)").as_deref(),
            Some("structure-and-interpretation-2nd-ed")
        );
        assert_eq!(slugify("--Hello__World--").as_deref(), Some("hello-world"));
        assert_eq!(slugify("???"), None);
        assert_eq!(slugify(&"x".repeat(100)).map(|s| s.len()), Some(63));
    }

    #[test]
    fn test_source_completeness() {
        let source = Source::release_asset("alice", "books", "library", "sicp.pdf");
        assert!(source.is_complete());
        assert_eq!(source.kind, RELEASE_SOURCE_TYPE);
        assert!(Source::default().is_empty());
    }

    #[test]
    fn test_patch_apply() {
        let mut book = Book::new("sicp").unwrap();
        book.tags.insert("lisp".into());
        book.tags.insert("draft".into());

        let patch = BookPatch {
            title: Some("SICP".into()),
            format: Some("PDF".into()),
            add_tags: vec!["classic".into()],
            remove_tags: vec!["draft".into()],
            ..Default::default()
        };
        patch.apply(&mut book);

        assert_eq!(book.title, "SICP");
        assert_eq!(book.format, "pdf");
        assert!(book.tags.contains("classic"));
        assert!(book.tags.contains("lisp"));
        assert!(!book.tags.contains("draft"));
    }

    #[test]
    fn test_validate_checks_id_and_digest() {
        let mut book = Book::new("sicp").unwrap();
        assert!(book.validate().is_ok());

        book.checksum = Checksum::sha256("E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855");
        assert!(book.validate().is_ok());

        book.checksum = Checksum::sha256("md5:abc");
        assert!(book.validate().is_err());

        let decoded = Book {
            id: "Not A Slug".into(),
            ..Default::default()
        };
        assert!(decoded.validate().is_err());
    }
}
