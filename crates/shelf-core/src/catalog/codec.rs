//! Catalog text encoding.
//!
//! A catalog is a pretty-printed JSON array of [`Book`] records. Field order
//! follows the struct definition and empty optional fields are omitted, so
//! diffs on the metadata repository stay small.

use crate::error::{Result, ShelfError};
use crate::models::Book;

/// Decode a catalog. Empty or whitespace-only input is an empty catalog.
pub fn parse(bytes: &[u8]) -> Result<Vec<Book>> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes).map_err(|e| ShelfError::Decode {
        message: e.to_string(),
        source: Some(e),
    })
}

/// Encode a catalog in canonical form, with a trailing newline.
pub fn marshal(books: &[Book]) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(books)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Checksum, Meta, Source};
    use chrono::{TimeZone, Utc};

    fn full_book() -> Book {
        let mut book = Book::new("sicp").unwrap();
        book.title = "Structure and Interpretation of Computer Programs".into();
        book.author = "Abelson, Sussman".into();
        book.year = Some(1996);
        book.tags.insert("lisp".into());
        book.tags.insert("classic".into());
        book.format = "pdf".into();
        book.checksum = Checksum::sha256("ab".repeat(32));
        book.size_bytes = 1024;
        book.source = Source::release_asset("alice", "books", "library", "sicp.pdf");
        book.meta = Meta {
            added_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            migrated_from: String::new(),
        };
        book
    }

    #[test]
    fn test_parse_empty_array() {
        assert!(parse(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse(b"").unwrap().is_empty());
        assert!(parse(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        let err = parse(b"[{\"id\": ").unwrap_err();
        assert!(matches!(err, ShelfError::Decode { .. }));

        let err = parse(b"{\"id\": \"sicp\"}").unwrap_err();
        assert!(matches!(err, ShelfError::Decode { .. }));
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let mut second = Book::new("htdp").unwrap();
        second.title = "How to Design Programs".into();
        let books = vec![full_book(), second, Book::new("zz-minimal").unwrap()];

        let decoded = parse(&marshal(&books).unwrap()).unwrap();
        assert_eq!(decoded, books);
    }

    #[test]
    fn test_marshal_omits_empty_fields() {
        let text = String::from_utf8(marshal(&[Book::new("bare").unwrap()]).unwrap()).unwrap();
        assert!(text.contains("\"id\": \"bare\""));
        for field in ["title", "author", "year", "tags", "checksum", "source", "meta"] {
            assert!(!text.contains(field), "unexpected field {field} in {text}");
        }
    }

    #[test]
    fn test_marshal_canonical_field_order() {
        let text = String::from_utf8(marshal(&[full_book()]).unwrap()).unwrap();
        let position = |needle: &str| text.find(needle).unwrap();

        assert!(position("\"id\"") < position("\"title\""));
        assert!(position("\"title\"") < position("\"checksum\""));
        assert!(position("\"checksum\"") < position("\"source\""));
        assert!(position("\"source\"") < position("\"meta\""));
        assert!(text.contains("\"type\": \"github-release\""));
        // Tags are a set and encode sorted.
        assert!(position("\"classic\"") < position("\"lisp\""));
        assert!(text.ends_with("]\n"));
    }
}
