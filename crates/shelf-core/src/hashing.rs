//! SHA-256 content identity.
//!
//! The catalog's `checksum.sha256` is the single source of truth for "last
//! known good" content; these helpers recompute it from live bytes.

use crate::config::TransferConfig;
use crate::error::{Result, ShelfError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Lowercase hex SHA-256 of a file's content.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| ShelfError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; TransferConfig::CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ShelfError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex SHA-256 of an in-memory buffer.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compare two hex digests, ignoring case and surrounding whitespace.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Fail with `ChecksumMismatch` unless `actual` equals `expected`.
pub fn ensure_digest(expected: &str, actual: &str) -> Result<()> {
    if digests_match(expected, actual) {
        Ok(())
    } else {
        Err(ShelfError::ChecksumMismatch {
            expected: expected.trim().to_lowercase(),
            actual: actual.to_string(),
        })
    }
}

/// Verify a file's SHA-256 matches the expected value.
pub fn verify_sha256(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    ensure_digest(expected, &actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_sha256_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert_eq!(sha256_file(file.path()).unwrap(), EMPTY_SHA256);
        assert_eq!(sha256_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn test_file_and_bytes_agree() {
        let mut file = NamedTempFile::new().unwrap();
        let content = vec![42u8; TransferConfig::CHUNK_SIZE * 2 + 3];
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        assert_eq!(sha256_file(file.path()).unwrap(), sha256_bytes(&content));
    }

    #[test]
    fn test_verify_sha256() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        file.flush().unwrap();

        let expected = sha256_bytes(b"hello").to_uppercase();
        assert!(verify_sha256(file.path(), &expected).is_ok());

        let err = verify_sha256(file.path(), EMPTY_SHA256).unwrap_err();
        assert!(matches!(err, ShelfError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = sha256_file("/nonexistent/book.pdf").unwrap_err();
        assert!(matches!(err, ShelfError::Io { path: Some(_), .. }));
    }
}
