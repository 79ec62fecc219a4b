//! Error types for the shelf engine.
//!
//! One enum covers the three independently failing stores (remote catalog,
//! remote assets, local cache) so saga code can decide per variant whether a
//! failure aborts the operation, is recorded and skipped, or is surfaced to the
//! caller as an actionable condition.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for shelf operations.
#[derive(Debug, Error)]
pub enum ShelfError {
    /// Catalog, release, asset or book absent. Frequently legitimate.
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Duplicate content: sha256 {sha256} is already cataloged as '{existing_id}'")]
    DuplicateContent { sha256: String, existing_id: String },

    #[error("Asset '{asset}' already exists in release '{release}'")]
    NameCollision { release: String, asset: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Remote store errors
    #[error("Remote store error: {message}")]
    Remote {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited by remote store, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Transfer cancelled")]
    Cancelled,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("Catalog decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for shelf operations.
pub type Result<T> = std::result::Result<T, ShelfError>;

impl From<std::io::Error> for ShelfError {
    fn from(err: std::io::Error) -> Self {
        ShelfError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ShelfError {
    fn from(err: serde_json::Error) -> Self {
        ShelfError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ShelfError {
    fn from(err: reqwest::Error) -> Self {
        ShelfError::Remote {
            message: err.to_string(),
            status_code: err.status().map(|s| s.as_u16()),
        }
    }
}

impl ShelfError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ShelfError::NotFound { what: what.into() }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        ShelfError::Remote {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ShelfError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ShelfError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ShelfError::NotFound { .. })
    }

    /// Errors the caller can resolve with a force flag or a rename.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ShelfError::DuplicateContent { .. } | ShelfError::NameCollision { .. }
        )
    }

    /// Check if this error should trigger a retry of an idempotent remote call.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShelfError::RateLimited { .. } => true,
            ShelfError::Remote { status_code, .. } => match status_code {
                None => true,
                Some(code) => *code >= 500,
            },
            _ => false,
        }
    }

    /// Process exit status for the command layer.
    ///
    /// - 1: generic failure
    /// - 2: not found
    /// - 3: duplicate content or name collision
    /// - 4: checksum mismatch
    /// - 5: remote store failure
    /// - 130: cancelled
    pub fn exit_code(&self) -> i32 {
        match self {
            ShelfError::NotFound { .. } => 2,
            ShelfError::DuplicateContent { .. } | ShelfError::NameCollision { .. } => 3,
            ShelfError::ChecksumMismatch { .. } => 4,
            ShelfError::Remote { .. } | ShelfError::RateLimited { .. } => 5,
            ShelfError::Cancelled => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShelfError::NameCollision {
            release: "library".into(),
            asset: "sicp.pdf".into(),
        };
        assert_eq!(
            err.to_string(),
            "Asset 'sicp.pdf' already exists in release 'library'"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(ShelfError::DuplicateContent {
            sha256: "abc".into(),
            existing_id: "sicp".into()
        }
        .is_recoverable());
        assert!(!ShelfError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ShelfError::RateLimited {
            retry_after_secs: Some(5)
        }
        .is_retryable());
        assert!(ShelfError::Remote {
            message: "bad gateway".into(),
            status_code: Some(502)
        }
        .is_retryable());
        assert!(!ShelfError::Remote {
            message: "unauthorized".into(),
            status_code: Some(401)
        }
        .is_retryable());
        assert!(!ShelfError::not_found("catalog.json").is_retryable());
        assert!(!ShelfError::Cancelled.is_retryable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShelfError::not_found("x").exit_code(), 2);
        assert_eq!(ShelfError::Cancelled.exit_code(), 130);
        assert_eq!(ShelfError::Other("boom".into()).exit_code(), 1);
    }
}
