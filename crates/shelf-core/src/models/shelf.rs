//! Shelf definitions.

use crate::config::PathsConfig;
use serde::{Deserialize, Serialize};

/// A named logical collection: one remote repository holding one catalog
/// and one or more releases of binary assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shelf {
    pub name: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_release")]
    pub default_release: String,
}

fn default_catalog_path() -> String {
    PathsConfig::DEFAULT_CATALOG_PATH.to_string()
}

fn default_release() -> String {
    PathsConfig::DEFAULT_RELEASE.to_string()
}

impl Shelf {
    /// Create a shelf using the default catalog path and release tag.
    pub fn new(name: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            repo: repo.into(),
            catalog_path: default_catalog_path(),
            default_release: default_release(),
        }
    }

    /// Keep the catalog at `path` in the repository instead of the default.
    pub fn with_catalog_path(mut self, path: impl Into<String>) -> Self {
        self.catalog_path = path.into();
        self
    }

    /// Release new books land in when no tag is given.
    pub fn with_default_release(mut self, tag: impl Into<String>) -> Self {
        self.default_release = tag.into();
        self
    }

    /// `owner/repo`, used in log lines and error messages.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl std::fmt::Display for Shelf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}/{})", self.name, self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_on_deserialize() {
        let shelf: Shelf =
            serde_json::from_str(r#"{"name":"main","owner":"alice","repo":"books"}"#).unwrap();
        assert_eq!(shelf.catalog_path, PathsConfig::DEFAULT_CATALOG_PATH);
        assert_eq!(shelf.default_release, PathsConfig::DEFAULT_RELEASE);
        assert_eq!(shelf.slug(), "alice/books");
    }
}
