//! Configuration for the shelf engine.
//!
//! Constants are grouped by concern in unit structs. The user-editable part
//! (`ShelfConfig`) lives in a JSON file under the platform config directory
//! and is resolved once by the command host, then handed to the engine
//! explicitly.

mod atomic;

pub use atomic::{read_json_file, write_json_file};

use crate::models::Shelf;
use crate::{Result, ShelfError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const GITHUB_API_BASE: &'static str = "https://api.github.com";
    pub const GITHUB_UPLOADS_BASE: &'static str = "https://uploads.github.com";
    pub const GITHUB_API_VERSION: &'static str = "2022-11-28";
    pub const USER_AGENT: &'static str = "shelf/0.1";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_RETRIES: u32 = 3;
    /// Page size and page cap of paginated release and asset listings.
    pub const PER_PAGE: u32 = 100;
    pub const MAX_PAGES: u32 = 20;
}

/// Transfer and staging configuration.
pub struct TransferConfig;

impl TransferConfig {
    /// Bound on queued progress events between a transfer task and its reporter.
    pub const PROGRESS_CHANNEL_CAPACITY: usize = 32;
    pub const CHUNK_SIZE: usize = 64 * 1024;
    pub const STAGING_PREFIX: &'static str = ".staging-";
    pub const DEFAULT_CONTENT_TYPE: &'static str = "application/octet-stream";
}

/// Directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const APP_DIR_NAME: &'static str = "shelf";
    pub const CONFIG_FILENAME: &'static str = "config.json";
    pub const CACHE_DIR_NAME: &'static str = "books";
    pub const LEDGER_FILENAME: &'static str = "migrate-ledger.jsonl";
    pub const DEFAULT_CATALOG_PATH: &'static str = "catalog.json";
    pub const DEFAULT_RELEASE: &'static str = "library";
}

/// Environment variables consulted for the remote store token, in order.
pub const TOKEN_ENV_VARS: &[&str] = &["SHELF_GITHUB_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"];

/// User configuration persisted as `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_shelf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
    #[serde(default)]
    pub shelves: Vec<Shelf>,
}

impl ShelfConfig {
    /// `<config_dir>/shelf/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| {
                dir.join(PathsConfig::APP_DIR_NAME)
                    .join(PathsConfig::CONFIG_FILENAME)
            })
            .ok_or_else(|| ShelfError::Config {
                message: "Could not determine the user config directory".to_string(),
            })
    }

    /// Load the config; a missing file yields the default (empty) config.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Option<Self> = read_json_file(path)?;
        match config {
            Some(config) => {
                config.validate()?;
                Ok(config)
            }
            None => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        write_json_file(path, self, true)
    }

    /// Shelf names must be unique and every shelf needs an owner and repo.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for shelf in &self.shelves {
            if shelf.name.is_empty() || shelf.owner.is_empty() || shelf.repo.is_empty() {
                return Err(ShelfError::Config {
                    message: format!("Shelf '{}' needs a name, owner and repo", shelf.name),
                });
            }
            if !seen.insert(shelf.name.as_str()) {
                return Err(ShelfError::Config {
                    message: format!("Shelf '{}' is defined more than once", shelf.name),
                });
            }
        }
        if let Some(name) = &self.default_shelf {
            if !seen.contains(name.as_str()) {
                return Err(ShelfError::Config {
                    message: format!("Default shelf '{}' is not defined", name),
                });
            }
        }
        Ok(())
    }

    pub fn shelf(&self, name: &str) -> Result<&Shelf> {
        self.shelves
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ShelfError::not_found(format!("shelf '{}'", name)))
    }

    /// The named shelf, or the default shelf when `name` is `None`.
    ///
    /// With no default configured, a single configured shelf is used.
    pub fn resolve_shelf(&self, name: Option<&str>) -> Result<&Shelf> {
        if let Some(name) = name.or(self.default_shelf.as_deref()) {
            return self.shelf(name);
        }
        match self.shelves.as_slice() {
            [only] => Ok(only),
            [] => Err(ShelfError::Config {
                message: "No shelves configured".to_string(),
            }),
            _ => Err(ShelfError::Config {
                message: "Several shelves configured and no default_shelf set".to_string(),
            }),
        }
    }

    /// Insert or replace a shelf by name.
    pub fn upsert_shelf(&mut self, shelf: Shelf) {
        match self.shelves.iter_mut().find(|s| s.name == shelf.name) {
            Some(existing) => *existing = shelf,
            None => self.shelves.push(shelf),
        }
    }

    /// Local cache root: the configured override or `<cache_dir>/shelf/books`.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| {
                dir.join(PathsConfig::APP_DIR_NAME)
                    .join(PathsConfig::CACHE_DIR_NAME)
            })
            .ok_or_else(|| ShelfError::Config {
                message: "Could not determine the user cache directory".to_string(),
            })
    }

    /// Migration ledger path: the configured override or `<data_dir>/shelf/migrate-ledger.jsonl`.
    pub fn ledger_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.ledger_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| {
                dir.join(PathsConfig::APP_DIR_NAME)
                    .join(PathsConfig::LEDGER_FILENAME)
            })
            .ok_or_else(|| ShelfError::Config {
                message: "Could not determine the user data directory".to_string(),
            })
    }
}

/// Authentication token from the environment, if any.
pub fn github_token() -> Option<String> {
    TOKEN_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> ShelfConfig {
        ShelfConfig {
            default_shelf: Some("main".into()),
            cache_dir: None,
            ledger_path: None,
            shelves: vec![
                Shelf::new("main", "alice", "books"),
                Shelf::new("papers", "alice", "papers").with_default_release("v1"),
            ],
        }
    }

    #[test]
    fn test_load_missing_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = ShelfConfig::load(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(config, ShelfConfig::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shelf").join("config.json");
        let config = sample_config();

        config.save(&path).unwrap();
        assert_eq!(ShelfConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_resolve_shelf() {
        let config = sample_config();
        assert_eq!(config.resolve_shelf(None).unwrap().name, "main");
        assert_eq!(config.resolve_shelf(Some("papers")).unwrap().repo, "papers");
        assert!(config.resolve_shelf(Some("missing")).unwrap_err().is_not_found());

        let single = ShelfConfig {
            shelves: vec![Shelf::new("only", "bob", "lib")],
            ..Default::default()
        };
        assert_eq!(single.resolve_shelf(None).unwrap().name, "only");
        assert!(ShelfConfig::default().resolve_shelf(None).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_unknown_default() {
        let mut config = sample_config();
        config.shelves.push(Shelf::new("main", "carol", "other"));
        assert!(config.validate().is_err());

        let config = ShelfConfig {
            default_shelf: Some("nope".into()),
            ..sample_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upsert_shelf_replaces_by_name() {
        let mut config = sample_config();
        config.upsert_shelf(Shelf::new("main", "alice", "library"));
        assert_eq!(config.shelves.len(), 2);
        assert_eq!(config.shelf("main").unwrap().repo, "library");
    }

    #[test]
    fn test_cache_dir_override() {
        let config = ShelfConfig {
            cache_dir: Some(PathBuf::from("/tmp/shelf-cache")),
            ..Default::default()
        };
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/shelf-cache"));
    }
}
