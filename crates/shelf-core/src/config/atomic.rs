//! Crash-safe persistence of local JSON files (the user config).
//!
//! Content is written to a named temp file in the target's directory,
//! fsynced, then renamed over the target. A reader sees the old file or the
//! new one, never a torn write.

use crate::{Result, ShelfError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

fn json_error(path: &Path, action: &str, err: serde_json::Error) -> ShelfError {
    ShelfError::Json {
        message: format!("Failed to {} {}: {}", action, path.display(), err),
        source: Some(err),
    }
}

/// Parse a JSON file; `Ok(None)` when it does not exist.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| json_error(path, "parse", e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ShelfError::io_with_path(e, path)),
    }
}

/// Replace `path` with `value` as pretty JSON.
///
/// With `keep_backup`, an existing file is first copied to `<name>.bak`.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T, keep_backup: bool) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(value).map_err(|e| json_error(path, "serialize", e))?;
    body.push(b'\n');

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| ShelfError::io_with_path(e, dir))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .map_err(|e| ShelfError::io_with_path(e, dir))?;
    temp.write_all(&body)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| ShelfError::io_with_path(e, temp.path()))?;

    if keep_backup && path.exists() {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".bak");
        match fs::copy(path, &backup) {
            Ok(_) => debug!("Backed up {}", path.display()),
            Err(e) => warn!("Could not back up {}: {}", path.display(), e),
        }
    }

    temp.persist(path)
        .map_err(|e| ShelfError::io_with_path(e.error, path))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Prefs {
        default_shelf: String,
        shelves: u32,
    }

    fn prefs(name: &str, shelves: u32) -> Prefs {
        Prefs {
            default_shelf: name.to_string(),
            shelves,
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        write_json_file(&path, &prefs("main", 2), false).unwrap();

        let back: Option<Prefs> = read_json_file(&path).unwrap();
        assert_eq!(back, Some(prefs("main", 2)));
        assert!(fs::read_to_string(&path).unwrap().ends_with("}\n"));
    }

    #[test]
    fn test_backup_holds_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        write_json_file(&path, &prefs("main", 1), true).unwrap();
        write_json_file(&path, &prefs("archive", 2), true).unwrap();

        let backup: Option<Prefs> = read_json_file(&dir.path().join("config.json.bak")).unwrap();
        assert_eq!(backup, Some(prefs("main", 1)));
        let current: Option<Prefs> = read_json_file(&path).unwrap();
        assert_eq!(current, Some(prefs("archive", 2)));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let missing: Option<Prefs> = read_json_file(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_malformed_file_is_json_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = read_json_file::<Prefs>(&path).unwrap_err();
        assert!(matches!(err, ShelfError::Json { .. }));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        write_json_file(&path, &prefs("main", 1), false).unwrap();

        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("config.json")]);
    }
}
