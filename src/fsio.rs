//! Atomic JSON file I/O.
//!
//! Writes go to a sibling temp file in the same directory, get fsynced,
//! then rename over the target. The rename is atomic on POSIX and on
//! recent Windows, so a reader never observes a partial file: any failure
//! leaves the prior version of the target intact. On POSIX the containing
//! directory is fsynced as well so the rename itself survives a crash.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{MemoryError, Result};
use crate::lock::FileLock;

/// Serialize `data` as pretty-printed JSON and atomically replace `path`.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| MemoryError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| MemoryError::io(dir, e))?;
    serde_json::to_writer_pretty(&mut tmp, data).map_err(|e| MemoryError::serde(path, e))?;
    tmp.write_all(b"\n").map_err(|e| MemoryError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| MemoryError::io(path, e))?;

    tmp.persist(path)
        .map_err(|e| MemoryError::io(path, e.error))?;

    sync_dir(dir)?;
    Ok(())
}

/// [`write_json`] wrapped in a [`FileLock`] on the target path.
pub fn write_json_locked<T: Serialize>(
    path: &Path,
    data: &T,
    timeout_s: u64,
    stale_age_s: u64,
) -> Result<()> {
    let _guard = FileLock::acquire(path, timeout_s, stale_age_s)?;
    write_json(path, data)
}

/// Read and decode a JSON file. Missing files surface as
/// [`MemoryError::NotFound`] so callers can distinguish "fresh workspace"
/// from real failures.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MemoryError::NotFound { path: path.into() })
        }
        Err(e) => return Err(MemoryError::io(path, e)),
    };
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| MemoryError::serde(path, e))
}

/// fsync the directory so the rename of a child is durable. No-op off
/// POSIX, where directory handles cannot be synced.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    let handle = File::open(dir).map_err(|e| MemoryError::io(dir, e))?;
    handle.sync_all().map_err(|e| MemoryError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "shard".into(),
            count: 3,
        };
        write_json(&path, &doc).unwrap();
        let back: Doc = read_json(&path).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn overwrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json(
            &path,
            &Doc {
                name: "a-much-longer-first-version".into(),
                count: 1,
            },
        )
        .unwrap();
        write_json(
            &path,
            &Doc {
                name: "b".into(),
                count: 2,
            },
        )
        .unwrap();
        let back: Doc = read_json(&path).unwrap();
        assert_eq!(back.name, "b");
        assert_eq!(back.count, 2);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Doc>(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json(
            &path,
            &Doc {
                name: "x".into(),
                count: 0,
            },
        )
        .unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
