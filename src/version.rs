//! Optimistic conflict detection for read-modify-write cycles.
//!
//! A [`FileVersion`] snapshot records a file's mtime and size (and
//! optionally a SHA-256 of its content) at read time. [`VersionTracker::check`]
//! verifies the file is unchanged before a write, and
//! [`VersionTracker::safe_update`] wraps the whole snapshot → modify →
//! lock → re-check → write loop with bounded retries.
//!
//! This is the lightweight alternative to holding a lock across the whole
//! read-modify-write: readers pay nothing, and writers only conflict when
//! another process actually raced them.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::constants::SAFE_UPDATE_RETRIES;
use crate::errors::{MemoryError, Result};
use crate::fsio;
use crate::lock::FileLock;

/// Snapshot of a file's state at a point in time.
#[derive(Debug, Clone)]
pub struct FileVersion {
    pub path: PathBuf,
    pub mtime: SystemTime,
    pub size: u64,
    pub sha256: Option<String>,
}

/// Takes and verifies [`FileVersion`] snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionTracker {
    /// When set, snapshots also hash file content. Catches the
    /// same-mtime-same-size edge case at the cost of a full read.
    pub use_content_hash: bool,
}

impl VersionTracker {
    pub fn new(use_content_hash: bool) -> Self {
        Self { use_content_hash }
    }

    /// Record the file's current `(mtime, size, sha256?)`.
    pub fn snapshot(&self, path: &Path) -> Result<FileVersion> {
        let meta = std::fs::metadata(path).map_err(|e| MemoryError::io(path, e))?;
        let mtime = meta.modified().map_err(|e| MemoryError::io(path, e))?;

        let sha256 = if self.use_content_hash {
            Some(hash_file(path)?)
        } else {
            None
        };

        Ok(FileVersion {
            path: path.into(),
            mtime,
            size: meta.len(),
            sha256,
        })
    }

    /// Succeed iff the file still matches the snapshot.
    pub fn check(&self, version: &FileVersion) -> Result<()> {
        let conflict = || MemoryError::Conflict {
            path: version.path.clone(),
        };

        let meta = std::fs::metadata(&version.path).map_err(|_| conflict())?;
        let mtime = meta.modified().map_err(|e| MemoryError::io(&version.path, e))?;

        if mtime != version.mtime || meta.len() != version.size {
            return Err(conflict());
        }

        if let Some(expected) = &version.sha256 {
            if hash_file(&version.path)? != *expected {
                return Err(conflict());
            }
        }

        Ok(())
    }

    /// Read-modify-write with conflict detection and retry.
    ///
    /// Order per attempt: snapshot → read → `modify(data)` → acquire lock →
    /// re-check → atomic write → release. Retries up to
    /// [`SAFE_UPDATE_RETRIES`] times with a short backoff, then propagates
    /// the conflict.
    pub fn safe_update<T, F>(
        &self,
        path: &Path,
        mut modify: F,
        lock_timeout_s: u64,
        stale_age_s: u64,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(T) -> T,
    {
        for attempt in 0..=SAFE_UPDATE_RETRIES {
            let version = self.snapshot(path)?;
            let data: T = fsio::read_json(path)?;
            let modified = modify(data);

            let _guard = FileLock::acquire(path, lock_timeout_s, stale_age_s)?;
            match self.check(&version) {
                Ok(()) => {
                    fsio::write_json(path, &modified)?;
                    return Ok(modified);
                }
                Err(e @ MemoryError::Conflict { .. }) => {
                    if attempt == SAFE_UPDATE_RETRIES {
                        return Err(e);
                    }
                    warn!(
                        path = %path.display(),
                        attempt = attempt + 1,
                        "conflict during safe_update, retrying"
                    );
                    drop(_guard);
                    std::thread::sleep(Duration::from_millis(10 * (attempt as u64 + 1)));
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop returns on final attempt")
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| MemoryError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
