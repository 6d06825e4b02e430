//! Error types for the memory store.
//!
//! Variants are grouped by *behavior*, not by subsystem: callers match on
//! what they can do about the failure (retry, rebuild, give up), not on
//! where it happened. Non-error outcomes of ingest (too short, gated out,
//! duplicate) are reported through [`crate::memory::types::IngestStatus`],
//! never through this enum.

use std::path::PathBuf;

/// All failures the store can surface.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A file lock could not be acquired within the timeout. No state was
    /// changed; the caller may retry.
    #[error("could not acquire lock on {} after {waited_secs:.1}s (holder: {holder})", path.display())]
    LockTimeout {
        path: PathBuf,
        waited_secs: f64,
        holder: String,
    },

    /// A file changed between snapshot and write. `safe_update` retries
    /// internally; this escapes only after retries are exhausted.
    #[error("conflict on {}: file modified since last read", path.display())]
    Conflict { path: PathBuf },

    /// A shard referenced by the indexes or WAL is missing or unparsable.
    /// `rebuild_indexes()` is the prescribed recovery.
    #[error("store corrupt: {detail}")]
    StoreCorrupt { detail: String },

    /// Migration aborted; the backup is preserved and the workspace is
    /// unchanged.
    #[error("migration failed: {detail}")]
    MigrationFailed { detail: String },

    /// The requested file does not exist.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Invalid caller input (bad namespace name, unknown outcome label).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Underlying filesystem failure. Atomic writes guarantee the prior
    /// version of the target remains intact.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure, with the file it came from.
    #[error("serialization error on {}: {source}", path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl MemoryError {
    /// Attach path context to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach path context to a serde_json error.
    pub fn serde(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serde {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_path_context() {
        let err = MemoryError::io(
            "/tmp/ws/shards/2026-01-general.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("2026-01-general.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn lock_timeout_mentions_holder() {
        let err = MemoryError::LockTimeout {
            path: PathBuf::from("/tmp/ws/shards"),
            waited_secs: 30.0,
            holder: "pid=1234".into(),
        };
        assert!(err.to_string().contains("pid=1234"));
    }
}
