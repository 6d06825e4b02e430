//! Cross-process advisory locking using lock directories.
//!
//! `mkdir` is the only atomic primitive assumed, which keeps the lock
//! portable across POSIX, Windows, and network filesystems. The lock
//! directory carries a `holder.json` with owning PID, hostname, and
//! acquire time so waiters can diagnose and break stale locks.
//!
//! A lock is held from [`FileLock::acquire`] until the guard is dropped,
//! guaranteeing release on every exit path including panics. Re-entrance
//! is not supported; each acquisition is independent.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::LOCK_POLL_INTERVAL_MS;
use crate::errors::{MemoryError, Result};

const HOLDER_FILENAME: &str = "holder.json";

/// Metadata written inside the lock directory for debugging stale locks.
#[derive(Debug, Serialize, Deserialize)]
struct HolderMeta {
    pid: u32,
    hostname: String,
    acquired_at: f64,
    path: String,
}

/// A held lock on one resource path. Dropping it releases the lock.
#[derive(Debug)]
pub struct FileLock {
    lock_dir: PathBuf,
    meta_path: PathBuf,
}

impl FileLock {
    /// Block until the lock on `path` is acquired or `timeout_s` elapses.
    ///
    /// Existing locks older than `stale_age_s`, or whose holder PID is no
    /// longer alive, are forcibly broken and the acquisition retried.
    pub fn acquire(path: &Path, timeout_s: u64, stale_age_s: u64) -> Result<Self> {
        Self::acquire_inner(path, Some(Duration::from_secs(timeout_s)), stale_age_s)
            .transpose()
            .expect("blocking acquire always resolves to a result")
    }

    /// Non-blocking variant: returns `Ok(None)` immediately when the lock
    /// is held by someone else.
    pub fn try_acquire(path: &Path, stale_age_s: u64) -> Result<Option<Self>> {
        Self::acquire_inner(path, None, stale_age_s)
    }

    fn acquire_inner(
        path: &Path,
        timeout: Option<Duration>,
        stale_age_s: u64,
    ) -> Result<Option<Self>> {
        let lock_dir = lock_dir_for(path);
        let meta_path = lock_dir.join(HOLDER_FILENAME);
        let stale = Duration::from_secs(stale_age_s);
        let start = Instant::now();

        if let Some(parent) = lock_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoryError::io(parent, e))?;
        }

        loop {
            match std::fs::create_dir(&lock_dir) {
                Ok(()) => {
                    let lock = Self {
                        lock_dir,
                        meta_path,
                    };
                    lock.write_meta(path);
                    debug!(lock = %lock.lock_dir.display(), "lock acquired");
                    return Ok(Some(lock));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if break_stale(&lock_dir, &meta_path, stale) {
                        continue;
                    }

                    let timeout = match timeout {
                        None => return Ok(None),
                        Some(t) => t,
                    };
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(MemoryError::LockTimeout {
                            path: path.into(),
                            waited_secs: waited.as_secs_f64(),
                            holder: read_holder(&meta_path),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_POLL_INTERVAL_MS));
                }
                Err(e) => return Err(MemoryError::io(&lock_dir, e)),
            }
        }
    }

    /// Holder metadata is best-effort: the mkdir already won the race, so
    /// a failed write here leaves the lock held but undiagnosable.
    fn write_meta(&self, path: &Path) {
        let meta = HolderMeta {
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at: unix_now(),
            path: path.display().to_string(),
        };
        if let Ok(json) = serde_json::to_vec(&meta) {
            let _ = std::fs::write(&self.meta_path, json);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.meta_path);
        if let Err(e) = std::fs::remove_dir(&self.lock_dir) {
            warn!(lock = %self.lock_dir.display(), error = %e, "error releasing lock");
        } else {
            debug!(lock = %self.lock_dir.display(), "lock released");
        }
    }
}

/// `<path>.lock/` sibling of the resource being locked.
fn lock_dir_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Break a lock whose holder appears to have crashed. Returns true when
/// the lock directory was removed and acquisition should be retried.
///
/// A lock is stale when its holder metadata is older than the threshold,
/// when the metadata is missing and the directory itself is old, or when
/// the recorded PID is no longer running on this host.
fn break_stale(lock_dir: &Path, meta_path: &Path, stale: Duration) -> bool {
    let meta: Option<HolderMeta> = std::fs::read(meta_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());

    let meta = match meta {
        Some(m) => m,
        None => {
            // Holder crashed between mkdir and metadata write. Only the
            // directory mtime is available to judge age.
            let age = std::fs::metadata(lock_dir)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
            if matches!(age, Some(a) if a > stale) {
                warn!(lock = %lock_dir.display(), "breaking incomplete stale lock");
                return force_break(lock_dir, meta_path);
            }
            return false;
        }
    };

    let age = unix_now() - meta.acquired_at;
    if age > stale.as_secs_f64() {
        warn!(
            lock = %lock_dir.display(),
            holder_pid = meta.pid,
            age_secs = age as u64,
            "breaking stale lock"
        );
        return force_break(lock_dir, meta_path);
    }

    if meta.hostname == hostname()
        && meta.pid != std::process::id()
        && !process_alive(meta.pid)
    {
        warn!(
            lock = %lock_dir.display(),
            holder_pid = meta.pid,
            "breaking orphaned lock, holder no longer exists"
        );
        return force_break(lock_dir, meta_path);
    }

    false
}

fn force_break(lock_dir: &Path, meta_path: &Path) -> bool {
    let _ = std::fs::remove_file(meta_path);
    std::fs::remove_dir(lock_dir).is_ok()
}

fn read_holder(meta_path: &Path) -> String {
    std::fs::read(meta_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<HolderMeta>(&bytes).ok())
        .map(|m| format!("pid={} host={} acquired={:.0}", m.pid, m.hostname, m.acquired_at))
        .unwrap_or_else(|| "unknown".to_string())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Check whether a PID is still running. `kill(pid, 0)` probes existence
/// without delivering a signal; EPERM means the process exists but is not
/// ours, so it still counts as alive.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if unsafe { libc::kill(pid as i32, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No portable liveness probe; stale-age breaking still applies.
    true
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    } else {
        "unknown".to_string()
    }
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
}
