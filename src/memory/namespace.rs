//! Namespace isolation.
//!
//! A namespace is a fully isolated sub-workspace at
//! `namespaces/<name>/` with its own shards, indexes, and WAL; search in
//! one namespace never returns results from another. The manifest at the
//! workspace root tracks each namespace's lifecycle status.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{MemoryError, Result};
use crate::fsio;

pub const NAMESPACES_DIR: &str = "namespaces";
pub const MANIFEST_FILE: &str = "namespace_manifest.json";

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("valid name regex"));

/// Reject names that could escape the namespaces directory or collide
/// with workspace files.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(MemoryError::InvalidInput(format!(
            "invalid namespace name {name:?}: use alphanumeric, hyphen, or underscore, \
             starting with an alphanumeric (1-64 chars)"
        )))
    }
}

/// Lifecycle status of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub status: NamespaceStatus,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestDoc {
    version: String,
    updated_at: DateTime<Utc>,
    namespaces: BTreeMap<String, NamespaceInfo>,
}

/// Reads and writes the namespace manifest.
#[derive(Debug)]
pub struct NamespaceManifest {
    path: PathBuf,
    namespaces: BTreeMap<String, NamespaceInfo>,
}

impl NamespaceManifest {
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = workspace.join(MANIFEST_FILE);
        let namespaces = match fsio::read_json::<ManifestDoc>(&path) {
            Ok(doc) => doc.namespaces,
            Err(MemoryError::NotFound { .. }) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, namespaces })
    }

    fn save(&self, now: DateTime<Utc>) -> Result<()> {
        fsio::write_json(
            &self.path,
            &ManifestDoc {
                version: "1.0".into(),
                updated_at: now,
                namespaces: self.namespaces.clone(),
            },
        )
    }

    /// Register a namespace as active. Re-creating an active namespace is
    /// a no-op; re-creating an archived one reactivates it.
    pub fn create(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        validate_name(name)?;
        match self.namespaces.get_mut(name) {
            Some(info) if info.status == NamespaceStatus::Active => return Ok(()),
            Some(info) => {
                info.status = NamespaceStatus::Active;
                info.archived_at = None;
            }
            None => {
                self.namespaces.insert(
                    name.to_string(),
                    NamespaceInfo {
                        status: NamespaceStatus::Active,
                        created_at: now,
                        archived_at: None,
                    },
                );
            }
        }
        self.save(now)
    }

    pub fn archive(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let info = self
            .namespaces
            .get_mut(name)
            .ok_or_else(|| MemoryError::InvalidInput(format!("unknown namespace {name:?}")))?;
        info.status = NamespaceStatus::Archived;
        info.archived_at = Some(now);
        self.save(now)
    }

    pub fn remove(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        if self.namespaces.remove(name).is_none() {
            return Err(MemoryError::InvalidInput(format!(
                "unknown namespace {name:?}"
            )));
        }
        self.save(now)
    }

    pub fn get(&self, name: &str) -> Option<&NamespaceInfo> {
        self.namespaces.get(name)
    }

    pub fn list_active(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .filter(|(_, info)| info.status == NamespaceStatus::Active)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn list_all(&self) -> Vec<(String, NamespaceInfo)> {
        self.namespaces
            .iter()
            .map(|(name, info)| (name.clone(), info.clone()))
            .collect()
    }
}

/// Directory a namespace's nested workspace lives in.
pub fn namespace_workspace(workspace: &Path, name: &str) -> PathBuf {
    workspace.join(NAMESPACES_DIR).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("project-alpha").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("tenant_acme42").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading-dash").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn create_archive_delete_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = NamespaceManifest::load(dir.path()).unwrap();

        manifest.create("alpha", now()).unwrap();
        assert_eq!(manifest.list_active(), vec!["alpha"]);

        manifest.archive("alpha", now()).unwrap();
        assert!(manifest.list_active().is_empty());
        assert_eq!(
            manifest.get("alpha").unwrap().status,
            NamespaceStatus::Archived
        );

        manifest.remove("alpha", now()).unwrap();
        assert!(manifest.get("alpha").is_none());
    }

    #[test]
    fn manifest_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut manifest = NamespaceManifest::load(dir.path()).unwrap();
            manifest.create("beta", now()).unwrap();
        }
        let reloaded = NamespaceManifest::load(dir.path()).unwrap();
        assert_eq!(reloaded.list_active(), vec!["beta"]);
    }

    #[test]
    fn recreate_archived_namespace_reactivates() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = NamespaceManifest::load(dir.path()).unwrap();
        manifest.create("gamma", now()).unwrap();
        manifest.archive("gamma", now()).unwrap();
        manifest.create("gamma", now()).unwrap();
        assert_eq!(
            manifest.get("gamma").unwrap().status,
            NamespaceStatus::Active
        );
        assert!(manifest.get("gamma").unwrap().archived_at.is_none());
    }

    #[test]
    fn archive_unknown_namespace_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = NamespaceManifest::load(dir.path()).unwrap();
        assert!(manifest.archive("nope", now()).is_err());
    }

    #[test]
    fn namespace_workspace_nests_under_namespaces_dir() {
        let path = namespace_workspace(Path::new("/ws"), "alpha");
        assert_eq!(path, PathBuf::from("/ws/namespaces/alpha"));
    }
}
