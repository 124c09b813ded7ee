//! Activation state store.
//!
//! Status and installed version of every addon live in one TOML file
//! under the runtime directory. Package descriptors are never rewritten.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::types::{AddonStatus, PackageKind};

/// State store failures.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error on state file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state file {} is corrupt: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persisted facts about one addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonRecord {
    pub status: AddonStatus,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_kind")]
    pub kind: PackageKind,
    pub updated_at: DateTime<Utc>,
}

fn default_kind() -> PackageKind {
    PackageKind::Addon
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    addons: BTreeMap<String, AddonRecord>,
}

/// TOML-backed map of addon name to [`AddonRecord`].
///
/// Every mutation rewrites the whole file through a temporary sibling
/// and a rename.
#[derive(Debug, Clone)]
pub struct ActivationStore {
    path: PathBuf,
}

impl ActivationStore {
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StateFile, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateFile::default()),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|e| StateError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn write(&self, state: &StateFile) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(state)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn update<F>(&self, name: &str, apply: F) -> Result<AddonRecord, StateError>
    where
        F: FnOnce(Option<AddonRecord>) -> AddonRecord,
    {
        let mut state = self.read()?;
        let record = apply(state.addons.remove(name));
        state.addons.insert(name.to_string(), record.clone());
        self.write(&state)?;
        debug!("[ADDON-STATE] {} -> {:?}", name, record.status);
        Ok(record)
    }

    /// Returns the record of `name`, if any.
    pub fn record(&self, name: &str) -> Result<Option<AddonRecord>, StateError> {
        Ok(self.read()?.addons.remove(name))
    }

    /// Returns the status of `name`; unknown addons count as disabled.
    pub fn status(&self, name: &str) -> Result<AddonStatus, StateError> {
        Ok(self
            .record(name)?
            .map_or(AddonStatus::Disabled, |r| r.status))
    }

    /// Returns true when `name` is recorded as enabled.
    pub fn is_enabled(&self, name: &str) -> Result<bool, StateError> {
        Ok(self.status(name)? == AddonStatus::Enabled)
    }

    /// Sets the status of `name`, creating the record if needed.
    pub fn set_status(&self, name: &str, status: AddonStatus) -> Result<AddonRecord, StateError> {
        self.update(name, |existing| AddonRecord {
            status,
            updated_at: Utc::now(),
            ..existing.unwrap_or_else(|| blank_record(PackageKind::Addon))
        })
    }

    /// Records the installed version and kind of `name`.
    pub fn set_version(
        &self,
        name: &str,
        kind: PackageKind,
        version: &str,
    ) -> Result<AddonRecord, StateError> {
        self.update(name, |existing| AddonRecord {
            version: version.to_string(),
            kind,
            updated_at: Utc::now(),
            ..existing.unwrap_or_else(|| blank_record(kind))
        })
    }

    /// Drops the record of `name`. Returns whether one existed.
    pub fn forget(&self, name: &str) -> Result<bool, StateError> {
        let mut state = self.read()?;
        if state.addons.remove(name).is_none() {
            return Ok(false);
        }
        self.write(&state)?;
        Ok(true)
    }

    /// Every record, ordered by name.
    pub fn all(&self) -> Result<BTreeMap<String, AddonRecord>, StateError> {
        Ok(self.read()?.addons)
    }
}

fn blank_record(kind: PackageKind) -> AddonRecord {
    AddonRecord {
        status: AddonStatus::Disabled,
        version: String::new(),
        kind,
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_addon_is_disabled() {
        let dir = TempDir::new().expect("temp dir");
        let store = ActivationStore::new(&dir.path().join("state.toml"));
        assert_eq!(store.status("demo").expect("status"), AddonStatus::Disabled);
        assert!(store.all().expect("all").is_empty());
    }

    #[test]
    fn test_status_and_version_merge() {
        let dir = TempDir::new().expect("temp dir");
        let store = ActivationStore::new(&dir.path().join("runtime").join("state.toml"));

        store
            .set_version("demo", PackageKind::Module, "1.0.0")
            .expect("version");
        store.set_status("demo", AddonStatus::Enabled).expect("status");

        let record = store.record("demo").expect("read").expect("exists");
        assert_eq!(record.status, AddonStatus::Enabled);
        assert_eq!(record.version, "1.0.0");
        assert_eq!(record.kind, PackageKind::Module);
        assert!(store.is_enabled("demo").expect("enabled"));
    }

    #[test]
    fn test_forget() {
        let dir = TempDir::new().expect("temp dir");
        let store = ActivationStore::new(&dir.path().join("state.toml"));
        store.set_status("demo", AddonStatus::Enabled).expect("status");

        assert!(store.forget("demo").expect("forget"));
        assert!(!store.forget("demo").expect("forget again"));
        assert!(store.record("demo").expect("read").is_none());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("state.toml");
        fs::write(&path, "addons = 3 = 4").expect("write");
        let store = ActivationStore::new(&path);
        assert!(matches!(store.status("demo"), Err(StateError::Parse { .. })));
    }
}
