//! Whole-collection JSON snapshots with atomic replace.

use fleetgate_core::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Writes and reads complete collection snapshots under one directory.
///
/// Each collection is a single pretty-printed JSON file. Writes go to a
/// `.tmp` sibling first and are renamed into place, so readers never observe
/// a torn file even if the process dies mid-write.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open a snapshot store rooted at `dir`, creating the directory if
    /// needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Persistence(format!("Failed to create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Directory the snapshots live in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load a collection snapshot. A missing file is an empty collection,
    /// not an error.
    pub async fn load<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Persistence(format!("Corrupt snapshot {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(Error::Persistence(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Replace a collection snapshot atomically.
    pub async fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));

        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::Persistence(format!("Failed to serialize {name}: {e}")))?;

        tokio::fs::write(&tmp, &json).await.map_err(|e| {
            Error::Persistence(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            Error::Persistence(format!("Failed to replace {}: {e}", path.display()))
        })?;
        Ok(())
    }
}
