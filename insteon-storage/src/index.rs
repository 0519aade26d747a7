//! Checksum index of stored snapshots.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Metadata recorded for the latest snapshot of a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub gateway: String,
    /// File name relative to the store directory.
    pub file: String,
    pub size_bytes: u64,
    /// crc32c of the file contents, as 8 hex digits.
    pub checksum: String,
    pub saved_at: DateTime<Utc>,
}

impl SnapshotMeta {
    pub fn new(gateway: &str, file: String, data: &[u8]) -> Self {
        Self {
            gateway: gateway.to_string(),
            file,
            size_bytes: data.len() as u64,
            checksum: checksum(data),
            saved_at: Utc::now(),
        }
    }

    /// Checks `data` against the recorded size and checksum.
    pub fn verify(&self, data: &[u8]) -> Result<(), StorageError> {
        if data.len() as u64 != self.size_bytes {
            return Err(StorageError::Corruption(format!(
                "snapshot {} is {} bytes, expected {}",
                self.file,
                data.len(),
                self.size_bytes
            )));
        }
        let actual = checksum(data);
        if actual != self.checksum {
            return Err(StorageError::Corruption(format!(
                "snapshot {} checksum mismatch: {} != {}",
                self.file, actual, self.checksum
            )));
        }
        Ok(())
    }
}

pub fn checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

/// Writes `data` next to `path` and renames it into place, so readers see
/// either the old contents or the new ones.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Snapshot metadata by gateway name, persisted as `index.json`.
pub struct SnapshotIndex {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, SnapshotMeta>>,
}

impl SnapshotIndex {
    /// Opens the index at `path`, starting empty when the file is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn get(&self, gateway: &str) -> Option<SnapshotMeta> {
        self.entries.read().get(gateway).cloned()
    }

    pub fn list(&self) -> Vec<SnapshotMeta> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Records `meta` and persists the index.
    pub fn insert(&self, meta: SnapshotMeta) -> Result<(), StorageError> {
        self.entries.write().insert(meta.gateway.clone(), meta);
        self.persist()
    }

    /// Forgets a gateway and persists the index.
    pub fn remove(&self, gateway: &str) -> Result<Option<SnapshotMeta>, StorageError> {
        let removed = self.entries.write().remove(gateway);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(&*self.entries.read())?;
        write_atomic(&self.path, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_meta_verify() {
        let meta = SnapshotMeta::new("home", "home.json".to_string(), b"{}");
        assert_eq!(meta.size_bytes, 2);
        assert!(meta.verify(b"{}").is_ok());
        assert!(matches!(meta.verify(b"[]"), Err(StorageError::Corruption(_))));
        assert!(matches!(meta.verify(b"{ }"), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_index_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        let index = SnapshotIndex::open(&path).unwrap();
        assert!(index.is_empty());
        index
            .insert(SnapshotMeta::new("home", "home.json".to_string(), b"abc"))
            .unwrap();
        index
            .insert(SnapshotMeta::new("barn", "barn.json".to_string(), b"abcd"))
            .unwrap();

        let reopened = SnapshotIndex::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("home"), index.get("home"));
        let names: Vec<_> = reopened.list().into_iter().map(|m| m.gateway).collect();
        assert_eq!(names, vec!["barn", "home"]);

        assert!(reopened.remove("barn").unwrap().is_some());
        assert!(reopened.remove("barn").unwrap().is_none());
        assert_eq!(SnapshotIndex::open(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("data.json.tmp").exists());
    }
}
