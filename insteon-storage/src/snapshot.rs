//! Gateway snapshot storage.

use crate::error::StorageError;
use crate::index::{write_atomic, SnapshotIndex, SnapshotMeta};
use insteon_core::NodeSnapshot;
use std::fs;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "index.json";

/// Stores the latest snapshot of each gateway as `<gateway>.json`.
pub struct SnapshotStore {
    dir: PathBuf,
    index: SnapshotIndex,
}

impl SnapshotStore {
    /// Opens or creates a snapshot store at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let index = SnapshotIndex::open(dir.join(INDEX_FILE))?;
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the snapshot of `gateway`, replacing the previous one.
    ///
    /// On failure the previous file is left untouched.
    pub fn save(
        &self,
        gateway: &str,
        snapshot: &NodeSnapshot,
    ) -> Result<SnapshotMeta, StorageError> {
        let file = file_name(gateway)?;
        let data = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.dir.join(&file), &data)?;

        let meta = SnapshotMeta::new(gateway, file, &data);
        self.index.insert(meta.clone())?;

        tracing::info!(
            "Saved snapshot of {} ({} devices, {} bytes)",
            gateway,
            snapshot.devices.len(),
            meta.size_bytes
        );
        Ok(meta)
    }

    /// Loads the snapshot of `gateway`, or `None` if it was never saved.
    pub fn load(&self, gateway: &str) -> Result<Option<NodeSnapshot>, StorageError> {
        let file = file_name(gateway)?;
        let path = self.dir.join(&file);
        let meta = self.index.get(gateway);
        if !path.exists() {
            return match meta {
                Some(_) => Err(StorageError::SnapshotNotFound(file)),
                None => Ok(None),
            };
        }

        let data = fs::read(&path)?;
        match &meta {
            Some(meta) => meta.verify(&data)?,
            None => tracing::warn!("Snapshot {} has no index entry, loading unverified", file),
        }
        Ok(Some(serde_json::from_slice(&data)?))
    }

    pub fn meta(&self, gateway: &str) -> Option<SnapshotMeta> {
        self.index.get(gateway)
    }

    /// Lists metadata of every saved gateway.
    pub fn list(&self) -> Vec<SnapshotMeta> {
        self.index.list()
    }

    /// Deletes the snapshot of `gateway`.
    pub fn delete(&self, gateway: &str) -> Result<(), StorageError> {
        let path = self.dir.join(file_name(gateway)?);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.index.remove(gateway)?;
        Ok(())
    }
}

/// Snapshot file name of a gateway. Names that could escape the store
/// directory are rejected.
fn file_name(gateway: &str) -> Result<String, StorageError> {
    let valid = !gateway.is_empty()
        && gateway != "index"
        && !gateway.starts_with('.')
        && gateway
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(StorageError::InvalidName(gateway.to_string()));
    }
    Ok(format!("{gateway}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> NodeSnapshot {
        let mut device = NodeSnapshot::default();
        device.attributes.set_u8("dev_cat", 2);
        device
            .aldb
            .insert("0FFF".to_string(), "E201AABBCC012041".to_string());

        let mut gateway = NodeSnapshot::default();
        gateway
            .aldb
            .insert("0001".to_string(), "E201112233012041".to_string());
        gateway.devices.insert("112233".to_string(), device);
        gateway
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let meta = store.save("home", &sample()).unwrap();
        assert_eq!(meta.file, "home.json");
        assert_eq!(store.meta("home"), Some(meta));

        let loaded = store.load("home").unwrap().unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.load("home").unwrap().is_none());

        store.save("home", &sample()).unwrap();
        fs::remove_file(dir.path().join("home.json")).unwrap();
        assert!(matches!(
            store.load("home"),
            Err(StorageError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = SnapshotStore::open(dir.path()).unwrap();
            store.save("home", &sample()).unwrap();
            store.save("barn", &NodeSnapshot::default()).unwrap();
        }
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.load("home").unwrap().unwrap(), sample());
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.save("home", &sample()).unwrap();

        let path = dir.path().join("home.json");
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 2;
        data[last] ^= 0x01;
        fs::write(&path, &data).unwrap();

        assert!(matches!(store.load("home"), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_unindexed_file_loads() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("home.json"),
            serde_json::to_vec(&sample()).unwrap(),
        )
        .unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(store.load("home").unwrap().unwrap(), sample());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.save("home", &sample()).unwrap();
        store.save("home", &NodeSnapshot::default()).unwrap();

        assert_eq!(store.list().len(), 1);
        assert_eq!(store.load("home").unwrap().unwrap(), NodeSnapshot::default());
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.save("home", &sample()).unwrap();
        store.delete("home").unwrap();

        assert!(store.meta("home").is_none());
        assert!(store.load("home").unwrap().is_none());
    }

    #[test]
    fn test_invalid_names() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        for name in ["", "../etc", "a/b", ".hidden", "index"] {
            assert!(
                matches!(store.save(name, &sample()), Err(StorageError::InvalidName(_))),
                "{name}"
            );
        }
        assert!(store.save("plm-1_main", &sample()).is_ok());
    }
}
