use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::saving;

/// Who uploaded a bucket file, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub owner: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Storage of `(version, filename) -> Ownership`
///
/// Handlers only see this trait; the backing store can be swapped without
/// touching the merge and search code.
pub trait OwnershipStore: Send + Sync {
    fn record(&self, version: &str, filename: &str, owner: &str) -> Result<Ownership>;

    fn owner_of(&self, version: &str, filename: &str) -> Result<Option<Ownership>>;

    /// Drop a record; returns the removed entry, if there was one.
    fn remove(&self, version: &str, filename: &str) -> Result<Option<Ownership>>;

    /// Records of one version, keyed by filename.
    fn list(&self, version: &str) -> Result<BTreeMap<String, Ownership>>;
}

// version -> filename -> record
type OwnershipMap = HashMap<String, BTreeMap<String, Ownership>>;

fn poisoned() -> Error {
    Error::Io(std::io::Error::other("ownership store lock poisoned"))
}

/// In-process store; records vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<OwnershipMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl OwnershipStore for MemoryStore {
    fn record(&self, version: &str, filename: &str, owner: &str) -> Result<Ownership> {
        let entry = Ownership {
            owner: owner.to_string(),
            uploaded_at: Utc::now(),
        };
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records
            .entry(version.to_string())
            .or_default()
            .insert(filename.to_string(), entry.clone());
        Ok(entry)
    }

    fn owner_of(&self, version: &str, filename: &str) -> Result<Option<Ownership>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(version).and_then(|files| files.get(filename)).cloned())
    }

    fn remove(&self, version: &str, filename: &str) -> Result<Option<Ownership>> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records
            .get_mut(version)
            .and_then(|files| files.remove(filename)))
    }

    fn list(&self, version: &str) -> Result<BTreeMap<String, Ownership>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(version).cloned().unwrap_or_default())
    }
}

/// Store backed by one JSON file
///
/// The whole map is kept in memory and rewritten on every change; writes go
/// through a temp file so a crash never leaves a truncated file behind. The
/// in-memory map only changes once the file has been written.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<OwnershipMap>,
}

impl JsonFileStore {
    /// Open the store, starting empty when the file does not exist yet
    ///
    /// # Errors
    /// * I/O errors reading an existing file and JSON errors parsing it
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                OwnershipMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            OwnershipMap::new()
        };

        Ok(JsonFileStore {
            path,
            records: RwLock::new(records),
        })
    }

    fn persist(&self, records: &OwnershipMap) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        saving::write_atomic(&self.path, json.as_bytes())
    }
}

impl OwnershipStore for JsonFileStore {
    fn record(&self, version: &str, filename: &str, owner: &str) -> Result<Ownership> {
        let entry = Ownership {
            owner: owner.to_string(),
            uploaded_at: Utc::now(),
        };
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let mut next = records.clone();
        next.entry(version.to_string())
            .or_default()
            .insert(filename.to_string(), entry.clone());
        self.persist(&next)?;
        *records = next;
        Ok(entry)
    }

    fn owner_of(&self, version: &str, filename: &str) -> Result<Option<Ownership>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(version).and_then(|files| files.get(filename)).cloned())
    }

    fn remove(&self, version: &str, filename: &str) -> Result<Option<Ownership>> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let mut next = records.clone();
        let removed = next
            .get_mut(version)
            .and_then(|files| files.remove(filename));
        if removed.is_some() {
            self.persist(&next)?;
            *records = next;
        }
        Ok(removed)
    }

    fn list(&self, version: &str) -> Result<BTreeMap<String, Ownership>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(version).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn OwnershipStore) {
        store.record("ver1", "a.xlsx", "10.0.0.1").unwrap();
        store.record("ver1", "b.xlsx", "10.0.0.2").unwrap();
        store.record("ver2", "a.xlsx", "10.0.0.3").unwrap();

        assert_eq!(
            store.owner_of("ver1", "a.xlsx").unwrap().unwrap().owner,
            "10.0.0.1"
        );
        assert_eq!(
            store.owner_of("ver2", "a.xlsx").unwrap().unwrap().owner,
            "10.0.0.3"
        );
        assert!(store.owner_of("ver1", "c.xlsx").unwrap().is_none());

        let listed: Vec<_> = store.list("ver1").unwrap().into_keys().collect();
        assert_eq!(listed, vec!["a.xlsx", "b.xlsx"]);

        assert!(store.remove("ver1", "a.xlsx").unwrap().is_some());
        assert!(store.remove("ver1", "a.xlsx").unwrap().is_none());
        assert!(store.owner_of("ver1", "a.xlsx").unwrap().is_none());
    }

    #[test]
    fn memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("owners.json");

        exercise(&JsonFileStore::open(&path).unwrap());

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.owner_of("ver1", "b.xlsx").unwrap().unwrap().owner,
            "10.0.0.2"
        );
        assert!(reopened.owner_of("ver1", "a.xlsx").unwrap().is_none());
    }

    #[test]
    fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("owners.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(Error::Json(_))));
    }

    #[test]
    fn failed_write_leaves_the_map_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db");
        let store = JsonFileStore::open(db.join("owners.json")).unwrap();
        store.record("ver1", "kept.xlsx", "10.0.0.1").unwrap();

        // A plain file where the store's directory should be
        std::fs::remove_dir_all(&db).unwrap();
        std::fs::write(&db, b"").unwrap();

        assert!(store.record("ver1", "new.xlsx", "10.0.0.2").is_err());
        assert!(store.owner_of("ver1", "new.xlsx").unwrap().is_none());

        assert!(store.remove("ver1", "kept.xlsx").is_err());
        assert_eq!(
            store.owner_of("ver1", "kept.xlsx").unwrap().unwrap().owner,
            "10.0.0.1"
        );
    }
}
