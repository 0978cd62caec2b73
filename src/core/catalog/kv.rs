//! Key/value persistence medium.
//!
//! [`KeyValueStore`] is the seam between the catalog and whatever holds its
//! records. Two backends ship with the crate:
//!
//! - [`MemoryKeyValueStore`]: process-local map, optionally size-limited
//! - [`FileKeyValueStore`]: one file per key under a data directory
//!
//! The backend is picked when the [`CardManager`](super::manager::CardManager)
//! is constructed; nothing in the catalog inspects its environment per call.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::error::{CatalogError, Result};

/// Synchronous, best-effort string store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Missing keys yield `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Enumerate every stored key.
    fn keys(&self) -> Result<Vec<String>>;

    /// Size in bytes of the stored value, if present.
    fn value_size(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.get(key)?.map(|v| v.len() as u64))
    }
}

// ============================================================================
// MemoryKeyValueStore
// ============================================================================

/// In-memory store used outside the browser and in tests.
///
/// With a capacity set, writes that would push the total size (keys plus
/// values) past it fail with [`CatalogError::StorageWrite`], the same way a
/// full local-storage area rejects writes.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, String>>,
    capacity_bytes: Option<u64>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses writes beyond `capacity_bytes`.
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity_bytes: Some(capacity_bytes),
        }
    }

    /// Total bytes held (keys plus values).
    pub fn used_bytes(&self) -> u64 {
        self.entries
            .read()
            .map(|e| e.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
            .unwrap_or(0)
    }

    /// Copy of the raw contents, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CatalogError::storage_read(key, "store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CatalogError::storage_write(key, "store lock poisoned"))?;

        if let Some(capacity) = self.capacity_bytes {
            let current: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            let projected = current + (key.len() + value.len()) as u64;
            if projected > capacity {
                return Err(CatalogError::storage_write(
                    key,
                    format!("capacity of {} bytes exceeded ({} bytes)", capacity, projected),
                ));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CatalogError::storage_write(key, "store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CatalogError::storage_read("*", "store lock poisoned"))?;
        Ok(entries.keys().cloned().collect())
    }
}

// ============================================================================
// FileKeyValueStore
// ============================================================================

/// Extension of record files.
const RECORD_EXTENSION: &str = "json";

/// File-backed store: `<dir>/<hex(key)>.json`.
///
/// Keys are hex-encoded so any key string maps to a portable file name.
/// Writes go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        log::debug!("Opened file key/value store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(key.as_bytes()), RECORD_EXTENSION))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CatalogError::storage_read(key, e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value).map_err(|e| CatalogError::storage_write(key, e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            CatalogError::storage_write(key, e.to_string())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CatalogError::storage_write(key, e.to_string())),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(key) = Self::key_for(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn value_size(&self, key: &str) -> Result<Option<u64>> {
        match fs::metadata(self.path_for(key)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CatalogError::storage_read(key, e.to_string())),
        }
    }
}
