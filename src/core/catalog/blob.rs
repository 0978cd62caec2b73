//! Binary object storage for imported card images.
//!
//! Blobs are keyed by card id and live in a [`BlobTable`]: `Real` holds images
//! that belong to imported batches, `Editor` is scratch space for a card
//! editor and is never touched by the import/removal pipelines.
//!
//! Rendering code does not hold blobs directly; it holds URL handles minted by
//! an [`ObjectUrlFactory`]. Every minted handle pins its bytes until it is
//! revoked, which is why the [`ImageCache`](super::image_cache::ImageCache)
//! revokes on eviction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::{CatalogError, Result};

// ============================================================================
// BlobTable / BlobRecord
// ============================================================================

/// Table a blob store is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobTable {
    /// Images of imported batches.
    Real,
    /// Card-editor scratch images.
    Editor,
}

impl BlobTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Editor => "editor",
        }
    }
}

/// A stored image.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRecord {
    /// Card id.
    pub key: String,
    pub blob: Bytes,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl BlobRecord {
    pub fn new(
        key: impl Into<String>,
        blob: impl Into<Bytes>,
        mime_type: impl Into<String>,
    ) -> Self {
        let blob = blob.into();
        Self {
            key: key.into(),
            size: blob.len() as u64,
            blob,
            mime_type: mime_type.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// BlobStore trait
// ============================================================================

/// Async store of image blobs keyed by card id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Table this store is scoped to.
    fn table(&self) -> BlobTable;

    /// Fetch a blob. Missing keys yield `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<BlobRecord>>;

    /// Insert or replace a blob.
    async fn put(&self, record: BlobRecord) -> Result<()>;

    /// Delete a blob, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Every stored key.
    async fn keys(&self) -> Result<Vec<String>>;
}

// ============================================================================
// MemoryBlobStore
// ============================================================================

/// Process-local blob store.
#[derive(Debug)]
pub struct MemoryBlobStore {
    table: BlobTable,
    blobs: RwLock<HashMap<String, BlobRecord>>,
}

impl MemoryBlobStore {
    pub fn new(table: BlobTable) -> Self {
        Self {
            table,
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Store for imported-batch images.
    pub fn real() -> Self {
        Self::new(BlobTable::Real)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn table(&self) -> BlobTable {
        self.table
    }

    async fn get(&self, key: &str) -> Result<Option<BlobRecord>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put(&self, record: BlobRecord) -> Result<()> {
        self.blobs.write().await.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// FileBlobStore
// ============================================================================

/// Sidecar metadata written next to each blob file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobMeta {
    key: String,
    mime_type: String,
    size: u64,
    created_at: DateTime<Utc>,
}

/// File-backed blob store: `<root>/<table>/<hex(key)>.bin` plus a `.meta.json`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    table: BlobTable,
    dir: PathBuf,
}

impl FileBlobStore {
    pub async fn open(root: impl Into<PathBuf>, table: BlobTable) -> Result<Self> {
        let dir = root.into().join(table.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { table, dir })
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", hex::encode(key.as_bytes())))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", hex::encode(key.as_bytes())))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    fn table(&self) -> BlobTable {
        self.table
    }

    async fn get(&self, key: &str) -> Result<Option<BlobRecord>> {
        let meta_raw = match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CatalogError::blob(format!("read meta for '{}': {}", key, e))),
        };
        let meta: BlobMeta = serde_json::from_slice(&meta_raw)
            .map_err(|e| CatalogError::corrupted(key, e.to_string()))?;
        let data = tokio::fs::read(self.data_path(key))
            .await
            .map_err(|e| CatalogError::blob(format!("read blob '{}': {}", key, e)))?;

        Ok(Some(BlobRecord {
            key: meta.key,
            blob: Bytes::from(data),
            mime_type: meta.mime_type,
            size: meta.size,
            created_at: meta.created_at,
        }))
    }

    async fn put(&self, record: BlobRecord) -> Result<()> {
        let meta = BlobMeta {
            key: record.key.clone(),
            mime_type: record.mime_type.clone(),
            size: record.size,
            created_at: record.created_at,
        };
        tokio::fs::write(self.data_path(&record.key), &record.blob)
            .await
            .map_err(|e| CatalogError::blob(format!("write blob '{}': {}", record.key, e)))?;
        tokio::fs::write(self.meta_path(&record.key), serde_json::to_vec(&meta)?)
            .await
            .map_err(|e| CatalogError::blob(format!("write meta '{}': {}", record.key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = match tokio::fs::remove_file(self.meta_path(key)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(CatalogError::blob(format!("delete '{}': {}", key, e))),
        };
        match tokio::fs::remove_file(self.data_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CatalogError::blob(format!("delete '{}': {}", key, e))),
        }
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".meta.json") else { continue };
            if let Some(key) = hex::decode(stem).ok().and_then(|b| String::from_utf8(b).ok()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// ObjectUrlFactory
// ============================================================================

/// Mints and releases URL handles for blobs.
pub trait ObjectUrlFactory: Send + Sync {
    /// Create a handle that keeps `record`'s bytes reachable.
    fn create_url(&self, record: &BlobRecord) -> String;

    /// Release a handle. Unknown handles are ignored.
    fn revoke_url(&self, url: &str);
}

/// In-process handle registry: `blob:cardpacks/<uuid>` → bytes.
#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    live: Mutex<HashMap<String, Bytes>>,
    revoked: Mutex<Vec<String>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles not yet revoked.
    pub fn live_count(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.live.lock().map(|l| l.contains_key(url)).unwrap_or(false)
    }

    /// Handles revoked so far, oldest first.
    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Resolve a live handle to its bytes.
    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        self.live.lock().ok()?.get(url).cloned()
    }
}

impl ObjectUrlFactory for ObjectUrlRegistry {
    fn create_url(&self, record: &BlobRecord) -> String {
        let url = format!("blob:cardpacks/{}", Uuid::new_v4());
        if let Ok(mut live) = self.live.lock() {
            live.insert(url.clone(), record.blob.clone());
        }
        url
    }

    fn revoke_url(&self, url: &str) {
        let removed = self
            .live
            .lock()
            .map(|mut live| live.remove(url).is_some())
            .unwrap_or(false);
        if removed {
            if let Ok(mut revoked) = self.revoked.lock() {
                revoked.push(url.to_string());
            }
        }
    }
}
