//! Batch record persistence.
//!
//! [`BatchRecordStore`] owns the key layout on top of a [`KeyValueStore`]:
//!
//! | Key | Contents |
//! |-----|----------|
//! | `daggerheart_custom_cards_index` | [`CatalogIndex`] |
//! | `daggerheart_custom_cards_batch_<id>` | [`BatchRecord`] |
//! | `daggerheart_custom_cards_schema_version` | schema stamp (see `migration`) |
//!
//! Callers order their writes: a batch record is saved before the index entry
//! that references it, so a failed save never leaves a dangling index entry.
//! Drift introduced from outside is detected by [`BatchRecordStore::validate_integrity`]
//! and repaired only through [`BatchRecordStore::cleanup_orphaned_data`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{CatalogError, Result};
use super::kv::KeyValueStore;
use super::types::{BatchRecord, CatalogIndex};

// ============================================================================
// Constants
// ============================================================================

/// Prefix shared by every key the catalog owns.
pub const STORAGE_PREFIX: &str = "daggerheart_custom_cards";

/// Key of the index record.
pub const INDEX_KEY: &str = "daggerheart_custom_cards_index";

/// Prefix of per-batch record keys.
pub const BATCH_KEY_PREFIX: &str = "daggerheart_custom_cards_batch_";

/// Key of the schema version stamp.
pub const SCHEMA_VERSION_KEY: &str = "daggerheart_custom_cards_schema_version";

/// Default storage quota (the usual 5 MiB local-storage budget).
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

// ============================================================================
// Reports
// ============================================================================

/// Storage usage of catalog-owned keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub index_bytes: u64,
    pub batch_bytes: u64,
    pub batch_count: usize,
    pub quota_bytes: u64,
}

impl StorageUsage {
    /// Bytes left before the quota is reached.
    pub fn available_bytes(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }

    /// Fraction of the quota in use.
    pub fn usage_ratio(&self) -> f64 {
        if self.quota_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.quota_bytes as f64
        }
    }
}

/// Result of cross-referencing the index against stored batch keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Stored batch keys with no index entry.
    pub orphaned_keys: Vec<String>,
    /// Indexed batch ids with no stored record.
    pub missing_batches: Vec<String>,
    /// Indexed batch ids whose record cannot be parsed.
    pub corrupted_batches: Vec<String>,
    /// Index totals disagree with its batch mirrors.
    pub index_mismatch: bool,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.orphaned_keys.is_empty()
            && self.missing_batches.is_empty()
            && self.corrupted_batches.is_empty()
            && !self.index_mismatch
    }
}

/// What [`BatchRecordStore::cleanup_orphaned_data`] changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub removed_keys: Vec<String>,
    /// Index entries dropped because their record was missing.
    pub repaired_batches: Vec<String>,
    pub freed_bytes: u64,
}

// ============================================================================
// BatchRecordStore
// ============================================================================

/// Index and batch persistence with quota accounting.
#[derive(Clone)]
pub struct BatchRecordStore {
    kv: Arc<dyn KeyValueStore>,
    quota_bytes: u64,
}

impl BatchRecordStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, quota_bytes: u64) -> Self {
        Self { kv, quota_bytes }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Storage key of a batch record.
    pub fn batch_key(id: &str) -> String {
        format!("{}{}", BATCH_KEY_PREFIX, id)
    }

    // ========================================================================
    // Index
    // ========================================================================

    /// Load the index; a missing index is an empty one.
    pub fn load_index(&self) -> Result<CatalogIndex> {
        match self.kv.get(INDEX_KEY)? {
            None => Ok(CatalogIndex::default()),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| CatalogError::corrupted(INDEX_KEY, e.to_string())),
        }
    }

    /// Whether an index record exists at all.
    pub fn has_index(&self) -> Result<bool> {
        Ok(self.kv.get(INDEX_KEY)?.is_some())
    }

    pub fn save_index(&self, index: &CatalogIndex) -> Result<()> {
        let raw = serde_json::to_string(index)?;
        self.kv.set(INDEX_KEY, &raw)?;
        tracing::debug!(
            batches = index.total_batches,
            cards = index.total_cards,
            "saved catalog index"
        );
        Ok(())
    }

    // ========================================================================
    // Batches
    // ========================================================================

    /// Persist a batch record, returning the bytes written.
    ///
    /// Rejects with [`CatalogError::StorageQuota`] before writing anything if
    /// the projected usage exceeds the quota.
    pub fn save_batch(&self, id: &str, record: &BatchRecord) -> Result<u64> {
        let key = Self::batch_key(id);
        let raw = serde_json::to_string(record)?;
        let required = (key.len() + raw.len()) as u64;

        let usage = self.calculate_storage_usage()?;
        let existing = self
            .kv
            .value_size(&key)?
            .map(|size| size + key.len() as u64)
            .unwrap_or(0);
        let projected = usage.used_bytes.saturating_sub(existing) + required;

        if projected > self.quota_bytes {
            log::warn!(
                "Refusing to save batch {}: {} bytes needed, {} of {} in use",
                id,
                required,
                usage.used_bytes,
                self.quota_bytes
            );
            return Err(CatalogError::StorageQuota {
                current: usage.used_bytes,
                required,
                quota: self.quota_bytes,
            });
        }

        self.kv.set(&key, &raw)?;
        tracing::debug!(batch_id = %id, bytes = raw.len(), "saved batch record");
        Ok(raw.len() as u64)
    }

    /// Load a batch record.
    ///
    /// Missing records yield `Ok(None)`; unparsable or mislabelled records
    /// yield [`CatalogError::Corrupted`].
    pub fn load_batch(&self, id: &str) -> Result<Option<BatchRecord>> {
        let key = Self::batch_key(id);
        let Some(raw) = self.kv.get(&key)? else {
            return Ok(None);
        };
        let record: BatchRecord =
            serde_json::from_str(&raw).map_err(|e| CatalogError::corrupted(&key, e.to_string()))?;
        if record.metadata.id != id {
            return Err(CatalogError::corrupted(
                &key,
                format!("record claims id '{}'", record.metadata.id),
            ));
        }
        Ok(Some(record))
    }

    pub fn remove_batch(&self, id: &str) -> Result<()> {
        self.kv.remove(&Self::batch_key(id))?;
        tracing::debug!(batch_id = %id, "removed batch record");
        Ok(())
    }

    /// Ids of every stored batch record, indexed or not.
    pub fn list_batch_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .kv
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(BATCH_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    // ========================================================================
    // Quota
    // ========================================================================

    pub fn calculate_storage_usage(&self) -> Result<StorageUsage> {
        let mut usage = StorageUsage {
            quota_bytes: self.quota_bytes,
            ..Default::default()
        };

        for key in self.kv.keys()? {
            if !key.starts_with(STORAGE_PREFIX) {
                continue;
            }
            let bytes = self.kv.value_size(&key)?.unwrap_or(0) + key.len() as u64;
            usage.used_bytes += bytes;
            if key == INDEX_KEY {
                usage.index_bytes += bytes;
            } else if key.starts_with(BATCH_KEY_PREFIX) {
                usage.batch_bytes += bytes;
                usage.batch_count += 1;
            }
        }

        Ok(usage)
    }

    /// Whether `required_bytes` more would still fit under the quota.
    pub fn check_storage_space(&self, required_bytes: u64) -> Result<bool> {
        let usage = self.calculate_storage_usage()?;
        Ok(usage.used_bytes + required_bytes <= self.quota_bytes)
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    pub fn validate_integrity(&self) -> Result<IntegrityReport> {
        let index = self.load_index()?;
        let stored: HashSet<String> = self.list_batch_ids()?.into_iter().collect();
        let mut report = IntegrityReport {
            index_mismatch: !index.totals_consistent(),
            ..Default::default()
        };

        let mut orphaned: Vec<String> = stored
            .iter()
            .filter(|id| !index.batches.contains_key(id.as_str()))
            .map(|id| Self::batch_key(id))
            .collect();
        orphaned.sort();
        report.orphaned_keys = orphaned;

        for id in index.batches.keys() {
            if !stored.contains(id) {
                report.missing_batches.push(id.clone());
                continue;
            }
            if let Err(e) = self.load_batch(id) {
                log::warn!("Batch {} failed integrity check: {}", id, e);
                report.corrupted_batches.push(id.clone());
            }
        }

        if !report.is_healthy() {
            log::warn!(
                "Integrity check: {} orphaned, {} missing, {} corrupted, index mismatch: {}",
                report.orphaned_keys.len(),
                report.missing_batches.len(),
                report.corrupted_batches.len(),
                report.index_mismatch
            );
        }

        Ok(report)
    }

    /// Remove orphaned batch keys and drop index entries whose record is gone.
    ///
    /// Correctly indexed records (including corrupted ones) are left alone.
    pub fn cleanup_orphaned_data(&self) -> Result<CleanupReport> {
        let report = self.validate_integrity()?;
        let mut cleanup = CleanupReport::default();

        for key in &report.orphaned_keys {
            let freed = self.kv.value_size(key)?.unwrap_or(0) + key.len() as u64;
            self.kv.remove(key)?;
            cleanup.freed_bytes += freed;
            cleanup.removed_keys.push(key.clone());
        }

        if !report.missing_batches.is_empty() || report.index_mismatch {
            let mut index = self.load_index()?;
            for id in &report.missing_batches {
                index.batches.shift_remove(id);
                cleanup.repaired_batches.push(id.clone());
            }
            index.recompute_totals();
            self.save_index(&index)?;
        }

        log::info!(
            "Cleanup removed {} orphaned key(s), repaired {} index entr(ies), freed {} bytes",
            cleanup.removed_keys.len(),
            cleanup.repaired_batches.len(),
            cleanup.freed_bytes
        );

        Ok(cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::kv::MemoryKeyValueStore;
    use crate::core::catalog::types::{BatchInfo, BatchMetadata, Card, CardType};
    use chrono::Utc;

    fn record(id: &str, cards: usize) -> BatchRecord {
        BatchRecord {
            metadata: BatchMetadata {
                id: id.to_string(),
                name: format!("Pack {}", id),
                file_name: format!("{}.json", id),
                import_time: Utc::now(),
                version: None,
                description: None,
                author: None,
            },
            cards: (0..cards)
                .map(|i| Card::new(format!("{}-{}", id, i), "Card", CardType::Domain))
                .collect(),
            custom_field_definitions: None,
            variant_types: None,
        }
    }

    fn store_with_quota(quota: u64) -> (Arc<MemoryKeyValueStore>, BatchRecordStore) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = BatchRecordStore::new(kv.clone(), quota);
        (kv, store)
    }

    fn index_batch(store: &BatchRecordStore, rec: &BatchRecord) {
        let size = store.save_batch(&rec.metadata.id, rec).unwrap();
        let mut index = store.load_index().unwrap();
        index
            .batches
            .insert(rec.metadata.id.clone(), BatchInfo::from_record(rec, size));
        index.recompute_totals();
        store.save_index(&index).unwrap();
    }

    // -------------------------------------------------------------------------
    // Index and batch roundtrip
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_index_is_empty() {
        let (_, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        let index = store.load_index().unwrap();
        assert!(index.batches.is_empty());
        assert!(!store.has_index().unwrap());
    }

    #[test]
    fn test_save_and_load_batch() {
        let (_, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        let rec = record("b1", 3);
        store.save_batch("b1", &rec).unwrap();

        let loaded = store.load_batch("b1").unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(store.list_batch_ids().unwrap(), vec!["b1"]);
        assert!(store.load_batch("missing").unwrap().is_none());
    }

    #[test]
    fn test_corrupted_batch_is_typed_error() {
        let (kv, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        kv.set(&BatchRecordStore::batch_key("bad"), "{not json").unwrap();
        let err = store.load_batch("bad").unwrap_err();
        assert!(matches!(err, CatalogError::Corrupted { .. }));
    }

    #[test]
    fn test_mislabelled_batch_is_corrupted() {
        let (kv, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        let raw = serde_json::to_string(&record("other", 1)).unwrap();
        kv.set(&BatchRecordStore::batch_key("b1"), &raw).unwrap();
        assert!(matches!(
            store.load_batch("b1"),
            Err(CatalogError::Corrupted { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // Quota
    // -------------------------------------------------------------------------

    #[test]
    fn test_save_batch_rejects_over_quota_without_write() {
        let (kv, store) = store_with_quota(300);
        let err = store.save_batch("big", &record("big", 20)).unwrap_err();
        assert!(matches!(err, CatalogError::StorageQuota { quota: 300, .. }));
        assert!(kv.snapshot().is_empty());
    }

    #[test]
    fn test_overwrite_does_not_double_count() {
        let rec = record("b1", 2);
        let size = serde_json::to_string(&rec).unwrap().len() as u64;
        let key_len = BatchRecordStore::batch_key("b1").len() as u64;
        let (_, store) = store_with_quota(size + key_len + 5);

        store.save_batch("b1", &rec).unwrap();
        store.save_batch("b1", &rec).unwrap();
    }

    #[test]
    fn test_storage_usage_counts_only_catalog_keys() {
        let (kv, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        kv.set("unrelated_app_key", "xxxxxxxxxxxxxxxx").unwrap();
        index_batch(&store, &record("b1", 1));

        let usage = store.calculate_storage_usage().unwrap();
        assert_eq!(usage.batch_count, 1);
        assert!(usage.index_bytes > 0);
        assert_eq!(usage.used_bytes, usage.index_bytes + usage.batch_bytes);
        assert!(store.check_storage_space(1024).unwrap());
        assert!(!store.check_storage_space(DEFAULT_QUOTA_BYTES).unwrap());
    }

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------

    #[test]
    fn test_integrity_healthy() {
        let (_, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        index_batch(&store, &record("b1", 2));
        index_batch(&store, &record("b2", 1));
        assert!(store.validate_integrity().unwrap().is_healthy());
    }

    #[test]
    fn test_integrity_reports_each_problem_kind() {
        let (kv, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        index_batch(&store, &record("kept", 1));
        index_batch(&store, &record("missing", 1));
        index_batch(&store, &record("broken", 1));

        store.save_batch("orphan", &record("orphan", 1)).unwrap();
        kv.remove(&BatchRecordStore::batch_key("missing")).unwrap();
        kv.set(&BatchRecordStore::batch_key("broken"), "[]").unwrap();

        let report = store.validate_integrity().unwrap();
        assert_eq!(report.orphaned_keys, vec![BatchRecordStore::batch_key("orphan")]);
        assert_eq!(report.missing_batches, vec!["missing"]);
        assert_eq!(report.corrupted_batches, vec!["broken"]);
        assert!(!report.index_mismatch);
        assert!(!report.is_healthy());
    }

    #[test]
    fn test_cleanup_removes_orphans_and_repairs_index() {
        let (kv, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        index_batch(&store, &record("kept", 2));
        index_batch(&store, &record("missing", 3));
        store.save_batch("orphan", &record("orphan", 1)).unwrap();
        kv.remove(&BatchRecordStore::batch_key("missing")).unwrap();

        let cleanup = store.cleanup_orphaned_data().unwrap();
        assert_eq!(cleanup.removed_keys, vec![BatchRecordStore::batch_key("orphan")]);
        assert_eq!(cleanup.repaired_batches, vec!["missing"]);
        assert!(cleanup.freed_bytes > 0);

        let index = store.load_index().unwrap();
        assert_eq!(index.total_batches, 1);
        assert_eq!(index.total_cards, 2);
        assert!(store.load_batch("kept").unwrap().is_some());
        assert!(store.validate_integrity().unwrap().is_healthy());
    }

    #[test]
    fn test_cleanup_leaves_corrupted_indexed_data() {
        let (kv, store) = store_with_quota(DEFAULT_QUOTA_BYTES);
        index_batch(&store, &record("broken", 1));
        kv.set(&BatchRecordStore::batch_key("broken"), "garbage").unwrap();

        let cleanup = store.cleanup_orphaned_data().unwrap();
        assert!(cleanup.removed_keys.is_empty());
        assert_eq!(
            kv.get(&BatchRecordStore::batch_key("broken")).unwrap().as_deref(),
            Some("garbage")
        );
    }
}
