//! Catalog facade.
//!
//! [`CardManager`] owns the in-memory card state and the aggregation cache
//! behind a single `tokio::sync::RwLock`, so imports, removals and toggles
//! are serialized while reads run concurrently. Storage collaborators are
//! injected, which lets tests swap in memory or failing implementations.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::aggregation::{AggregationDiagnostic, AggregationEngine};
use super::blob::{BlobRecord, BlobStore, ObjectUrlFactory};
use super::convert::{CardConverter, StandardCardConverter};
use super::error::{CatalogError, Result};
use super::image_cache::{ImageCache, ImageCacheConfig};
use super::import::{ImportPipeline, ImportResult, ImportStage, RemovalResult};
use super::kv::KeyValueStore;
use super::migration::{MigrationManager, MigrationReport, CURRENT_SCHEMA_VERSION};
use super::state::UnifiedCardState;
use super::store::{
    BatchRecordStore, CleanupReport, IntegrityReport, StorageUsage, DEFAULT_QUOTA_BYTES,
};
use super::types::{
    Batch, Card, CardType, CustomFieldDefinitions, VariantTypeMap, SYSTEM_BATCH_ID,
};
use crate::core::assets::AssetLoader;

/// Default root for inferred image URLs.
pub const DEFAULT_IMAGE_BASE_PATH: &str = "/images";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub image_base_path: String,
    /// Persist the bundled cards as the system batch when absent.
    pub seed_builtin: bool,
    pub quota_bytes: u64,
    /// Resolve image handles for freshly imported cards.
    pub prewarm_after_import: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            image_base_path: DEFAULT_IMAGE_BASE_PATH.to_string(),
            seed_builtin: true,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            prewarm_after_import: true,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What [`CardManager::initialize`] found and did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitReport {
    pub migration: MigrationReport,
    pub loaded_batches: usize,
    /// Indexed batches whose records were missing or unreadable.
    pub skipped_batches: Vec<String>,
    pub seeded_builtin: bool,
    pub total_cards: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_cards: usize,
    pub visible_cards: usize,
    pub batch_count: usize,
    pub disabled_batches: usize,
    pub cards_by_type: BTreeMap<CardType, usize>,
    pub storage: StorageUsage,
}

// ============================================================================
// CardManager
// ============================================================================

struct Inner {
    state: UnifiedCardState,
    aggregation: AggregationEngine,
}

pub struct CardManager {
    store: BatchRecordStore,
    blobs: Arc<dyn BlobStore>,
    images: ImageCache,
    converter: Arc<dyn CardConverter>,
    config: CatalogConfig,
    inner: RwLock<Inner>,
}

impl CardManager {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        blobs: Arc<dyn BlobStore>,
        urls: Arc<dyn ObjectUrlFactory>,
        config: CatalogConfig,
        image_config: ImageCacheConfig,
    ) -> Self {
        Self {
            store: BatchRecordStore::new(kv, config.quota_bytes),
            images: ImageCache::new(blobs.clone(), urls, image_config),
            blobs,
            converter: Arc::new(StandardCardConverter),
            config,
            inner: RwLock::new(Inner {
                state: UnifiedCardState::new(),
                aggregation: AggregationEngine::new(),
            }),
        }
    }

    /// Replace the raw-to-standard card mapper.
    pub fn with_converter(mut self, converter: Arc<dyn CardConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn store(&self) -> &BatchRecordStore {
        &self.store
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Migrate storage, then (re)load every indexed batch into memory.
    ///
    /// Missing or corrupted records are skipped with a warning so one bad
    /// batch never blocks startup; `doctor`/`cleanup` deal with them.
    pub async fn initialize(&self) -> Result<InitReport> {
        let migrator = MigrationManager::new(&self.store);
        let migration = if migrator.needs_migration()? {
            migrator.migrate()?
        } else {
            log::debug!("Storage already at schema v{}", CURRENT_SCHEMA_VERSION);
            MigrationReport::up_to_date()
        };
        let index = self.store.load_index()?;

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        inner.state.clear();
        inner.aggregation.invalidate();

        let mut report = InitReport {
            migration,
            ..Default::default()
        };

        for (id, info) in &index.batches {
            match self.store.load_batch(id) {
                Ok(Some(record)) => {
                    let batch = Batch::from_parts(&record, info);
                    inner.state.insert_batch(batch, record.cards);
                    report.loaded_batches += 1;
                }
                Ok(None) => {
                    log::warn!("Indexed batch {} has no stored record, skipping", id);
                    report.skipped_batches.push(id.clone());
                }
                Err(e) => {
                    log::warn!("Skipping unreadable batch {}: {}", id, e);
                    report.skipped_batches.push(id.clone());
                }
            }
        }

        if self.config.seed_builtin && inner.state.batch(SYSTEM_BATCH_ID).is_none() {
            let payload = AssetLoader::load_builtin_cards().map_err(CatalogError::Format)?;
            let mut pipeline = ImportPipeline::new(
                &self.store,
                &mut inner.state,
                &mut inner.aggregation,
                self.converter.as_ref(),
            );
            pipeline.seed_builtin(payload)?;
            report.seeded_builtin = true;
        }

        inner
            .state
            .preprocess_card_images(&self.config.image_base_path);
        report.total_cards = inner.state.total_cards();

        log::info!(
            "Catalog initialized: {} batch(es), {} card(s), {} skipped",
            inner.state.batches().len(),
            report.total_cards,
            report.skipped_batches.len()
        );
        Ok(report)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Import a parsed pack payload.
    pub async fn import_cards(&self, payload: Value, file_name: &str) -> ImportResult {
        let (result, new_ids) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            let result = ImportPipeline::new(
                &self.store,
                &mut inner.state,
                &mut inner.aggregation,
                self.converter.as_ref(),
            )
            .import(payload, file_name);

            let new_ids = match result.batch_id.as_deref() {
                Some(batch_id) if result.success => {
                    inner
                        .state
                        .preprocess_card_images(&self.config.image_base_path);
                    inner
                        .state
                        .batch(batch_id)
                        .map(|b| b.card_ids.clone())
                        .unwrap_or_default()
                }
                _ => Vec::new(),
            };
            (result, new_ids)
        };

        if self.config.prewarm_after_import && !new_ids.is_empty() {
            let warmed = self.images.prewarm(&new_ids).await;
            log::debug!("Prewarmed {}/{} image(s)", warmed, new_ids.len());
        }
        result
    }

    /// Import a pack from its JSON text.
    pub async fn import_json_str(&self, json: &str, file_name: &str) -> ImportResult {
        match serde_json::from_str::<Value>(json) {
            Ok(payload) => self.import_cards(payload, file_name).await,
            Err(e) => ImportResult::failed(
                ImportStage::Received,
                &CatalogError::Format(format!("not valid JSON: {}", e)),
                Vec::new(),
            ),
        }
    }

    /// Remove a batch, then drop its image blobs and cached handles.
    pub async fn remove_batch(&self, batch_id: &str) -> RemovalResult {
        let result = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;
            ImportPipeline::new(
                &self.store,
                &mut inner.state,
                &mut inner.aggregation,
                self.converter.as_ref(),
            )
            .remove_batch(batch_id)
        };

        if result.success {
            self.release_images(&result.removed_card_ids).await;
        }
        result
    }

    /// Flip a batch's disabled flag, returning the new value.
    pub async fn toggle_batch_disabled(&self, batch_id: &str) -> Result<bool> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        ImportPipeline::new(
            &self.store,
            &mut inner.state,
            &mut inner.aggregation,
            self.converter.as_ref(),
        )
        .toggle_batch_disabled(batch_id)
    }

    /// Remove every custom batch, keeping the system batch.
    ///
    /// Returns the number of batches removed. Stray batch records the index
    /// never referenced are deleted too.
    pub async fn clear_all_custom_data(&self) -> Result<usize> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let mut index = self.store.load_index()?;
        let stored = self.store.list_batch_ids()?;
        let custom: Vec<String> = index
            .batches
            .keys()
            .chain(stored.iter())
            .filter(|id| id.as_str() != SYSTEM_BATCH_ID)
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        index.batches.retain(|id, _| id == SYSTEM_BATCH_ID);
        index.recompute_totals();
        self.store.save_index(&index)?;

        let mut card_ids = Vec::new();
        for id in &custom {
            if let Err(e) = self.store.remove_batch(id) {
                log::warn!("Could not delete batch record {}: {}", id, e);
            }
            if let Some((batch, _)) = inner.state.remove_batch(id) {
                card_ids.extend(batch.card_ids);
            }
        }
        inner.aggregation.invalidate();
        drop(guard);

        self.release_images(&card_ids).await;
        log::info!("Cleared {} custom batch(es)", custom.len());
        Ok(custom.len())
    }

    async fn release_images(&self, card_ids: &[String]) {
        for id in card_ids {
            if let Err(e) = self.blobs.delete(id).await {
                log::warn!("Could not delete image blob for card {}: {}", id, e);
            }
            self.images.remove(id).await;
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn load_all_cards(&self) -> Vec<Card> {
        self.inner.read().await.state.load_all_cards()
    }

    pub async fn load_cards_by_type(&self, card_type: CardType) -> Vec<Card> {
        self.inner.read().await.state.load_cards_by_type(card_type)
    }

    pub async fn get_card_by_id(&self, id: &str) -> Option<Card> {
        self.inner.read().await.state.get_card_by_id(id).cloned()
    }

    pub async fn list_batches(&self) -> Vec<Batch> {
        self.inner
            .read()
            .await
            .state
            .batches()
            .values()
            .cloned()
            .collect()
    }

    pub async fn get_batch(&self, id: &str) -> Option<Batch> {
        self.inner.read().await.state.batch(id).cloned()
    }

    // The aggregation cache is filled lazily, so these take the write lock.

    pub async fn get_aggregated_custom_fields(&self) -> CustomFieldDefinitions {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        inner
            .aggregation
            .get_aggregated_custom_fields(inner.state.batches().values())
    }

    pub async fn get_aggregated_variant_types(&self) -> VariantTypeMap {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        inner
            .aggregation
            .get_aggregated_variant_types(inner.state.batches().values())
    }

    /// Variant type overrides seen during the last aggregation.
    pub async fn aggregation_diagnostics(&self) -> Vec<AggregationDiagnostic> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        inner
            .aggregation
            .get_aggregated_variant_types(inner.state.batches().values());
        inner.aggregation.diagnostics().to_vec()
    }

    pub async fn stats(&self) -> Result<CatalogStats> {
        let inner = self.inner.read().await;
        let batches = inner.state.batches();
        Ok(CatalogStats {
            total_cards: inner.state.total_cards(),
            visible_cards: inner.state.visible_count(),
            batch_count: batches.len(),
            disabled_batches: batches.values().filter(|b| b.disabled).count(),
            cards_by_type: inner.state.type_counts(),
            storage: self.store.calculate_storage_usage()?,
        })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub async fn validate_integrity(&self) -> Result<IntegrityReport> {
        let _guard = self.inner.read().await;
        self.store.validate_integrity()
    }

    /// Repair storage, then drop loaded batches the index no longer lists.
    pub async fn cleanup_orphaned_data(&self) -> Result<CleanupReport> {
        let mut guard = self.inner.write().await;
        let report = self.store.cleanup_orphaned_data()?;

        let index = self.store.load_index()?;
        let stale: Vec<String> = guard
            .state
            .batches()
            .keys()
            .filter(|id| !index.batches.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in &stale {
            guard.state.remove_batch(id);
        }
        if !stale.is_empty() {
            guard.aggregation.invalidate();
            log::info!("Dropped {} stale batch(es) from memory", stale.len());
        }
        Ok(report)
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Store an image for a card of an imported batch, replacing any cached
    /// handle. Disabled batches still own their cards.
    pub async fn store_card_image(
        &self,
        card_id: &str,
        data: impl Into<Bytes>,
        mime_type: &str,
    ) -> Result<()> {
        {
            let inner = self.inner.read().await;
            match inner.state.owning_batch(card_id) {
                None => return Err(CatalogError::CardNotFound(card_id.to_string())),
                Some(batch) if batch.is_system_batch => {
                    return Err(CatalogError::SystemCardImage(card_id.to_string()))
                }
                Some(_) => {}
            }
        }
        self.blobs
            .put(BlobRecord::new(card_id, data, mime_type))
            .await?;
        self.images.remove(card_id).await;
        Ok(())
    }

    pub async fn get_image_url(&self, card_id: &str) -> Option<String> {
        self.images.get_image_url(card_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::core::catalog::blob::{MemoryBlobStore, ObjectUrlRegistry};
    use crate::core::catalog::kv::MemoryKeyValueStore;
    use crate::core::catalog::store::INDEX_KEY;

    struct Harness {
        kv: Arc<MemoryKeyValueStore>,
        blobs: Arc<MemoryBlobStore>,
        urls: Arc<ObjectUrlRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                kv: Arc::new(MemoryKeyValueStore::new()),
                blobs: Arc::new(MemoryBlobStore::real()),
                urls: Arc::new(ObjectUrlRegistry::new()),
            }
        }

        fn manager(&self, config: CatalogConfig) -> CardManager {
            CardManager::new(
                self.kv.clone(),
                self.blobs.clone(),
                self.urls.clone(),
                config,
                ImageCacheConfig::default(),
            )
        }
    }

    fn no_prewarm() -> CatalogConfig {
        CatalogConfig {
            prewarm_after_import: false,
            ..Default::default()
        }
    }

    fn food_pack() -> Value {
        json!({
            "name": "Harvest",
            "customFieldDefinitions": {"variants": ["食物"]},
            "variant": [
                {"id": "food-1", "名称": "苹果", "类型": "食物", "子类别": "水果", "等级": 2},
                {"id": "food-2", "名称": "白菜", "类型": "食物", "子类别": "蔬菜", "等级": 4}
            ]
        })
    }

    #[tokio::test]
    async fn test_initialize_seeds_builtin_once() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        let report = manager.initialize().await.unwrap();
        assert!(report.seeded_builtin);
        assert!(report.total_cards > 0);
        assert!(manager.get_batch(SYSTEM_BATCH_ID).await.unwrap().is_system_batch);

        let again = h.manager(no_prewarm()).initialize().await.unwrap();
        assert!(!again.seeded_builtin);
        assert_eq!(again.loaded_batches, 1);
        assert_eq!(again.total_cards, report.total_cards);
    }

    #[tokio::test]
    async fn test_imported_batch_survives_restart() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        let result = manager.import_cards(food_pack(), "harvest.json").await;
        assert!(result.success, "{:?}", result.errors);

        let restarted = h.manager(no_prewarm());
        restarted.initialize().await.unwrap();
        let card = restarted.get_card_by_id("food-2").await.unwrap();
        assert_eq!(card.batch_name.as_deref(), Some("Harvest"));
        assert_eq!(
            card.image_url.as_deref(),
            Some("/images/harvest/variant/白菜.webp")
        );
        assert!(restarted
            .get_aggregated_variant_types()
            .await
            .contains_key("食物"));
    }

    #[tokio::test]
    async fn test_initialize_skips_corrupted_batch() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        let batch_id = manager
            .import_cards(food_pack(), "harvest.json")
            .await
            .batch_id
            .unwrap();
        h.kv
            .set(&BatchRecordStore::batch_key(&batch_id), "{not json")
            .unwrap();

        let report = h.manager(no_prewarm()).initialize().await.unwrap();
        assert_eq!(report.skipped_batches, vec![batch_id]);
    }

    #[tokio::test]
    async fn test_import_json_str_rejects_bad_json() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        let result = manager.import_json_str("{oops", "bad.json").await;
        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(ImportStage::Received));
    }

    #[tokio::test]
    async fn test_remove_releases_blobs_and_handles() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        let batch_id = manager
            .import_cards(food_pack(), "harvest.json")
            .await
            .batch_id
            .unwrap();
        manager
            .store_card_image("food-1", vec![0u8; 16], "image/webp")
            .await
            .unwrap();
        let url = manager.get_image_url("food-1").await.unwrap();
        assert!(h.urls.is_live(&url));

        let result = manager.remove_batch(&batch_id).await;
        assert!(result.success);
        assert!(h.blobs.get("food-1").await.unwrap().is_none());
        assert!(!h.urls.is_live(&url));
        assert!(!manager.images().contains("food-1").await);
    }

    #[tokio::test]
    async fn test_prewarm_after_import() {
        let h = Harness::new();
        h.blobs
            .put(BlobRecord::new("food-1", vec![1u8, 2], "image/webp"))
            .await
            .unwrap();
        let manager = h.manager(CatalogConfig::default());
        manager.initialize().await.unwrap();

        assert!(manager.import_cards(food_pack(), "harvest.json").await.success);
        assert!(manager.images().contains("food-1").await);
        assert!(!manager.images().contains("food-2").await);
    }

    #[tokio::test]
    async fn test_store_card_image_clears_negative_entry() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        manager.import_cards(food_pack(), "harvest.json").await;
        assert!(manager.get_image_url("food-2").await.is_none());

        manager
            .store_card_image("food-2", vec![9u8], "image/png")
            .await
            .unwrap();
        assert!(manager.get_image_url("food-2").await.is_some());
    }

    #[tokio::test]
    async fn test_store_card_image_rejects_unknown_card() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();

        let err = manager
            .store_card_image("late", vec![9u8], "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::CardNotFound(_)));
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_card_image_rejects_builtin_card() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        let builtin = manager.get_batch(SYSTEM_BATCH_ID).await.unwrap();

        let err = manager
            .store_card_image(&builtin.card_ids[0], vec![9u8], "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::SystemCardImage(_)));
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_card_image_accepts_disabled_batch_card() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        let batch_id = manager
            .import_cards(food_pack(), "harvest.json")
            .await
            .batch_id
            .unwrap();
        manager.toggle_batch_disabled(&batch_id).await.unwrap();

        manager
            .store_card_image("food-1", vec![9u8], "image/png")
            .await
            .unwrap();
        assert!(h.blobs.get("food-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_toggle_and_stats() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        let batch_id = manager
            .import_cards(food_pack(), "harvest.json")
            .await
            .batch_id
            .unwrap();

        assert!(manager.toggle_batch_disabled(&batch_id).await.unwrap());
        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.batch_count, 2);
        assert_eq!(stats.disabled_batches, 1);
        assert_eq!(stats.total_cards, stats.visible_cards + 2);
        assert!(manager
            .load_cards_by_type(CardType::Variant)
            .await
            .iter()
            .all(|c| !c.id.starts_with("food-")));
    }

    #[tokio::test]
    async fn test_clear_all_custom_data_keeps_system_batch() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        manager.import_cards(food_pack(), "harvest.json").await;
        h.kv
            .set(&BatchRecordStore::batch_key("stray"), "{}")
            .unwrap();

        let removed = manager.clear_all_custom_data().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(manager.list_batches().await.len(), 1);
        assert_eq!(
            manager.store().list_batch_ids().unwrap(),
            vec![SYSTEM_BATCH_ID]
        );
        assert!(manager.validate_integrity().await.unwrap().is_healthy());
    }

    #[tokio::test]
    async fn test_cleanup_drops_batches_missing_from_storage() {
        let h = Harness::new();
        let manager = h.manager(no_prewarm());
        manager.initialize().await.unwrap();
        let batch_id = manager
            .import_cards(food_pack(), "harvest.json")
            .await
            .batch_id
            .unwrap();
        h.kv.remove(&BatchRecordStore::batch_key(&batch_id)).unwrap();

        let report = manager.cleanup_orphaned_data().await.unwrap();
        assert_eq!(report.repaired_batches, vec![batch_id.clone()]);
        assert!(manager.get_batch(&batch_id).await.is_none());
        assert!(h.kv.get(INDEX_KEY).unwrap().is_some());
    }
}
