//! Test Fixtures
//!
//! Shared builders for catalog managers, pack payloads and cards.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::catalog::blob::{MemoryBlobStore, ObjectUrlRegistry};
use crate::core::catalog::image_cache::ImageCacheConfig;
use crate::core::catalog::kv::MemoryKeyValueStore;
use crate::core::catalog::manager::{CardManager, CatalogConfig};
use crate::core::catalog::types::{
    Batch, Card, CardType, CustomFieldDefinitions, VariantTypeDefinition, VariantTypeMap,
};

// =============================================================================
// Manager Fixtures
// =============================================================================

/// Collaborators kept alongside a manager so tests can inspect them.
pub struct TestCatalog {
    pub kv: Arc<MemoryKeyValueStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub urls: Arc<ObjectUrlRegistry>,
    pub manager: CardManager,
}

/// An initialized in-memory catalog without image prewarming.
pub async fn create_test_catalog() -> TestCatalog {
    let kv = Arc::new(MemoryKeyValueStore::new());
    let blobs = Arc::new(MemoryBlobStore::real());
    let urls = Arc::new(ObjectUrlRegistry::new());
    let manager = CardManager::new(
        kv.clone(),
        blobs.clone(),
        urls.clone(),
        CatalogConfig {
            prewarm_after_import: false,
            ..Default::default()
        },
        ImageCacheConfig::default(),
    );
    manager
        .initialize()
        .await
        .expect("Failed to initialize test catalog");
    TestCatalog {
        kv,
        blobs,
        urls,
        manager,
    }
}

// =============================================================================
// Payload Fixtures
// =============================================================================

/// Pack declaring the `食物` variant type through the simplified form.
pub fn food_pack() -> Value {
    json!({
        "name": "Harvest",
        "version": "1.0.0",
        "customFieldDefinitions": {"variants": ["食物"]},
        "variant": [
            {"id": "food-apple", "名称": "苹果", "类型": "食物", "子类别": "水果", "等级": 2},
            {"id": "food-cabbage", "名称": "白菜", "类型": "食物", "子类别": "蔬菜", "等级": 4}
        ]
    })
}

/// Pack whose professions declare their own domains.
pub fn profession_pack(id_prefix: &str) -> Value {
    json!({
        "name": format!("{} Classes", id_prefix),
        "customFieldDefinitions": {
            "professions": ["游侠"],
            "domains": ["荒野"]
        },
        "profession": [{
            "id": format!("{}-ranger", id_prefix),
            "名称": "游侠",
            "领域1": "荒野",
            "领域2": "贤者",
            "起始生命": 6,
            "起始闪避": 12
        }],
        "domain": [{
            "id": format!("{}-wild-1", id_prefix),
            "名称": "追踪",
            "领域": "荒野",
            "等级": 1
        }]
    })
}

// =============================================================================
// Batch and Card Fixtures
// =============================================================================

pub fn create_test_card(id: &str, card_type: CardType, batch_id: &str) -> Card {
    let mut card = Card::new(id, format!("Card {}", id), card_type);
    card.batch_id = Some(batch_id.to_string());
    card
}

/// A loaded batch carrying the given definitions.
pub fn create_test_batch(
    id: &str,
    custom_fields: CustomFieldDefinitions,
    variant_types: VariantTypeMap,
) -> Batch {
    Batch {
        id: id.to_string(),
        name: format!("Pack {}", id),
        file_name: format!("{}.json", id),
        import_time: Utc::now(),
        version: None,
        description: None,
        author: None,
        card_count: 0,
        card_types: Vec::new(),
        size: 0,
        is_system_batch: false,
        disabled: false,
        card_ids: Vec::new(),
        custom_field_definitions: custom_fields,
        variant_types,
    }
}

pub fn variant_types(ids: &[&str]) -> VariantTypeMap {
    ids.iter()
        .map(|id| {
            (
                id.to_string(),
                VariantTypeDefinition::new(Vec::new(), VariantTypeDefinition::DEFAULT_LEVEL_RANGE),
            )
        })
        .collect()
}
