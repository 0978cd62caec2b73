//! Mock implementations for testing
//!
//! mockall mocks of the catalog's storage seams, for driving failure paths
//! the memory backends never hit.

use std::sync::Arc;

use mockall::mock;
use mockall::predicate::eq;

use crate::core::catalog::error::{CatalogError, Result};
use crate::core::catalog::kv::KeyValueStore;
use crate::core::catalog::migration::MigrationManager;
use crate::core::catalog::store::{
    BatchRecordStore, DEFAULT_QUOTA_BYTES, INDEX_KEY, SCHEMA_VERSION_KEY,
};

// ============================================================================
// KeyValueStore Mock
// ============================================================================

mock! {
    pub KeyValueStore {}

    impl KeyValueStore for KeyValueStore {
        fn get(&self, key: &str) -> Result<Option<String>>;
        fn set(&self, key: &str, value: &str) -> Result<()>;
        fn remove(&self, key: &str) -> Result<()>;
        fn keys(&self) -> Result<Vec<String>>;
    }
}

fn store_over(mock: MockKeyValueStore) -> BatchRecordStore {
    BatchRecordStore::new(Arc::new(mock), DEFAULT_QUOTA_BYTES)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_load_index_propagates_read_failure() {
    let mut kv = MockKeyValueStore::new();
    kv.expect_get()
        .with(eq(INDEX_KEY))
        .returning(|key| Err(CatalogError::storage_read(key, "device busy")));

    let err = store_over(kv).load_index().unwrap_err();
    assert!(err.is_storage());
    assert!(err.to_string().contains("device busy"));
}

#[test]
fn test_save_index_surfaces_write_failure() {
    let mut kv = MockKeyValueStore::new();
    kv.expect_set()
        .with(eq(INDEX_KEY), mockall::predicate::always())
        .times(1)
        .returning(|key, _| Err(CatalogError::storage_write(key, "disk full")));

    let store = store_over(kv);
    let index = Default::default();
    let err = store.save_index(&index).unwrap_err();
    assert!(matches!(err, CatalogError::StorageWrite { .. }));
}

#[test]
fn test_stamped_storage_is_left_alone() {
    let mut kv = MockKeyValueStore::new();
    kv.expect_get()
        .with(eq(SCHEMA_VERSION_KEY))
        .returning(|_| Ok(Some("2".to_string())));
    kv.expect_set().never();
    kv.expect_remove().never();

    let store = store_over(kv);
    let report = MigrationManager::new(&store).migrate().unwrap();
    assert!(!report.performed);
}

#[test]
fn test_unparsable_stamp_is_reported_as_corruption() {
    let mut kv = MockKeyValueStore::new();
    kv.expect_get()
        .with(eq(SCHEMA_VERSION_KEY))
        .returning(|_| Ok(Some("two".to_string())));

    let store = store_over(kv);
    let err = MigrationManager::new(&store).schema_version().unwrap_err();
    assert!(matches!(err, CatalogError::Corrupted { .. }));
}
