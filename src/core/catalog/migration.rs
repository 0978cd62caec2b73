//! Storage schema stamp and one-shot legacy migration.
//!
//! The catalog stamps its layout version under
//! [`SCHEMA_VERSION_KEY`](super::store::SCHEMA_VERSION_KEY). The legacy (v1)
//! layout kept every batch inside one monolithic record under
//! [`LEGACY_STORE_KEY`]; the current (v2) layout keeps one record per batch
//! plus an index.
//!
//! [`MigrationManager::migrate`] moves v1 data into v2 once and stamps the
//! version. Once stamped, nothing reads the legacy key again. A stamp newer
//! than [`CURRENT_SCHEMA_VERSION`] is refused rather than guessed at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{CatalogError, Result};
use super::store::{BatchRecordStore, SCHEMA_VERSION_KEY};
use super::types::{
    BatchInfo, BatchMetadata, BatchRecord, Card, CustomFieldDefinitions, VariantTypeMap,
};

/// Layout version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Monolithic record of the legacy layout.
pub const LEGACY_STORE_KEY: &str = "daggerheart_custom_cards";

// ============================================================================
// Legacy layout
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyStore {
    #[serde(default)]
    batches: Vec<LegacyBatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyBatch {
    id: String,
    name: String,
    #[serde(default)]
    file_name: String,
    import_time: DateTime<Utc>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    cards: Vec<Card>,
    #[serde(default)]
    custom_field_definitions: Option<CustomFieldDefinitions>,
    #[serde(default)]
    variant_types: Option<VariantTypeMap>,
}

impl LegacyBatch {
    fn into_record(self) -> (BatchRecord, bool) {
        let record = BatchRecord {
            metadata: BatchMetadata {
                id: self.id,
                name: self.name,
                file_name: self.file_name,
                import_time: self.import_time,
                version: self.version,
                description: self.description,
                author: self.author,
            },
            cards: self.cards,
            custom_field_definitions: self.custom_field_definitions,
            variant_types: self.variant_types,
        };
        (record, self.disabled)
    }
}

// ============================================================================
// MigrationReport
// ============================================================================

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Stamp found before the run (`None` for unstamped storage).
    pub from_version: Option<u32>,
    pub to_version: u32,
    /// Whether the run wrote anything.
    pub performed: bool,
    pub migrated_batches: Vec<String>,
    /// Legacy batches already present in the index.
    pub skipped_batches: Vec<String>,
}

impl MigrationReport {
    /// Report for storage already at [`CURRENT_SCHEMA_VERSION`].
    pub fn up_to_date() -> Self {
        Self {
            from_version: Some(CURRENT_SCHEMA_VERSION),
            to_version: CURRENT_SCHEMA_VERSION,
            ..Default::default()
        }
    }
}

// ============================================================================
// MigrationManager
// ============================================================================

pub struct MigrationManager<'a> {
    store: &'a BatchRecordStore,
}

impl<'a> MigrationManager<'a> {
    pub fn new(store: &'a BatchRecordStore) -> Self {
        Self { store }
    }

    /// Current stamp, if any.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        match self.store.kv().get(SCHEMA_VERSION_KEY)? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|e| CatalogError::corrupted(SCHEMA_VERSION_KEY, e.to_string())),
        }
    }

    /// Whether the stamp differs from [`CURRENT_SCHEMA_VERSION`]. A newer
    /// stamp counts, so [`migrate`](Self::migrate) gets to refuse it.
    pub fn needs_migration(&self) -> Result<bool> {
        Ok(self.schema_version()? != Some(CURRENT_SCHEMA_VERSION))
    }

    /// Bring storage to [`CURRENT_SCHEMA_VERSION`].
    ///
    /// Idempotent: on already-current storage it performs no writes.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let from_version = self.schema_version()?;
        let mut report = MigrationReport {
            from_version,
            to_version: CURRENT_SCHEMA_VERSION,
            performed: false,
            migrated_batches: Vec::new(),
            skipped_batches: Vec::new(),
        };

        match from_version {
            Some(v) if v == CURRENT_SCHEMA_VERSION => return Ok(report),
            Some(v) if v > CURRENT_SCHEMA_VERSION => {
                return Err(CatalogError::SchemaVersion {
                    found: v,
                    supported: CURRENT_SCHEMA_VERSION,
                });
            }
            _ => {}
        }

        let kv = self.store.kv();
        if let Some(raw) = kv.get(LEGACY_STORE_KEY)? {
            let legacy: LegacyStore = serde_json::from_str(&raw)
                .map_err(|e| CatalogError::corrupted(LEGACY_STORE_KEY, e.to_string()))?;
            log::info!(
                "Migrating {} legacy batch(es) to schema v{}",
                legacy.batches.len(),
                CURRENT_SCHEMA_VERSION
            );

            let mut index = self.store.load_index()?;
            for batch in legacy.batches {
                if index.batches.contains_key(&batch.id) {
                    report.skipped_batches.push(batch.id);
                    continue;
                }
                let (record, disabled) = batch.into_record();
                let id = record.metadata.id.clone();
                let size = self.store.save_batch(&id, &record)?;
                let mut info = BatchInfo::from_record(&record, size);
                info.disabled = disabled;
                index.batches.insert(id.clone(), info);
                report.migrated_batches.push(id);
            }
            index.recompute_totals();
            self.store.save_index(&index)?;
            kv.remove(LEGACY_STORE_KEY)?;
        }

        kv.set(SCHEMA_VERSION_KEY, &CURRENT_SCHEMA_VERSION.to_string())?;
        report.performed = true;
        log::info!(
            "Storage schema stamped v{} (from {:?}), {} batch(es) migrated",
            CURRENT_SCHEMA_VERSION,
            from_version,
            report.migrated_batches.len()
        );
        Ok(report)
    }
}
