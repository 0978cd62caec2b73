//! Transactional import, removal and toggle pipelines.
//!
//! # Import stages
//!
//! ```text
//! received -> preprocessed -> format-validated -> id-checked
//!          -> variant-type-checked -> converted -> size-checked
//!          -> persisted -> indexed -> published
//! ```
//!
//! Every stage is a gate. A failure before `persisted` returns a failed
//! [`ImportResult`] with nothing written. A failure at `indexed` removes the
//! batch record that was just saved, so storage never holds a record the
//! index does not know about.
//!
//! Pipelines report expected failures through result structs and never
//! return `Err` to their caller.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::aggregation::AggregationEngine;
use super::convert::CardConverter;
use super::error::{CatalogError, FieldError, Result};
use super::preprocess::preprocess_payload;
use super::store::BatchRecordStore;
use super::types::{
    Batch, BatchInfo, BatchMetadata, BatchRecord, CardSource, CustomFieldDefinitions,
    CATEGORY_ANCESTRIES, CATEGORY_COMMUNITIES, CATEGORY_DOMAINS, CATEGORY_PROFESSIONS,
    SYSTEM_BATCH_ID, SYSTEM_BATCH_NAME,
};
use super::state::UnifiedCardState;
use super::validation::{keys, ValidatedImportData, ValidationEngine};

/// Name given to packs that declare none.
pub const DEFAULT_PACK_NAME: &str = "Imported Pack";

// ============================================================================
// ImportStage
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportStage {
    Received,
    Preprocessed,
    FormatValidated,
    IdChecked,
    VariantTypeChecked,
    Converted,
    SizeChecked,
    Persisted,
    Indexed,
    Published,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Preprocessed => "preprocessed",
            Self::FormatValidated => "format-validated",
            Self::IdChecked => "id-checked",
            Self::VariantTypeChecked => "variant-type-checked",
            Self::Converted => "converted",
            Self::SizeChecked => "size-checked",
            Self::Persisted => "persisted",
            Self::Indexed => "indexed",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub imported_count: usize,
    /// User-facing messages, rendered verbatim by callers.
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicate_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variant_type_conflicts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<FieldError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Stage that rejected the import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<ImportStage>,
}

impl ImportResult {
    pub(crate) fn failed(stage: ImportStage, error: &CatalogError, warnings: Vec<String>) -> Self {
        let mut result = Self {
            success: false,
            errors: error.messages(),
            warnings,
            failed_stage: Some(stage),
            ..Default::default()
        };
        match error {
            CatalogError::IdConflict { ids } => result.duplicate_ids = ids.clone(),
            CatalogError::VariantTypeConflict { type_ids } => {
                result.variant_type_conflicts = type_ids.clone()
            }
            CatalogError::FieldValidation { errors } => result.validation_errors = errors.clone(),
            _ => {}
        }
        log::warn!("Import rejected at stage {}: {}", stage, error);
        result
    }
}

/// Outcome of a batch removal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalResult {
    pub success: bool,
    pub batch_id: String,
    pub removed_card_ids: Vec<String>,
    pub errors: Vec<String>,
}

impl RemovalResult {
    fn failed(batch_id: &str, error: &CatalogError) -> Self {
        log::warn!("Removal of batch {} failed: {}", batch_id, error);
        Self {
            success: false,
            batch_id: batch_id.to_string(),
            removed_card_ids: Vec::new(),
            errors: error.messages(),
        }
    }
}

// ============================================================================
// ImportPipeline
// ============================================================================

/// Borrowed view over the catalog parts a mutation touches.
pub struct ImportPipeline<'a> {
    store: &'a BatchRecordStore,
    state: &'a mut UnifiedCardState,
    aggregation: &'a mut AggregationEngine,
    converter: &'a dyn CardConverter,
    validator: ValidationEngine,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(
        store: &'a BatchRecordStore,
        state: &'a mut UnifiedCardState,
        aggregation: &'a mut AggregationEngine,
        converter: &'a dyn CardConverter,
    ) -> Self {
        Self {
            store,
            state,
            aggregation,
            converter,
            validator: ValidationEngine::new(),
        }
    }

    /// Import a pack payload as a new batch.
    pub fn import(&mut self, mut payload: Value, file_name: &str) -> ImportResult {
        let mut warnings = Vec::new();

        // preprocessed
        let outcome = preprocess_payload(&mut payload);
        if outcome.replaced_explicit {
            warnings.push(
                "Both 'variants' and 'variantTypes' were declared; 'variantTypes' was replaced"
                    .to_string(),
            );
        }
        if !outcome.errors.is_empty() {
            let err = CatalogError::FieldValidation {
                errors: outcome.errors,
            };
            return ImportResult::failed(ImportStage::Preprocessed, &err, warnings);
        }

        // format-validated
        let data = match self.validate(&payload) {
            Ok(data) => data,
            Err(e) => return ImportResult::failed(ImportStage::FormatValidated, &e, warnings),
        };

        // id-checked
        if let Err(e) = self.check_ids(&data) {
            return ImportResult::failed(ImportStage::IdChecked, &e, warnings);
        }

        // variant-type-checked
        if let Err(e) = self.check_variant_types(&data) {
            return ImportResult::failed(ImportStage::VariantTypeChecked, &e, warnings);
        }

        // converted
        let batch_id = generate_batch_id();
        let record = match self.build_record(&batch_id, &data, file_name, CardSource::Custom) {
            Ok(record) => record,
            Err(e) => return ImportResult::failed(ImportStage::Converted, &e, warnings),
        };

        // size-checked
        if let Err(e) = self.check_size(&batch_id, &record) {
            return ImportResult::failed(ImportStage::SizeChecked, &e, warnings);
        }

        // persisted
        let size = match self.store.save_batch(&batch_id, &record) {
            Ok(size) => size,
            Err(e) => return ImportResult::failed(ImportStage::Persisted, &e, warnings),
        };

        // indexed
        let info = BatchInfo::from_record(&record, size);
        if let Err(e) = self.index_batch(&info) {
            self.rollback(&batch_id);
            return ImportResult::failed(ImportStage::Indexed, &e, warnings);
        }

        // published
        let imported_count = record.cards.len();
        self.publish(&record, &info);
        log::info!(
            "Imported batch {} ('{}') with {} card(s)",
            batch_id,
            record.metadata.name,
            imported_count
        );

        ImportResult {
            success: true,
            batch_id: Some(batch_id),
            imported_count,
            warnings,
            ..Default::default()
        }
    }

    fn validate(&mut self, payload: &Value) -> Result<ValidatedImportData> {
        self.validator.check_format(payload)?;
        let definitions = self
            .validator
            .extract_definitions(payload)
            .map_err(|errors| CatalogError::FieldValidation { errors })?;

        let ctx = self
            .aggregation
            .create_validation_context(self.state.batches().values(), Some(&definitions));
        let errors = self.validator.validate_import_data(payload, &ctx);
        if !errors.is_empty() {
            return Err(CatalogError::FieldValidation { errors });
        }
        self.validator.into_validated(payload, definitions)
    }

    /// Every id that collides with a loaded card or repeats within the payload.
    fn check_ids(&self, data: &ValidatedImportData) -> Result<()> {
        let mut seen = HashSet::new();
        let mut conflicts: Vec<String> = Vec::new();
        for id in data.card_ids() {
            let repeated = !seen.insert(id);
            if (repeated || self.state.contains_card_id(id)) && !conflicts.iter().any(|c| c == id) {
                conflicts.push(id.to_string());
            }
        }
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::IdConflict { ids: conflicts })
        }
    }

    /// A new pack may not redefine a variant type already in effect.
    fn check_variant_types(&mut self, data: &ValidatedImportData) -> Result<()> {
        let existing = self
            .aggregation
            .get_aggregated_variant_types(self.state.batches().values());
        let conflicts: Vec<String> = data
            .variant_types
            .keys()
            .filter(|id| existing.contains_key(*id))
            .cloned()
            .collect();
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::VariantTypeConflict { type_ids: conflicts })
        }
    }

    fn build_record(
        &self,
        batch_id: &str,
        data: &ValidatedImportData,
        file_name: &str,
        source: CardSource,
    ) -> Result<BatchRecord> {
        let name = data
            .name
            .clone()
            .unwrap_or_else(|| pack_name_from_file(file_name));

        let mut cards = self.converter.convert_all(&data.cards)?;
        for card in &mut cards {
            card.batch_id = Some(batch_id.to_string());
            card.batch_name = Some(name.clone());
            card.source = source;
        }

        Ok(BatchRecord {
            metadata: BatchMetadata {
                id: batch_id.to_string(),
                name,
                file_name: file_name.to_string(),
                import_time: Utc::now(),
                version: data.version.clone(),
                description: data.description.clone(),
                author: data.author.clone(),
            },
            cards,
            custom_field_definitions: (!data.custom_field_definitions.is_empty())
                .then(|| data.custom_field_definitions.clone()),
            variant_types: (!data.variant_types.is_empty()).then(|| data.variant_types.clone()),
        })
    }

    fn check_size(&self, batch_id: &str, record: &BatchRecord) -> Result<()> {
        let required =
            (BatchRecordStore::batch_key(batch_id).len() as u64) + record.estimate_size();
        if !self.store.check_storage_space(required)? {
            let usage = self.store.calculate_storage_usage()?;
            return Err(CatalogError::StorageQuota {
                current: usage.used_bytes,
                required,
                quota: self.store.quota_bytes(),
            });
        }
        Ok(())
    }

    fn index_batch(&self, info: &BatchInfo) -> Result<()> {
        let mut index = self.store.load_index()?;
        index.batches.insert(info.id.clone(), info.clone());
        index.recompute_totals();
        self.store.save_index(&index)
    }

    fn rollback(&self, batch_id: &str) {
        log::error!("Rolling back batch record {}", batch_id);
        if let Err(e) = self.store.remove_batch(batch_id) {
            log::error!("Rollback of batch {} failed: {}", batch_id, e);
        }
    }

    fn publish(&mut self, record: &BatchRecord, info: &BatchInfo) {
        let batch = Batch::from_parts(record, info);
        self.state.insert_batch(batch, record.cards.clone());
        self.aggregation.invalidate();
    }

    // ========================================================================
    // Built-in seeding
    // ========================================================================

    /// Persist the bundled card set as the system batch.
    ///
    /// The batch's vocabulary is its declared definitions plus every
    /// taxonomy name its own cards use.
    pub fn seed_builtin(&mut self, mut payload: Value) -> Result<usize> {
        let outcome = preprocess_payload(&mut payload);
        if !outcome.errors.is_empty() {
            return Err(CatalogError::FieldValidation {
                errors: outcome.errors,
            });
        }
        self.validator.check_format(&payload)?;
        let mut definitions = self
            .validator
            .extract_definitions(&payload)
            .map_err(|errors| CatalogError::FieldValidation { errors })?;
        for (category, names) in derive_field_definitions(&payload) {
            let entry = definitions.custom_fields.entry(category).or_default();
            let merged: BTreeSet<String> = entry.drain(..).chain(names).collect();
            *entry = merged.into_iter().collect();
        }

        let ctx = super::aggregation::ValidationContext {
            custom_fields: definitions.custom_fields.clone(),
            variant_types: definitions.variant_types.clone(),
        };
        let errors = self.validator.validate_import_data(&payload, &ctx);
        if !errors.is_empty() {
            return Err(CatalogError::FieldValidation { errors });
        }
        let mut data = self.validator.into_validated(&payload, definitions)?;
        data.name = Some(SYSTEM_BATCH_NAME.to_string());

        let record = self.build_record(SYSTEM_BATCH_ID, &data, "builtin", CardSource::Builtin)?;
        let size = self.store.save_batch(SYSTEM_BATCH_ID, &record)?;
        let info = BatchInfo::from_record(&record, size);
        if let Err(e) = self.index_batch(&info) {
            self.rollback(SYSTEM_BATCH_ID);
            return Err(e);
        }
        self.publish(&record, &info);
        log::info!("Seeded built-in batch with {} card(s)", record.cards.len());
        Ok(record.cards.len())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove a batch and every card it owns.
    ///
    /// The record is deleted before the index entry; if the index write
    /// fails the record is restored and memory is left untouched.
    pub fn remove_batch(&mut self, batch_id: &str) -> RemovalResult {
        match self.try_remove(batch_id) {
            Ok(card_ids) => RemovalResult {
                success: true,
                batch_id: batch_id.to_string(),
                removed_card_ids: card_ids,
                errors: Vec::new(),
            },
            Err(e) => RemovalResult::failed(batch_id, &e),
        }
    }

    fn try_remove(&mut self, batch_id: &str) -> Result<Vec<String>> {
        if batch_id == SYSTEM_BATCH_ID
            || self.state.batch(batch_id).is_some_and(|b| b.is_system_batch)
        {
            return Err(CatalogError::SystemBatchProtected);
        }

        let mut index = self.store.load_index()?;
        if !index.batches.contains_key(batch_id) && self.state.batch(batch_id).is_none() {
            return Err(CatalogError::BatchNotFound(batch_id.to_string()));
        }

        let key = BatchRecordStore::batch_key(batch_id);
        let snapshot = self.store.kv().get(&key)?;
        self.store.remove_batch(batch_id)?;

        index.batches.shift_remove(batch_id);
        index.recompute_totals();
        if let Err(e) = self.store.save_index(&index) {
            if let Some(raw) = snapshot {
                if let Err(restore) = self.store.kv().set(&key, &raw) {
                    log::error!("Could not restore batch record {}: {}", batch_id, restore);
                }
            }
            return Err(e);
        }

        let card_ids = self
            .state
            .remove_batch(batch_id)
            .map(|(batch, _)| batch.card_ids)
            .unwrap_or_default();
        self.aggregation.invalidate();
        log::info!("Removed batch {} ({} card(s))", batch_id, card_ids.len());
        Ok(card_ids)
    }

    // ========================================================================
    // Toggle
    // ========================================================================

    /// Flip a batch's disabled flag, returning the new value.
    ///
    /// Stored cards are never touched. The index is written first; memory
    /// only changes once that write succeeded.
    pub fn toggle_batch_disabled(&mut self, batch_id: &str) -> Result<bool> {
        let current = self
            .state
            .batch(batch_id)
            .map(|b| b.disabled)
            .ok_or_else(|| CatalogError::BatchNotFound(batch_id.to_string()))?;
        let disabled = !current;

        let mut index = self.store.load_index()?;
        let entry = index
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| CatalogError::BatchNotFound(batch_id.to_string()))?;
        entry.disabled = disabled;
        index.last_update = Utc::now();
        self.store.save_index(&index)?;

        self.state.set_batch_disabled(batch_id, disabled)?;
        self.aggregation.invalidate();
        log::info!(
            "Batch {} {}",
            batch_id,
            if disabled { "disabled" } else { "enabled" }
        );
        Ok(disabled)
    }
}

/// Taxonomy names used by a payload's cards, per category.
pub fn derive_field_definitions(payload: &Value) -> CustomFieldDefinitions {
    let sources: [(&str, &[&str], &str); 6] = [
        ("profession", &[keys::NAME], CATEGORY_PROFESSIONS),
        ("profession", &[keys::DOMAIN_1, keys::DOMAIN_2], CATEGORY_DOMAINS),
        ("subclass", &[keys::MAIN_PROFESSION], CATEGORY_PROFESSIONS),
        ("ancestry", &[keys::ANCESTRY], CATEGORY_ANCESTRIES),
        ("community", &[keys::NAME], CATEGORY_COMMUNITIES),
        ("domain", &[keys::DOMAIN], CATEGORY_DOMAINS),
    ];

    let mut sets: std::collections::BTreeMap<String, BTreeSet<String>> = Default::default();
    for (array, fields, category) in sources {
        let Some(cards) = payload.get(array).and_then(Value::as_array) else {
            continue;
        };
        for card in cards {
            for field in fields {
                if let Some(name) = card.get(*field).and_then(Value::as_str) {
                    if !name.trim().is_empty() {
                        sets.entry(category.to_string())
                            .or_default()
                            .insert(name.to_string());
                    }
                }
            }
        }
    }
    sets.into_iter()
        .map(|(category, names)| (category, names.into_iter().collect()))
        .collect()
}

fn generate_batch_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

fn pack_name_from_file(file_name: &str) -> String {
    let stem = std::path::Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .unwrap_or("");
    if stem.is_empty() {
        DEFAULT_PACK_NAME.to_string()
    } else {
        stem.to_string()
    }
}
