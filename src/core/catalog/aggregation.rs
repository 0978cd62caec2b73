//! Aggregated vocabulary across installed batches.
//!
//! The [`AggregationEngine`] merges the custom field names and variant type
//! definitions contributed by every enabled batch, on top of the built-in
//! baseline (the system batch's definitions, which stay in effect even while
//! the system batch is disabled). Results are cached until [`invalidate`] is
//! called; callers invalidate after any batch add, remove or toggle.
//!
//! # Merge policy
//!
//! - Custom fields: per category, set union of names (sorted, deduplicated).
//! - Variant types: keyed by type id. When two installed batches define the
//!   same id, the batch processed later wins and an [`AggregationDiagnostic`]
//!   is recorded. Import-time redefinition is rejected separately by the
//!   import pipeline.
//!
//! [`create_validation_context`] layers a not-yet-committed candidate on top
//! of the current aggregation without touching the cache.
//!
//! [`invalidate`]: AggregationEngine::invalidate
//! [`create_validation_context`]: AggregationEngine::create_validation_context

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::{Batch, CustomFieldDefinitions, VariantTypeDefinition, VariantTypeMap};

// ============================================================================
// ValidationContext
// ============================================================================

/// Vocabulary as it would look if a candidate batch were installed.
///
/// Request-scoped; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    pub custom_fields: CustomFieldDefinitions,
    pub variant_types: VariantTypeMap,
}

impl ValidationContext {
    /// Whether `name` is a known member of `category`.
    pub fn has_field(&self, category: &str, name: &str) -> bool {
        self.custom_fields
            .get(category)
            .is_some_and(|names| names.iter().any(|n| n == name))
    }

    pub fn field_names(&self, category: &str) -> &[String] {
        self.custom_fields
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn variant_type(&self, type_id: &str) -> Option<&VariantTypeDefinition> {
        self.variant_types.get(type_id)
    }

    /// Known variant type ids, sorted.
    pub fn variant_type_ids(&self) -> Vec<&str> {
        self.variant_types.keys().map(String::as_str).collect()
    }
}

/// Definitions declared by a candidate import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateDefinitions {
    pub custom_fields: CustomFieldDefinitions,
    pub variant_types: VariantTypeMap,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// A non-fatal variant type redefinition between installed batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationDiagnostic {
    pub type_id: String,
    /// Batch whose definition was replaced.
    pub overridden_batch: String,
    /// Batch whose definition is now in effect.
    pub winning_batch: String,
}

// ============================================================================
// AggregationEngine
// ============================================================================

#[derive(Debug, Default)]
pub struct AggregationEngine {
    cached_fields: Option<CustomFieldDefinitions>,
    cached_variant_types: Option<VariantTypeMap>,
    diagnostics: Vec<AggregationDiagnostic>,
}

impl AggregationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop cached aggregates.
    pub fn invalidate(&mut self) {
        self.cached_fields = None;
        self.cached_variant_types = None;
        self.diagnostics.clear();
        log::debug!("Aggregation cache invalidated");
    }

    pub fn is_cached(&self) -> bool {
        self.cached_fields.is_some() && self.cached_variant_types.is_some()
    }

    /// Variant type redefinitions seen by the last variant type aggregation.
    pub fn diagnostics(&self) -> &[AggregationDiagnostic] {
        &self.diagnostics
    }

    /// Union of custom field names over the baseline and enabled batches.
    pub fn get_aggregated_custom_fields<'a, I>(&mut self, batches: I) -> CustomFieldDefinitions
    where
        I: IntoIterator<Item = &'a Batch>,
    {
        if let Some(cached) = &self.cached_fields {
            return cached.clone();
        }

        let mut sets: std::collections::BTreeMap<String, BTreeSet<String>> = Default::default();
        for batch in contributing(batches) {
            for (category, names) in &batch.custom_field_definitions {
                sets.entry(category.clone())
                    .or_default()
                    .extend(names.iter().cloned());
            }
        }

        let fields: CustomFieldDefinitions = sets
            .into_iter()
            .map(|(category, names)| (category, names.into_iter().collect()))
            .collect();
        self.cached_fields = Some(fields.clone());
        fields
    }

    /// Variant type map over the baseline and enabled batches, last writer wins.
    pub fn get_aggregated_variant_types<'a, I>(&mut self, batches: I) -> VariantTypeMap
    where
        I: IntoIterator<Item = &'a Batch>,
    {
        if let Some(cached) = &self.cached_variant_types {
            return cached.clone();
        }

        let mut merged = VariantTypeMap::new();
        let mut owners: std::collections::HashMap<String, String> = Default::default();
        self.diagnostics.clear();

        for batch in contributing(batches) {
            for (type_id, definition) in &batch.variant_types {
                if let Some(previous) = merged.get(type_id) {
                    let previous_owner = owners.get(type_id).cloned().unwrap_or_default();
                    if previous != definition && previous_owner != batch.id {
                        log::warn!(
                            "Variant type '{}' from batch {} overrides the definition from batch {}",
                            type_id,
                            batch.id,
                            previous_owner
                        );
                        self.diagnostics.push(AggregationDiagnostic {
                            type_id: type_id.clone(),
                            overridden_batch: previous_owner,
                            winning_batch: batch.id.clone(),
                        });
                    }
                }
                merged.insert(type_id.clone(), definition.clone());
                owners.insert(type_id.clone(), batch.id.clone());
            }
        }

        self.cached_variant_types = Some(merged.clone());
        merged
    }

    /// Build the vocabulary for validating `candidate` before it is committed.
    ///
    /// Layers baseline, current aggregation, then the candidate; the candidate
    /// wins variant type ties. Cached aggregates are reused but never
    /// modified by the candidate.
    pub fn create_validation_context<'a, I>(
        &mut self,
        batches: I,
        candidate: Option<&CandidateDefinitions>,
    ) -> ValidationContext
    where
        I: IntoIterator<Item = &'a Batch> + Clone,
    {
        let mut custom_fields = self.get_aggregated_custom_fields(batches.clone());
        let mut variant_types = self.get_aggregated_variant_types(batches);

        if let Some(candidate) = candidate {
            for (category, names) in &candidate.custom_fields {
                let entry = custom_fields.entry(category.clone()).or_default();
                let mut set: BTreeSet<String> = entry.drain(..).collect();
                set.extend(names.iter().cloned());
                *entry = set.into_iter().collect();
            }
            for (type_id, definition) in &candidate.variant_types {
                variant_types.insert(type_id.clone(), definition.clone());
            }
        }

        ValidationContext {
            custom_fields,
            variant_types,
        }
    }
}

/// Baseline (system batches, enabled or not) first, then enabled custom
/// batches in iteration order.
fn contributing<'a, I>(batches: I) -> Vec<&'a Batch>
where
    I: IntoIterator<Item = &'a Batch>,
{
    let (system, custom): (Vec<&Batch>, Vec<&Batch>) =
        batches.into_iter().partition(|b| b.is_system_batch);
    system
        .into_iter()
        .chain(custom.into_iter().filter(|b| !b.disabled))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::core::catalog::types::{SYSTEM_BATCH_ID, SYSTEM_BATCH_NAME};

    fn batch(id: &str, fields: &[(&str, &[&str])]) -> Batch {
        Batch {
            id: id.to_string(),
            name: id.to_string(),
            file_name: format!("{}.json", id),
            import_time: Utc::now(),
            version: None,
            description: None,
            author: None,
            card_count: 0,
            card_types: Vec::new(),
            size: 0,
            is_system_batch: id == SYSTEM_BATCH_ID,
            disabled: false,
            card_ids: Vec::new(),
            custom_field_definitions: fields
                .iter()
                .map(|(c, names)| (c.to_string(), names.iter().map(|n| n.to_string()).collect()))
                .collect(),
            variant_types: VariantTypeMap::new(),
        }
    }

    fn with_variant(mut b: Batch, type_id: &str, subclasses: &[&str], range: [i64; 2]) -> Batch {
        b.variant_types.insert(
            type_id.to_string(),
            VariantTypeDefinition::new(subclasses.iter().map(|s| s.to_string()).collect(), range),
        );
        b
    }

    fn builtin() -> Batch {
        let mut b = batch(SYSTEM_BATCH_ID, &[("ancestries", &["人类", "精灵"])]);
        b.name = SYSTEM_BATCH_NAME.to_string();
        b
    }

    // -------------------------------------------------------------------------
    // Custom fields
    // -------------------------------------------------------------------------

    #[test]
    fn test_fields_union_and_deduplicate() {
        let batches = vec![
            builtin(),
            batch("a", &[("ancestries", &["树人", "人类"])]),
            batch("b", &[("ancestries", &["树人"]), ("domains", &["食物"])]),
        ];
        let mut engine = AggregationEngine::new();
        let fields = engine.get_aggregated_custom_fields(&batches);

        assert_eq!(fields["ancestries"], vec!["人类", "树人", "精灵"]);
        assert_eq!(fields["domains"], vec!["食物"]);
    }

    #[test]
    fn test_disabled_batch_is_excluded() {
        let mut custom = batch("a", &[("ancestries", &["树人"])]);
        custom.disabled = true;
        let batches = vec![builtin(), custom];

        let mut engine = AggregationEngine::new();
        let fields = engine.get_aggregated_custom_fields(&batches);
        assert!(!fields["ancestries"].contains(&"树人".to_string()));
    }

    #[test]
    fn test_disabled_builtin_still_contributes_baseline() {
        let mut system = builtin();
        system.disabled = true;
        let batches = vec![system];

        let mut engine = AggregationEngine::new();
        let fields = engine.get_aggregated_custom_fields(&batches);
        assert_eq!(fields["ancestries"], vec!["人类", "精灵"]);
    }

    #[test]
    fn test_cache_holds_until_invalidated() {
        let mut batches = vec![builtin(), batch("a", &[("ancestries", &["树人"])])];
        let mut engine = AggregationEngine::new();
        engine.get_aggregated_custom_fields(&batches);
        engine.get_aggregated_variant_types(&batches);
        assert!(engine.is_cached());

        batches[1].disabled = true;
        let stale = engine.get_aggregated_custom_fields(&batches);
        assert!(stale["ancestries"].contains(&"树人".to_string()));

        engine.invalidate();
        assert!(!engine.is_cached());
        let fresh = engine.get_aggregated_custom_fields(&batches);
        assert!(!fresh["ancestries"].contains(&"树人".to_string()));
    }

    // -------------------------------------------------------------------------
    // Variant types
    // -------------------------------------------------------------------------

    #[test]
    fn test_variant_types_last_writer_wins_with_diagnostic() {
        let batches = vec![
            builtin(),
            with_variant(batch("a", &[]), "食物", &["水果"], [1, 3]),
            with_variant(batch("b", &[]), "食物", &["蔬菜"], [2, 5]),
        ];
        let mut engine = AggregationEngine::new();
        let types = engine.get_aggregated_variant_types(&batches);

        assert_eq!(types["食物"].subclasses, vec!["蔬菜"]);
        assert_eq!(types["食物"].level_range, [2, 5]);
        assert_eq!(
            engine.diagnostics(),
            &[AggregationDiagnostic {
                type_id: "食物".to_string(),
                overridden_batch: "a".to_string(),
                winning_batch: "b".to_string(),
            }]
        );
    }

    #[test]
    fn test_identical_redefinition_is_not_a_diagnostic() {
        let batches = vec![
            with_variant(batch("a", &[]), "食物", &["水果"], [1, 3]),
            with_variant(batch("b", &[]), "食物", &["水果"], [1, 3]),
        ];
        let mut engine = AggregationEngine::new();
        engine.get_aggregated_variant_types(&batches);
        assert!(engine.diagnostics().is_empty());
    }

    // -------------------------------------------------------------------------
    // Validation context
    // -------------------------------------------------------------------------

    #[test]
    fn test_validation_context_layers_candidate() {
        let batches = vec![
            builtin(),
            with_variant(batch("a", &[("domains", &["利刃"])]), "食物", &["水果"], [1, 3]),
        ];
        let candidate = CandidateDefinitions {
            custom_fields: [("ancestries".to_string(), vec!["树人".to_string()])]
                .into_iter()
                .collect(),
            variant_types: [(
                "食物".to_string(),
                VariantTypeDefinition::new(vec!["蔬菜".to_string()], [2, 5]),
            )]
            .into_iter()
            .collect(),
        };

        let mut engine = AggregationEngine::new();
        let ctx = engine.create_validation_context(&batches, Some(&candidate));

        assert!(ctx.has_field("ancestries", "树人"));
        assert!(ctx.has_field("ancestries", "人类"));
        assert!(ctx.has_field("domains", "利刃"));
        assert_eq!(ctx.variant_type("食物").unwrap().subclasses, vec!["蔬菜"]);

        // The candidate never leaks into the cached aggregation
        let fields = engine.get_aggregated_custom_fields(&batches);
        assert!(!fields["ancestries"].contains(&"树人".to_string()));
        let types = engine.get_aggregated_variant_types(&batches);
        assert_eq!(types["食物"].subclasses, vec!["水果"]);
    }

    #[test]
    fn test_validation_context_without_candidate_matches_aggregation() {
        let batches = vec![builtin()];
        let mut engine = AggregationEngine::new();
        let ctx = engine.create_validation_context(&batches, None);
        assert_eq!(ctx.field_names("ancestries"), ["人类", "精灵"]);
        assert!(ctx.field_names("communities").is_empty());
        assert!(ctx.variant_type_ids().is_empty());
    }
}
