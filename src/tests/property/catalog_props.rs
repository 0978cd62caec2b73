//! Property-based tests for catalog storage and aggregation
//!
//! Tests invariants:
//! - Index totals always match the per-batch mirrors
//! - Aggregated field names are the set union of enabled batches
//! - Disabled batches never contribute
//! - Path segment normalization is idempotent and path-safe

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use proptest::prelude::*;

use crate::core::catalog::aggregation::AggregationEngine;
use crate::core::catalog::state::normalize_path_segment;
use crate::core::catalog::types::{Batch, BatchInfo, CatalogIndex, CustomFieldDefinitions};
use crate::tests::common::create_test_batch;

// ============================================================================
// Strategies for generating test inputs
// ============================================================================

fn arb_category() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("professions".to_string()),
        Just("ancestries".to_string()),
        Just("communities".to_string()),
        Just("domains".to_string()),
    ]
}

fn arb_field_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,6}",
        Just("游侠".to_string()),
        Just("荒野".to_string()),
        Just("人类".to_string()),
    ]
}

fn arb_fields() -> impl Strategy<Value = CustomFieldDefinitions> {
    prop::collection::btree_map(
        arb_category(),
        prop::collection::vec(arb_field_name(), 0..5),
        0..4,
    )
}

/// Batches with random definitions and a random disabled flag.
fn arb_batches() -> impl Strategy<Value = Vec<Batch>> {
    prop::collection::vec((arb_fields(), any::<bool>()), 0..6).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (fields, disabled))| {
                let mut batch =
                    create_test_batch(&format!("batch-{}", i), fields, Default::default());
                batch.disabled = disabled;
                batch
            })
            .collect()
    })
}

fn info(id: &str, card_count: usize) -> BatchInfo {
    BatchInfo {
        id: id.to_string(),
        name: id.to_string(),
        file_name: format!("{}.json", id),
        import_time: Utc::now(),
        version: None,
        card_count,
        card_types: Vec::new(),
        size: 0,
        is_system_batch: false,
        disabled: false,
    }
}

fn non_empty_sets(fields: &CustomFieldDefinitions) -> BTreeMap<String, BTreeSet<String>> {
    fields
        .iter()
        .filter(|(_, names)| !names.is_empty())
        .map(|(cat, names)| (cat.clone(), names.iter().cloned().collect()))
        .collect()
}

// ============================================================================
// Index properties
// ============================================================================

proptest! {
    #[test]
    fn index_totals_match_entries(counts in prop::collection::vec(0usize..500, 0..20)) {
        let mut index = CatalogIndex::default();
        for (i, count) in counts.iter().enumerate() {
            index.batches.insert(format!("b{}", i), info(&format!("b{}", i), *count));
        }
        index.recompute_totals();

        prop_assert!(index.totals_consistent());
        prop_assert_eq!(index.total_batches, counts.len());
        prop_assert_eq!(index.total_cards, counts.iter().sum::<usize>());
    }

    #[test]
    fn index_totals_survive_removal(
        counts in prop::collection::vec(0usize..100, 1..10),
        remove in any::<prop::sample::Index>(),
    ) {
        let mut index = CatalogIndex::default();
        for (i, count) in counts.iter().enumerate() {
            index.batches.insert(format!("b{}", i), info(&format!("b{}", i), *count));
        }
        let victim = format!("b{}", remove.index(counts.len()));
        index.batches.shift_remove(&victim);
        index.recompute_totals();

        prop_assert!(index.totals_consistent());
        prop_assert_eq!(index.total_batches, counts.len() - 1);
    }
}

// ============================================================================
// Aggregation properties
// ============================================================================

proptest! {
    #[test]
    fn aggregated_fields_are_union_of_enabled_batches(batches in arb_batches()) {
        let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for batch in batches.iter().filter(|b| !b.disabled) {
            for (cat, names) in non_empty_sets(&batch.custom_field_definitions) {
                expected.entry(cat).or_default().extend(names);
            }
        }

        let mut engine = AggregationEngine::new();
        let fields = engine.get_aggregated_custom_fields(batches.iter());

        for names in fields.values() {
            let unique: BTreeSet<&String> = names.iter().collect();
            prop_assert_eq!(unique.len(), names.len(), "duplicate names in {:?}", names);
        }
        prop_assert_eq!(non_empty_sets(&fields), expected);
    }

    #[test]
    fn disabled_batches_never_contribute(batches in arb_batches()) {
        let enabled: BTreeSet<String> = batches
            .iter()
            .filter(|b| !b.disabled)
            .flat_map(|b| b.custom_field_definitions.values().flatten().cloned())
            .collect();

        let mut engine = AggregationEngine::new();
        let fields = engine.get_aggregated_custom_fields(batches.iter());
        for name in fields.values().flatten() {
            prop_assert!(enabled.contains(name), "'{}' leaked from a disabled batch", name);
        }
    }

    #[test]
    fn cached_aggregation_matches_fresh(batches in arb_batches()) {
        let mut engine = AggregationEngine::new();
        let first = engine.get_aggregated_custom_fields(batches.iter());
        let cached = engine.get_aggregated_custom_fields(batches.iter());
        engine.invalidate();
        let fresh = engine.get_aggregated_custom_fields(batches.iter());

        prop_assert_eq!(&first, &cached);
        prop_assert_eq!(non_empty_sets(&first), non_empty_sets(&fresh));
    }
}

// ============================================================================
// Path segment properties
// ============================================================================

proptest! {
    #[test]
    fn normalize_is_idempotent(input in "[a-zA-Z0-9 _/.:?#\\-一-龥]{0,40}") {
        let once = normalize_path_segment(&input);
        prop_assert_eq!(normalize_path_segment(&once), once);
    }

    #[test]
    fn normalize_output_is_path_safe(input in "\\PC{0,40}") {
        let out = normalize_path_segment(&input);
        prop_assert!(!out.chars().any(|c| c.is_whitespace() || c.is_control()));
        for forbidden in ['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>', '#', '.'] {
            prop_assert!(!out.contains(forbidden), "'{}' kept in {:?}", forbidden, out);
        }
    }
}
