//! Payload preprocessing ahead of validation.
//!
//! Packs may declare their variant types in a simplified form,
//! `customFieldDefinitions.variants: ["食物", "武器"]`, instead of a full
//! `customFieldDefinitions.variantTypes` map. [`preprocess_payload`] expands
//! the simplified form by scanning the payload's `variant` cards:
//!
//! - `subclasses`: sorted, distinct `子类别` values seen for the type
//! - `levelRange`: `[min, max + 1]` over the `等级` values seen, or `[1, 10]`
//!   when no card of the type carries a level
//!
//! The simplified field is removed and the derived map installed in its
//! place. When both forms are present the simplified one wins.

use std::collections::BTreeSet;

use serde_json::Value;

use super::error::FieldError;
use super::types::{VariantTypeDefinition, VariantTypeMap};
use super::validation::keys;

/// What preprocessing changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessOutcome {
    /// Variant type ids derived from the simplified form.
    pub derived_types: Vec<String>,
    /// An explicit `variantTypes` map was discarded in favour of the simplified form.
    pub replaced_explicit: bool,
    /// Malformed simplified declarations.
    pub errors: Vec<FieldError>,
}

/// Expand simplified variant declarations in place.
pub fn preprocess_payload(payload: &mut Value) -> PreprocessOutcome {
    let mut outcome = PreprocessOutcome::default();

    let declared = {
        let Some(defs) = payload
            .get_mut(keys::CUSTOM_FIELD_DEFINITIONS)
            .and_then(Value::as_object_mut)
        else {
            return outcome;
        };
        let Some(simplified) = defs.remove(keys::VARIANTS) else {
            return outcome;
        };
        match declared_type_names(&simplified, &mut outcome.errors) {
            Some(names) => names,
            None => return outcome,
        }
    };

    let cards = payload
        .get(keys::VARIANT)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let derived = derive_variant_types(&declared, cards);

    if let Some(defs) = payload
        .get_mut(keys::CUSTOM_FIELD_DEFINITIONS)
        .and_then(Value::as_object_mut)
    {
        outcome.replaced_explicit = defs.contains_key(keys::VARIANT_TYPES);
        if outcome.replaced_explicit {
            log::warn!("Both 'variants' and 'variantTypes' declared; using 'variants'");
        }
        let value = match serde_json::to_value(&derived) {
            Ok(v) => v,
            Err(e) => {
                outcome.errors.push(FieldError::new(
                    format!("{}.{}", keys::CUSTOM_FIELD_DEFINITIONS, keys::VARIANT_TYPES),
                    e.to_string(),
                ));
                return outcome;
            }
        };
        defs.insert(keys::VARIANT_TYPES.to_string(), value);
    }

    outcome.derived_types = derived.into_keys().collect();
    log::debug!(
        "Derived {} variant type(s) from simplified declarations",
        outcome.derived_types.len()
    );
    outcome
}

/// Infer a definition for every declared type name from the given cards.
pub fn derive_variant_types(declared: &[String], cards: &[Value]) -> VariantTypeMap {
    declared
        .iter()
        .map(|type_id| {
            let mut subclasses = BTreeSet::new();
            let mut levels = Vec::new();
            for card in cards.iter().filter(|c| {
                c.get(keys::VARIANT_TYPE).and_then(Value::as_str) == Some(type_id.as_str())
            }) {
                if let Some(sub) = card.get(keys::VARIANT_SUBCATEGORY).and_then(Value::as_str) {
                    let sub = sub.trim();
                    if !sub.is_empty() {
                        subclasses.insert(sub.to_string());
                    }
                }
                if let Some(level) = card.get(keys::LEVEL).and_then(Value::as_i64) {
                    levels.push(level);
                }
            }

            let level_range = match (levels.iter().min(), levels.iter().max()) {
                (Some(min), Some(max)) => [*min, max.saturating_add(1)],
                _ => VariantTypeDefinition::DEFAULT_LEVEL_RANGE,
            };
            (
                type_id.clone(),
                VariantTypeDefinition::new(subclasses.into_iter().collect(), level_range),
            )
        })
        .collect()
}

fn declared_type_names(value: &Value, errors: &mut Vec<FieldError>) -> Option<Vec<String>> {
    let path = format!("{}.{}", keys::CUSTOM_FIELD_DEFINITIONS, keys::VARIANTS);
    let Some(items) = value.as_array() else {
        errors.push(FieldError::new(&path, "must be an array of strings").with_value(value));
        return None;
    };

    let mut names = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match item.as_str().map(str::trim) {
            Some(name) if !name.is_empty() => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            _ => errors.push(
                FieldError::new(format!("{}[{}]", path, i), "must be a non-empty string")
                    .with_value(item),
            ),
        }
    }
    Some(names)
}
