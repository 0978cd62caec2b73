//! Compile-time bundled asset loader.
//!
//! Bundles the built-in card set into the binary via `include_str!`. The
//! catalog seeds it as the system batch on first start.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cardpacks::core::assets::AssetLoader;
//!
//! let payload = AssetLoader::load_builtin_cards()?;
//! ```

use serde_json::Value;
use tracing::{debug, warn};

use super::catalog::types::CardType;

// ============================================================================
// Compile-time bundled JSON: Built-in cards
// ============================================================================

const BUILTIN_CARDS: &str = include_str!("../../assets/builtin_cards.json");

// ============================================================================
// AssetLoader
// ============================================================================

/// Loads bundled assets.
///
/// All assets are compiled into the binary; no filesystem access at runtime.
pub struct AssetLoader;

impl AssetLoader {
    /// Parse the built-in card pack payload.
    pub fn load_builtin_cards() -> Result<Value, String> {
        match serde_json::from_str::<Value>(BUILTIN_CARDS) {
            Ok(payload) => {
                debug!(cards = Self::count_cards(&payload), "loaded built-in cards");
                Ok(payload)
            }
            Err(e) => {
                warn!(error = %e, "failed to parse built-in cards JSON");
                Err(format!("built-in cards parse error: {e}"))
            }
        }
    }

    /// Raw built-in cards JSON (for diagnostics/display).
    pub fn builtin_cards_json() -> &'static str {
        BUILTIN_CARDS
    }

    fn count_cards(payload: &Value) -> usize {
        CardType::ALL
            .iter()
            .filter_map(|t| payload.get(t.as_str()).and_then(Value::as_array))
            .map(Vec::len)
            .sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_cards_parse() {
        let payload = AssetLoader::load_builtin_cards().expect("built-in JSON should parse");
        assert!(payload.is_object());
        assert!(AssetLoader::builtin_cards_json().contains("customFieldDefinitions"));
    }

    #[test]
    fn test_every_card_type_present() {
        let payload = AssetLoader::load_builtin_cards().unwrap();
        for card_type in CardType::ALL {
            let cards = payload
                .get(card_type.as_str())
                .and_then(Value::as_array)
                .unwrap_or_else(|| panic!("missing '{}' array", card_type));
            assert!(!cards.is_empty(), "'{}' should have cards", card_type);
        }
    }

    #[test]
    fn test_builtin_ids_unique_and_prefixed() {
        let payload = AssetLoader::load_builtin_cards().unwrap();
        let mut seen = HashSet::new();
        for card_type in CardType::ALL {
            for card in payload[card_type.as_str()].as_array().unwrap() {
                let id = card["id"].as_str().unwrap();
                assert!(id.starts_with("builtin-"), "id '{}' should be prefixed", id);
                assert!(seen.insert(id.to_string()), "duplicate id '{}'", id);
            }
        }
        assert_eq!(seen.len(), AssetLoader::count_cards(&payload));
    }
}
