//! Core data models for the card catalog.
//!
//! - [`Card`]: a standardized card, whatever pack it came from
//! - [`CardType`]: the fixed set of card categories
//! - [`BatchRecord`]: the persisted payload of one imported pack
//! - [`Batch`]: the in-memory view of a pack (record metadata + index flags)
//! - [`CatalogIndex`]: the summary projection persisted under one key
//!
//! All persisted types use `#[serde(rename_all = "camelCase")]` so stored
//! records stay compatible with the browser-era layout.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Fixed id of the built-in batch.
pub const SYSTEM_BATCH_ID: &str = "SYSTEM_BUILTIN_CARDS";

/// Display name of the built-in batch.
pub const SYSTEM_BATCH_NAME: &str = "Built-in Cards";

/// Custom field categories the validators know about.
pub const CATEGORY_PROFESSIONS: &str = "professions";
pub const CATEGORY_ANCESTRIES: &str = "ancestries";
pub const CATEGORY_COMMUNITIES: &str = "communities";
pub const CATEGORY_DOMAINS: &str = "domains";

/// Category → taxonomy names.
pub type CustomFieldDefinitions = BTreeMap<String, Vec<String>>;

/// Variant type id → definition.
pub type VariantTypeMap = BTreeMap<String, VariantTypeDefinition>;

// ============================================================================
// CardType
// ============================================================================

/// Card category. Serializes lowercase, matching payload array keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Profession,
    Ancestry,
    Community,
    Subclass,
    Domain,
    Variant,
}

impl CardType {
    /// All card types in payload order.
    pub const ALL: [CardType; 6] = [
        CardType::Profession,
        CardType::Ancestry,
        CardType::Community,
        CardType::Subclass,
        CardType::Domain,
        CardType::Variant,
    ];

    /// Key of this type's card array in an import payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profession => "profession",
            Self::Ancestry => "ancestry",
            Self::Community => "community",
            Self::Subclass => "subclass",
            Self::Domain => "domain",
            Self::Variant => "variant",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CardType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CardType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown card type '{}'", s))
    }
}

// ============================================================================
// Card
// ============================================================================

/// Where a card came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CardSource {
    Builtin,
    #[default]
    Custom,
}

/// Short display lines shown in card pickers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CardSelectDisplay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item4: Option<String>,
}

/// Profession starting stats.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfessionSpecial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_hit_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_evasion: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_items: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hope_feature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
}

/// Variant "real type" and subcategory.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSpecial {
    pub real_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
}

/// A standardized card.
///
/// Immutable once imported, apart from the one-time image URL backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub card_type: CardType,
    /// Free-form taxonomy value (profession name, domain name, variant type...).
    #[serde(default)]
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_display: Option<String>,
    #[serde(default)]
    pub card_select_display: CardSelectDisplay,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profession_special: Option<ProfessionSpecial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_special: Option<VariantSpecial>,
    /// Owning batch (back-reference only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
    #[serde(default)]
    pub source: CardSource,
}

impl Card {
    /// Minimal card; converters fill in the rest.
    pub fn new(id: impl Into<String>, name: impl Into<String>, card_type: CardType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            card_type,
            class: String::new(),
            level: None,
            description: String::new(),
            hint: None,
            image_url: None,
            header_display: None,
            card_select_display: CardSelectDisplay::default(),
            profession_special: None,
            variant_special: None,
            batch_id: None,
            batch_name: None,
            source: CardSource::Custom,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    pub fn with_level(mut self, level: i64) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn has_image_url(&self) -> bool {
        self.image_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

// ============================================================================
// Variant types
// ============================================================================

/// User-defined variant category with its allowed subclasses and levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantTypeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub subclasses: Vec<String>,
    /// `[min, max]`, inclusive.
    pub level_range: [i64; 2],
}

impl VariantTypeDefinition {
    /// Default level range for a variant type with no observed levels.
    pub const DEFAULT_LEVEL_RANGE: [i64; 2] = [1, 10];

    pub fn new(subclasses: Vec<String>, level_range: [i64; 2]) -> Self {
        Self {
            description: None,
            subclasses,
            level_range,
        }
    }

    /// Whether `level` falls inside the declared range.
    pub fn accepts_level(&self, level: i64) -> bool {
        level >= self.level_range[0] && level <= self.level_range[1]
    }

    /// Whether `subclass` is allowed. An empty subclass list is unrestricted.
    /// Both sides compare trimmed.
    pub fn accepts_subclass(&self, subclass: &str) -> bool {
        let subclass = subclass.trim();
        self.subclasses.is_empty() || self.subclasses.iter().any(|s| s.trim() == subclass)
    }
}

impl Default for VariantTypeDefinition {
    fn default() -> Self {
        Self::new(Vec::new(), Self::DEFAULT_LEVEL_RANGE)
    }
}

// ============================================================================
// Batch records
// ============================================================================

/// Persisted metadata header of a batch record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub id: String,
    pub name: String,
    pub file_name: String,
    pub import_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// The persisted payload of one batch (one key per batch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub metadata: BatchMetadata,
    pub cards: Vec<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_field_definitions: Option<CustomFieldDefinitions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_types: Option<VariantTypeMap>,
}

impl BatchRecord {
    /// Distinct card types in this record, sorted.
    pub fn card_types(&self) -> Vec<CardType> {
        self.cards
            .iter()
            .map(|c| c.card_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Byte estimate: the length of the serialized record.
    pub fn estimate_size(&self) -> u64 {
        serde_json::to_vec(self).map(|v| v.len() as u64).unwrap_or(0)
    }
}

// ============================================================================
// Index
// ============================================================================

/// Lightweight mirror of a batch kept in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    pub id: String,
    pub name: String,
    pub file_name: String,
    pub import_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub card_count: usize,
    #[serde(default)]
    pub card_types: Vec<CardType>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_system_batch: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl BatchInfo {
    /// Build the index mirror for a record about to be saved.
    pub fn from_record(record: &BatchRecord, size: u64) -> Self {
        Self {
            id: record.metadata.id.clone(),
            name: record.metadata.name.clone(),
            file_name: record.metadata.file_name.clone(),
            import_time: record.metadata.import_time,
            version: record.metadata.version.clone(),
            card_count: record.cards.len(),
            card_types: record.card_types(),
            size,
            is_system_batch: record.metadata.id == SYSTEM_BATCH_ID,
            disabled: false,
        }
    }
}

/// Summary projection persisted under the index key.
///
/// `total_cards == Σ card_count` and `total_batches == batches.len()` after
/// every successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogIndex {
    #[serde(default)]
    pub batches: IndexMap<String, BatchInfo>,
    #[serde(default)]
    pub total_cards: usize,
    #[serde(default)]
    pub total_batches: usize,
    pub last_update: DateTime<Utc>,
}

impl Default for CatalogIndex {
    fn default() -> Self {
        Self {
            batches: IndexMap::new(),
            total_cards: 0,
            total_batches: 0,
            last_update: Utc::now(),
        }
    }
}

impl CatalogIndex {
    /// Recompute totals from the batch mirrors and bump `last_update`.
    pub fn recompute_totals(&mut self) {
        self.total_cards = self.batches.values().map(|b| b.card_count).sum();
        self.total_batches = self.batches.len();
        self.last_update = Utc::now();
    }

    /// Whether the stored totals agree with the batch mirrors.
    pub fn totals_consistent(&self) -> bool {
        self.total_cards == self.batches.values().map(|b| b.card_count).sum::<usize>()
            && self.total_batches == self.batches.len()
    }
}

// ============================================================================
// Batch - in-memory view
// ============================================================================

/// In-memory batch: record metadata joined with index flags and the
/// definitions it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub file_name: String,
    pub import_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub card_count: usize,
    pub card_types: Vec<CardType>,
    pub size: u64,
    pub is_system_batch: bool,
    pub disabled: bool,
    /// Ids of the cards this batch owns.
    pub card_ids: Vec<String>,
    pub custom_field_definitions: CustomFieldDefinitions,
    pub variant_types: VariantTypeMap,
}

impl Batch {
    /// Join a stored record with its index mirror.
    pub fn from_parts(record: &BatchRecord, info: &BatchInfo) -> Self {
        Self {
            id: record.metadata.id.clone(),
            name: record.metadata.name.clone(),
            file_name: record.metadata.file_name.clone(),
            import_time: record.metadata.import_time,
            version: record.metadata.version.clone(),
            description: record.metadata.description.clone(),
            author: record.metadata.author.clone(),
            card_count: record.cards.len(),
            card_types: record.card_types(),
            size: info.size,
            is_system_batch: info.is_system_batch,
            disabled: info.disabled,
            card_ids: record.cards.iter().map(|c| c.id.clone()).collect(),
            custom_field_definitions: record.custom_field_definitions.clone().unwrap_or_default(),
            variant_types: record.variant_types.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> BatchRecord {
        BatchRecord {
            metadata: BatchMetadata {
                id: "batch_1".to_string(),
                name: "Pack".to_string(),
                file_name: "pack.json".to_string(),
                import_time: Utc::now(),
                version: Some("1.0.0".to_string()),
                description: None,
                author: None,
            },
            cards: vec![
                Card::new("v1", "Apple", CardType::Variant),
                Card::new("p1", "Bard", CardType::Profession),
                Card::new("v2", "Pear", CardType::Variant),
            ],
            custom_field_definitions: None,
            variant_types: None,
        }
    }

    #[test]
    fn test_card_type_roundtrip_str() {
        for t in CardType::ALL {
            assert_eq!(t.as_str().parse::<CardType>().unwrap(), t);
        }
        assert!("spell".parse::<CardType>().is_err());
    }

    #[test]
    fn test_card_serializes_type_field() {
        let card = Card::new("c1", "Bard", CardType::Profession);
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["type"], "profession");
        assert_eq!(value["source"], "custom");
        assert!(value.get("imageUrl").is_none());
    }

    #[test]
    fn test_record_card_types_sorted_and_deduplicated() {
        let record = sample_record();
        assert_eq!(record.card_types(), vec![CardType::Profession, CardType::Variant]);
    }

    #[test]
    fn test_batch_info_from_record() {
        let record = sample_record();
        let info = BatchInfo::from_record(&record, 42);
        assert_eq!(info.card_count, 3);
        assert_eq!(info.size, 42);
        assert!(!info.is_system_batch);
        assert!(!info.disabled);
    }

    #[test]
    fn test_index_recompute_totals() {
        let record = sample_record();
        let mut index = CatalogIndex::default();
        index
            .batches
            .insert("batch_1".to_string(), BatchInfo::from_record(&record, 10));
        assert!(!index.totals_consistent());
        index.recompute_totals();
        assert_eq!(index.total_cards, 3);
        assert_eq!(index.total_batches, 1);
        assert!(index.totals_consistent());
    }

    #[test]
    fn test_index_flags_omitted_when_false() {
        let record = sample_record();
        let info = BatchInfo::from_record(&record, 10);
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("disabled").is_none());
        assert!(value.get("isSystemBatch").is_none());
    }

    #[test]
    fn test_variant_type_accepts() {
        let def = VariantTypeDefinition::new(vec!["水果".to_string()], [2, 5]);
        assert!(def.accepts_level(2));
        assert!(def.accepts_level(5));
        assert!(!def.accepts_level(6));
        assert!(def.accepts_subclass("水果"));
        assert!(!def.accepts_subclass("蔬菜"));
        assert!(VariantTypeDefinition::default().accepts_subclass("anything"));
    }

    #[test]
    fn test_variant_subclass_compare_ignores_padding() {
        let def = VariantTypeDefinition::new(vec![" 水果".to_string()], [1, 10]);
        assert!(def.accepts_subclass("水果"));
        assert!(def.accepts_subclass("水果 "));
        assert!(!def.accepts_subclass("蔬菜"));
    }
}
