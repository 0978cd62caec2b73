//! Import payload validation.
//!
//! Validation runs in three steps, all side-effect free:
//!
//! 1. [`ValidationEngine::check_format`]: the payload is an object with at
//!    least one card array.
//! 2. [`ValidationEngine::extract_definitions`]: the payload's own custom
//!    fields and variant types, needed to build the
//!    [`ValidationContext`] before any card is checked.
//! 3. [`ValidationEngine::validate_import_data`]: every card against its
//!    per-type validator and the context, collecting every
//!    [`FieldError`] rather than stopping at the first.
//!
//! A clean payload is then parsed into [`ValidatedImportData`], a typed and
//! immutable view whose cards are a [`RawCard`] union. Conversion only ever
//! sees validated data.
//!
//! Optional fields may be absent, `null` or an empty string. Only present
//! values of the wrong type are rejected.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::aggregation::{CandidateDefinitions, ValidationContext};
use super::error::{CatalogError, FieldError, Result};
use super::types::{
    CardSelectDisplay, CardType, CustomFieldDefinitions, VariantTypeDefinition, VariantTypeMap,
    CATEGORY_ANCESTRIES, CATEGORY_COMMUNITIES, CATEGORY_DOMAINS, CATEGORY_PROFESSIONS,
};

/// Payload and raw card keys.
pub mod keys {
    pub const CUSTOM_FIELD_DEFINITIONS: &str = "customFieldDefinitions";
    pub const VARIANTS: &str = "variants";
    pub const VARIANT_TYPES: &str = "variantTypes";
    pub const VARIANT: &str = "variant";

    pub const PACK_NAME: &str = "name";
    pub const PACK_VERSION: &str = "version";
    pub const PACK_DESCRIPTION: &str = "description";
    pub const PACK_AUTHOR: &str = "author";

    pub const ID: &str = "id";
    pub const NAME: &str = "名称";
    pub const INTRO: &str = "简介";
    pub const DESCRIPTION: &str = "描述";
    pub const EFFECT: &str = "效果";
    pub const LEVEL: &str = "等级";
    pub const IMAGE_URL: &str = "imageUrl";

    pub const DOMAIN_1: &str = "领域1";
    pub const DOMAIN_2: &str = "领域2";
    pub const STARTING_HIT_POINTS: &str = "起始生命";
    pub const STARTING_EVASION: &str = "起始闪避";
    pub const STARTING_ITEMS: &str = "起始物品";
    pub const HOPE_FEATURE: &str = "希望特性";
    pub const PROFESSION_FEATURE: &str = "职业特性";

    pub const ANCESTRY: &str = "种族";
    pub const ANCESTRY_CATEGORY: &str = "类别";

    pub const COMMUNITY_FEATURE: &str = "特性";

    pub const MAIN_PROFESSION: &str = "主职";
    pub const SUBCLASS: &str = "子职业";
    pub const SPELLCASTING: &str = "施法";

    pub const DOMAIN: &str = "领域";
    pub const ATTRIBUTE: &str = "属性";
    pub const RECALL: &str = "回想";

    pub const VARIANT_TYPE: &str = "类型";
    pub const VARIANT_SUBCATEGORY: &str = "子类别";
    pub const SHORT_INFO: &str = "简略信息";

    pub const SUBCLASSES: &str = "subclasses";
    pub const LEVEL_RANGE: &str = "levelRange";
}

// ============================================================================
// Typed raw cards
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProfession {
    pub id: String,
    #[serde(rename = "名称")]
    pub name: String,
    #[serde(rename = "简介", default)]
    pub intro: Option<String>,
    #[serde(rename = "领域1")]
    pub domain_1: String,
    #[serde(rename = "领域2")]
    pub domain_2: String,
    #[serde(rename = "起始生命", default)]
    pub starting_hit_points: Option<i64>,
    #[serde(rename = "起始闪避", default)]
    pub starting_evasion: Option<i64>,
    #[serde(rename = "起始物品", default)]
    pub starting_items: Option<String>,
    #[serde(rename = "希望特性", default)]
    pub hope_feature: Option<String>,
    #[serde(rename = "职业特性", default)]
    pub profession_feature: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAncestry {
    pub id: String,
    #[serde(rename = "名称")]
    pub name: String,
    #[serde(rename = "种族")]
    pub ancestry: String,
    #[serde(rename = "简介", default)]
    pub intro: Option<String>,
    #[serde(rename = "效果", default)]
    pub effect: Option<String>,
    #[serde(rename = "类别", default)]
    pub category: Option<i64>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommunity {
    pub id: String,
    #[serde(rename = "名称")]
    pub name: String,
    #[serde(rename = "特性", default)]
    pub feature: Option<String>,
    #[serde(rename = "简介", default)]
    pub intro: Option<String>,
    #[serde(rename = "描述", default)]
    pub description: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSubclass {
    pub id: String,
    #[serde(rename = "名称")]
    pub name: String,
    #[serde(rename = "描述", default)]
    pub description: Option<String>,
    #[serde(rename = "主职")]
    pub main_profession: String,
    #[serde(rename = "子职业")]
    pub subclass: String,
    /// Tier label (e.g. 基石, 专精, 大师).
    #[serde(rename = "等级", default)]
    pub tier: Option<String>,
    #[serde(rename = "施法", default)]
    pub spellcasting: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDomain {
    pub id: String,
    #[serde(rename = "名称")]
    pub name: String,
    #[serde(rename = "领域")]
    pub domain: String,
    #[serde(rename = "描述", default)]
    pub description: Option<String>,
    #[serde(rename = "等级", default)]
    pub level: Option<i64>,
    #[serde(rename = "属性", default)]
    pub attribute: Option<String>,
    #[serde(rename = "回想", default)]
    pub recall: Option<i64>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVariant {
    pub id: String,
    #[serde(rename = "名称")]
    pub name: String,
    #[serde(rename = "类型")]
    pub variant_type: String,
    #[serde(rename = "子类别", default)]
    pub subcategory: Option<String>,
    #[serde(rename = "等级", default)]
    pub level: Option<i64>,
    #[serde(rename = "效果", default)]
    pub effect: Option<String>,
    #[serde(rename = "简略信息", default)]
    pub short_info: Option<CardSelectDisplay>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

/// A validated raw card, tagged by its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawCard {
    Profession(RawProfession),
    Ancestry(RawAncestry),
    Community(RawCommunity),
    Subclass(RawSubclass),
    Domain(RawDomain),
    Variant(RawVariant),
}

impl RawCard {
    pub fn card_type(&self) -> CardType {
        match self {
            Self::Profession(_) => CardType::Profession,
            Self::Ancestry(_) => CardType::Ancestry,
            Self::Community(_) => CardType::Community,
            Self::Subclass(_) => CardType::Subclass,
            Self::Domain(_) => CardType::Domain,
            Self::Variant(_) => CardType::Variant,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Profession(c) => &c.id,
            Self::Ancestry(c) => &c.id,
            Self::Community(c) => &c.id,
            Self::Subclass(c) => &c.id,
            Self::Domain(c) => &c.id,
            Self::Variant(c) => &c.id,
        }
    }
}

/// Typed, immutable result of a clean validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedImportData {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub custom_field_definitions: CustomFieldDefinitions,
    pub variant_types: VariantTypeMap,
    /// Cards in payload order, grouped by type.
    pub cards: Vec<RawCard>,
}

impl ValidatedImportData {
    pub fn card_ids(&self) -> impl Iterator<Item = &str> {
        self.cards.iter().map(RawCard::id)
    }
}

// ============================================================================
// Field checker
// ============================================================================

/// Collects errors for one object under a path prefix.
struct Checker<'a> {
    prefix: String,
    obj: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Checker<'a> {
    fn path(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }

    fn push(&mut self, key: &str, message: impl Into<String>, value: &Value) {
        let path = self.path(key);
        self.errors.push(FieldError::new(path, message).with_value(value));
    }

    fn required_str(&mut self, key: &str) -> Option<&'a str> {
        let obj = self.obj;
        match obj.get(key) {
            None | Some(Value::Null) => {
                let path = self.path(key);
                self.errors.push(FieldError::new(path, "is required"));
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.push(key, "must not be empty", &Value::String(s.clone()));
                None
            }
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.push(key, "must be a string", other);
                None
            }
        }
    }

    fn optional_str(&mut self, key: &str) -> Option<&'a str> {
        let obj = self.obj;
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.push(key, "must be a string", other);
                None
            }
        }
    }

    fn optional_int(&mut self, key: &str) -> Option<i64> {
        let obj = self.obj;
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(value) => match value.as_i64() {
                Some(n) => Some(n),
                None => {
                    self.push(key, "must be an integer", value);
                    None
                }
            },
        }
    }

    fn optional_display(&mut self, key: &str) {
        let obj = self.obj;
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.trim().is_empty() => {}
            Some(Value::Object(items)) => {
                for (item, value) in items {
                    if !value.is_null() && !value.is_string() {
                        let path = format!("{}.{}.{}", self.prefix, key, item);
                        self.errors
                            .push(FieldError::new(path, "must be a string").with_value(value));
                    }
                }
            }
            Some(other) => self.push(key, "must be an object", other),
        }
    }

    /// Taxonomy membership against the context.
    fn member(
        &mut self,
        key: &str,
        value: &str,
        ctx: &ValidationContext,
        category: &str,
        label: &str,
    ) {
        if ctx.has_field(category, value) {
            return;
        }
        let message = format!(
            "unknown {} '{}'; valid {}: {}",
            label,
            value,
            category,
            list_or_none(ctx.field_names(category).iter().map(String::as_str))
        );
        self.push(key, message, &Value::String(value.to_string()));
    }
}

fn list_or_none<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let joined = names.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined
    }
}

fn check_card(
    card_type: CardType,
    index: usize,
    raw: &Value,
    body: impl FnOnce(&mut Checker<'_>),
) -> Vec<FieldError> {
    let prefix = format!("{}[{}]", card_type, index);
    let Some(obj) = raw.as_object() else {
        return vec![FieldError::new(prefix, "must be an object").with_value(raw)];
    };
    let mut checker = Checker {
        prefix,
        obj,
        errors: Vec::new(),
    };
    body(&mut checker);
    checker.errors
}

// ============================================================================
// Per-type validators
// ============================================================================

/// Signature shared by the per-type validators.
pub type CardValidatorFn = fn(&Value, usize, &ValidationContext) -> Vec<FieldError>;

pub fn validate_profession(raw: &Value, index: usize, ctx: &ValidationContext) -> Vec<FieldError> {
    check_card(CardType::Profession, index, raw, |c| {
        c.required_str(keys::ID);
        if let Some(name) = c.required_str(keys::NAME) {
            c.member(keys::NAME, name, ctx, CATEGORY_PROFESSIONS, "profession");
        }
        for key in [keys::DOMAIN_1, keys::DOMAIN_2] {
            if let Some(domain) = c.required_str(key) {
                c.member(key, domain, ctx, CATEGORY_DOMAINS, "domain");
            }
        }
        c.optional_int(keys::STARTING_HIT_POINTS);
        c.optional_int(keys::STARTING_EVASION);
        for key in [
            keys::INTRO,
            keys::STARTING_ITEMS,
            keys::HOPE_FEATURE,
            keys::PROFESSION_FEATURE,
            keys::IMAGE_URL,
        ] {
            c.optional_str(key);
        }
    })
}

pub fn validate_ancestry(raw: &Value, index: usize, ctx: &ValidationContext) -> Vec<FieldError> {
    check_card(CardType::Ancestry, index, raw, |c| {
        c.required_str(keys::ID);
        c.required_str(keys::NAME);
        if let Some(ancestry) = c.required_str(keys::ANCESTRY) {
            c.member(keys::ANCESTRY, ancestry, ctx, CATEGORY_ANCESTRIES, "ancestry");
        }
        c.optional_int(keys::ANCESTRY_CATEGORY);
        for key in [keys::INTRO, keys::EFFECT, keys::IMAGE_URL] {
            c.optional_str(key);
        }
    })
}

pub fn validate_community(raw: &Value, index: usize, ctx: &ValidationContext) -> Vec<FieldError> {
    check_card(CardType::Community, index, raw, |c| {
        c.required_str(keys::ID);
        if let Some(name) = c.required_str(keys::NAME) {
            c.member(keys::NAME, name, ctx, CATEGORY_COMMUNITIES, "community");
        }
        for key in [
            keys::COMMUNITY_FEATURE,
            keys::INTRO,
            keys::DESCRIPTION,
            keys::IMAGE_URL,
        ] {
            c.optional_str(key);
        }
    })
}

pub fn validate_subclass(raw: &Value, index: usize, ctx: &ValidationContext) -> Vec<FieldError> {
    check_card(CardType::Subclass, index, raw, |c| {
        c.required_str(keys::ID);
        c.required_str(keys::NAME);
        if let Some(profession) = c.required_str(keys::MAIN_PROFESSION) {
            c.member(keys::MAIN_PROFESSION, profession, ctx, CATEGORY_PROFESSIONS, "profession");
        }
        c.required_str(keys::SUBCLASS);
        for key in [keys::DESCRIPTION, keys::LEVEL, keys::SPELLCASTING, keys::IMAGE_URL] {
            c.optional_str(key);
        }
    })
}

pub fn validate_domain(raw: &Value, index: usize, ctx: &ValidationContext) -> Vec<FieldError> {
    check_card(CardType::Domain, index, raw, |c| {
        c.required_str(keys::ID);
        c.required_str(keys::NAME);
        if let Some(domain) = c.required_str(keys::DOMAIN) {
            c.member(keys::DOMAIN, domain, ctx, CATEGORY_DOMAINS, "domain");
        }
        c.optional_int(keys::LEVEL);
        c.optional_int(keys::RECALL);
        for key in [keys::DESCRIPTION, keys::ATTRIBUTE, keys::IMAGE_URL] {
            c.optional_str(key);
        }
    })
}

pub fn validate_variant(raw: &Value, index: usize, ctx: &ValidationContext) -> Vec<FieldError> {
    check_card(CardType::Variant, index, raw, |c| {
        c.required_str(keys::ID);
        c.required_str(keys::NAME);

        let definition = match c.required_str(keys::VARIANT_TYPE) {
            Some(type_id) => match ctx.variant_type(type_id) {
                Some(def) => Some((type_id, def)),
                None => {
                    let message = format!(
                        "unknown variant type '{}'; valid types: {}",
                        type_id,
                        list_or_none(ctx.variant_type_ids().into_iter())
                    );
                    c.push(keys::VARIANT_TYPE, message, &Value::String(type_id.to_string()));
                    None
                }
            },
            None => None,
        };

        let subcategory = c.optional_str(keys::VARIANT_SUBCATEGORY).map(str::trim);
        let level = c.optional_int(keys::LEVEL);
        if let Some((type_id, def)) = definition {
            if let Some(sub) = subcategory {
                if !def.accepts_subclass(sub) {
                    let message = format!(
                        "subclass '{}' is not allowed for variant type '{}'; valid subclasses: {}",
                        sub,
                        type_id,
                        list_or_none(def.subclasses.iter().map(String::as_str))
                    );
                    c.push(keys::VARIANT_SUBCATEGORY, message, &Value::String(sub.to_string()));
                }
            }
            if let Some(level) = level {
                if !def.accepts_level(level) {
                    let message = format!(
                        "level {} is outside the range [{}, {}] of variant type '{}'",
                        level, def.level_range[0], def.level_range[1], type_id
                    );
                    c.push(keys::LEVEL, message, &Value::from(level));
                }
            }
        }

        c.optional_str(keys::EFFECT);
        c.optional_str(keys::IMAGE_URL);
        c.optional_display(keys::SHORT_INFO);
    })
}

/// Validator for one card type.
pub fn validator_for(card_type: CardType) -> CardValidatorFn {
    match card_type {
        CardType::Profession => validate_profession,
        CardType::Ancestry => validate_ancestry,
        CardType::Community => validate_community,
        CardType::Subclass => validate_subclass,
        CardType::Domain => validate_domain,
        CardType::Variant => validate_variant,
    }
}

// ============================================================================
// Definition validators
// ============================================================================

/// Check a `variantTypes` map: well-formed ids, string-array subclasses and
/// an ordered `[min, max]` integer level range.
pub fn validate_variant_type_definitions(value: &Value) -> Vec<FieldError> {
    let base = format!("{}.{}", keys::CUSTOM_FIELD_DEFINITIONS, keys::VARIANT_TYPES);
    let Some(types) = value.as_object() else {
        return vec![FieldError::new(base, "must be an object").with_value(value)];
    };

    let mut errors = Vec::new();
    for (type_id, def) in types {
        let path = format!("{}.{}", base, type_id);
        if !is_well_formed_type_id(type_id) {
            errors.push(
                FieldError::new(&path, "variant type id must be non-empty without surrounding whitespace")
                    .with_value(&Value::String(type_id.clone())),
            );
        }
        let Some(def) = def.as_object() else {
            errors.push(FieldError::new(&path, "must be an object").with_value(def));
            continue;
        };
        let mut checker = Checker {
            prefix: path,
            obj: def,
            errors: Vec::new(),
        };
        checker.optional_str("description");

        match def.get(keys::SUBCLASSES) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        let item_path = format!("{}.{}[{}]", checker.prefix, keys::SUBCLASSES, i);
                        checker
                            .errors
                            .push(FieldError::new(item_path, "must be a string").with_value(item));
                    }
                }
            }
            Some(other) => checker.push(keys::SUBCLASSES, "must be an array of strings", other),
        }

        match def.get(keys::LEVEL_RANGE) {
            Some(Value::Array(bounds))
                if bounds.len() == 2 && bounds.iter().all(|b| b.as_i64().is_some()) =>
            {
                let (min, max) = (bounds[0].as_i64(), bounds[1].as_i64());
                if min > max {
                    checker.push(
                        keys::LEVEL_RANGE,
                        "minimum must not exceed maximum",
                        &Value::Array(bounds.clone()),
                    );
                }
            }
            None => {
                let path = checker.path(keys::LEVEL_RANGE);
                checker.errors.push(FieldError::new(path, "is required"));
            }
            Some(other) => {
                checker.push(keys::LEVEL_RANGE, "must be a pair of integers [min, max]", other)
            }
        }
        errors.extend(checker.errors);
    }
    errors
}

fn is_well_formed_type_id(id: &str) -> bool {
    !id.is_empty() && id.trim() == id && !id.chars().any(char::is_control)
}

// ============================================================================
// ValidationEngine
// ============================================================================

/// Stateless validator over raw import payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationEngine;

impl ValidationEngine {
    pub fn new() -> Self {
        Self
    }

    /// The payload must be an object carrying at least one card array.
    pub fn check_format(&self, payload: &Value) -> Result<()> {
        let Some(obj) = payload.as_object() else {
            return Err(CatalogError::Format("payload must be a JSON object".to_string()));
        };
        let has_cards = CardType::ALL
            .iter()
            .any(|t| obj.get(t.as_str()).is_some_and(Value::is_array));
        if !has_cards {
            return Err(CatalogError::Format(format!(
                "no card arrays found; expected one of: {}",
                CardType::ALL.map(|t| t.as_str()).join(", ")
            )));
        }
        Ok(())
    }

    /// Read the payload's declared custom fields and variant types.
    pub fn extract_definitions(
        &self,
        payload: &Value,
    ) -> std::result::Result<CandidateDefinitions, Vec<FieldError>> {
        let mut candidate = CandidateDefinitions::default();
        let defs = match payload.get(keys::CUSTOM_FIELD_DEFINITIONS) {
            None | Some(Value::Null) => return Ok(candidate),
            Some(Value::Object(defs)) => defs,
            Some(other) => {
                return Err(vec![FieldError::new(
                    keys::CUSTOM_FIELD_DEFINITIONS,
                    "must be an object",
                )
                .with_value(other)]);
            }
        };

        let mut errors = Vec::new();
        for (category, value) in defs {
            if category == keys::VARIANTS {
                continue;
            }
            if category == keys::VARIANT_TYPES {
                let type_errors = validate_variant_type_definitions(value);
                if type_errors.is_empty() {
                    match serde_json::from_value::<VariantTypeMap>(value.clone()) {
                        Ok(types) => candidate.variant_types = types,
                        Err(e) => errors.push(FieldError::new(
                            format!("{}.{}", keys::CUSTOM_FIELD_DEFINITIONS, keys::VARIANT_TYPES),
                            e.to_string(),
                        )),
                    }
                }
                errors.extend(type_errors);
                continue;
            }

            let path = format!("{}.{}", keys::CUSTOM_FIELD_DEFINITIONS, category);
            let Some(items) = value.as_array() else {
                errors.push(FieldError::new(path, "must be an array of strings").with_value(value));
                continue;
            };
            let mut names: Vec<String> = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(name) if !name.trim().is_empty() => {
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
            candidate.custom_fields.insert(category.clone(), names);
        }

        if errors.is_empty() {
            Ok(candidate)
        } else {
            Err(errors)
        }
    }

    /// Run every validator over the payload. An empty list means valid.
    pub fn validate_import_data(
        &self,
        payload: &Value,
        ctx: &ValidationContext,
    ) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let Some(obj) = payload.as_object() else {
            errors.push(FieldError::new("$", "payload must be a JSON object").with_value(payload));
            return errors;
        };

        for key in [
            keys::PACK_NAME,
            keys::PACK_VERSION,
            keys::PACK_DESCRIPTION,
            keys::PACK_AUTHOR,
        ] {
            if let Some(value) = obj.get(key) {
                if !value.is_null() && !value.is_string() {
                    errors.push(FieldError::new(key, "must be a string").with_value(value));
                }
            }
        }

        if let Some(types) = obj
            .get(keys::CUSTOM_FIELD_DEFINITIONS)
            .and_then(|d| d.get(keys::VARIANT_TYPES))
        {
            errors.extend(validate_variant_type_definitions(types));
        }

        for card_type in CardType::ALL {
            let Some(value) = obj.get(card_type.as_str()) else {
                continue;
            };
            let Some(cards) = value.as_array() else {
                if !value.is_null() {
                    errors.push(
                        FieldError::new(card_type.as_str(), "must be an array").with_value(value),
                    );
                }
                continue;
            };
            let validate = validator_for(card_type);
            for (index, raw) in cards.iter().enumerate() {
                errors.extend(validate(raw, index, ctx));
            }
        }

        if !errors.is_empty() {
            log::debug!("Import payload failed validation with {} error(s)", errors.len());
        }
        errors
    }

    /// Parse a payload that passed [`validate_import_data`](Self::validate_import_data).
    pub fn into_validated(
        &self,
        payload: &Value,
        definitions: CandidateDefinitions,
    ) -> Result<ValidatedImportData> {
        let obj = payload
            .as_object()
            .ok_or_else(|| CatalogError::Format("payload must be a JSON object".to_string()))?;
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let mut cards = Vec::new();
        let mut errors = Vec::new();
        for card_type in CardType::ALL {
            let Some(items) = obj.get(card_type.as_str()).and_then(Value::as_array) else {
                continue;
            };
            for (index, raw) in items.iter().enumerate() {
                match parse_card(card_type, raw) {
                    Ok(card) => cards.push(card),
                    Err(e) => errors.push(FieldError::new(
                        format!("{}[{}]", card_type, index),
                        e.to_string(),
                    )),
                }
            }
        }
        if !errors.is_empty() {
            return Err(CatalogError::FieldValidation { errors });
        }

        Ok(ValidatedImportData {
            name: text(keys::PACK_NAME),
            version: text(keys::PACK_VERSION),
            description: text(keys::PACK_DESCRIPTION),
            author: text(keys::PACK_AUTHOR),
            custom_field_definitions: definitions.custom_fields,
            variant_types: definitions.variant_types,
            cards,
        })
    }
}

/// Drop `null` and blank-string entries so optional fields deserialize as `None`.
fn strip_blank(raw: &Value) -> Value {
    match raw {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(_, v)| match v {
                    Value::Null => false,
                    Value::String(s) => !s.trim().is_empty(),
                    _ => true,
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn typed<T: DeserializeOwned>(raw: &Value) -> serde_json::Result<T> {
    serde_json::from_value(strip_blank(raw))
}

fn parse_card(card_type: CardType, raw: &Value) -> serde_json::Result<RawCard> {
    Ok(match card_type {
        CardType::Profession => RawCard::Profession(typed(raw)?),
        CardType::Ancestry => RawCard::Ancestry(typed(raw)?),
        CardType::Community => RawCard::Community(typed(raw)?),
        CardType::Subclass => RawCard::Subclass(typed(raw)?),
        CardType::Domain => RawCard::Domain(typed(raw)?),
        CardType::Variant => RawCard::Variant(typed(raw)?),
    })
}

/// One-line summary of a variant type definition.
pub fn describe_variant_type(def: &VariantTypeDefinition) -> String {
    format!(
        "subclasses: [{}], levels {}..={}",
        def.subclasses.join(", "),
        def.level_range[0],
        def.level_range[1]
    )
}
