//! Raw card to standard card conversion.
//!
//! [`CardConverter`] is the seam for the per-type structural mappers. The
//! import pipeline only hands converters data that already passed validation,
//! so [`StandardCardConverter`] does not fail on any [`RawCard`]. Other
//! implementations may still return [`CatalogError::Conversion`]; the
//! pipeline turns that into a failed import.

use super::error::{CatalogError, Result};
use super::types::{Card, CardSelectDisplay, CardType, ProfessionSpecial, VariantSpecial};
use super::validation::{
    RawAncestry, RawCard, RawCommunity, RawDomain, RawProfession, RawSubclass, RawVariant,
};

/// Maps validated raw cards onto [`Card`].
pub trait CardConverter: Send + Sync {
    fn convert(&self, raw: &RawCard) -> Result<Card>;

    /// Convert every card, failing on the first error.
    fn convert_all(&self, raw: &[RawCard]) -> Result<Vec<Card>> {
        raw.iter()
            .enumerate()
            .map(|(i, card)| {
                self.convert(card).map_err(|e| match e {
                    CatalogError::Conversion { .. } => e,
                    other => CatalogError::Conversion {
                        path: format!("{}[{}]", card.card_type(), i),
                        reason: other.to_string(),
                    },
                })
            })
            .collect()
    }
}

/// The built-in mappers for the six card types.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardCardConverter;

impl CardConverter for StandardCardConverter {
    fn convert(&self, raw: &RawCard) -> Result<Card> {
        let card = match raw {
            RawCard::Profession(p) => profession(p),
            RawCard::Ancestry(a) => ancestry(a),
            RawCard::Community(c) => community(c),
            RawCard::Subclass(s) => subclass(s),
            RawCard::Domain(d) => domain(d),
            RawCard::Variant(v) => variant(v),
        };
        Ok(card)
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn profession(raw: &RawProfession) -> Card {
    let mut card = Card::new(&raw.id, &raw.name, CardType::Profession)
        .with_class(&raw.name)
        .with_description(text(&raw.profession_feature));
    card.hint = raw.intro.clone();
    card.image_url = raw.image_url.clone();
    card.header_display = Some(raw.name.clone());
    card.card_select_display = CardSelectDisplay {
        item1: Some(format!("{} / {}", raw.domain_1, raw.domain_2)),
        item2: raw.starting_hit_points.map(|hp| format!("起始生命 {}", hp)),
        item3: raw.starting_evasion.map(|ev| format!("起始闪避 {}", ev)),
        item4: None,
    };
    card.profession_special = Some(ProfessionSpecial {
        starting_hit_points: raw.starting_hit_points,
        starting_evasion: raw.starting_evasion,
        starting_items: raw.starting_items.clone(),
        hope_feature: raw.hope_feature.clone(),
        domains: vec![raw.domain_1.clone(), raw.domain_2.clone()],
    });
    card
}

fn ancestry(raw: &RawAncestry) -> Card {
    let mut card = Card::new(&raw.id, &raw.name, CardType::Ancestry)
        .with_class(&raw.ancestry)
        .with_description(text(&raw.effect));
    card.level = raw.category;
    card.hint = raw.intro.clone();
    card.image_url = raw.image_url.clone();
    card.header_display = Some(raw.ancestry.clone());
    card.card_select_display.item1 = Some(raw.ancestry.clone());
    card.card_select_display.item2 = raw.category.map(|c| format!("类别 {}", c));
    card
}

fn community(raw: &RawCommunity) -> Card {
    let mut card = Card::new(&raw.id, &raw.name, CardType::Community)
        .with_class(&raw.name)
        .with_description(text(&raw.feature));
    card.hint = raw.intro.clone().or_else(|| raw.description.clone());
    card.image_url = raw.image_url.clone();
    card.header_display = Some(raw.name.clone());
    card.card_select_display.item1 = raw.intro.clone();
    card
}

fn subclass(raw: &RawSubclass) -> Card {
    let mut card = Card::new(&raw.id, &raw.name, CardType::Subclass)
        .with_class(&raw.main_profession)
        .with_description(text(&raw.description));
    card.image_url = raw.image_url.clone();
    card.header_display = Some(raw.subclass.clone());
    card.card_select_display = CardSelectDisplay {
        item1: Some(raw.main_profession.clone()),
        item2: Some(raw.subclass.clone()),
        item3: raw.tier.clone(),
        item4: raw.spellcasting.clone(),
    };
    card
}

fn domain(raw: &RawDomain) -> Card {
    let mut card = Card::new(&raw.id, &raw.name, CardType::Domain)
        .with_class(&raw.domain)
        .with_description(text(&raw.description));
    card.level = raw.level;
    card.image_url = raw.image_url.clone();
    card.header_display = Some(raw.domain.clone());
    card.card_select_display = CardSelectDisplay {
        item1: Some(raw.domain.clone()),
        item2: raw.level.map(|l| format!("等级 {}", l)),
        item3: raw.attribute.clone(),
        item4: raw.recall.map(|r| format!("回想 {}", r)),
    };
    card
}

fn variant(raw: &RawVariant) -> Card {
    let mut card = Card::new(&raw.id, &raw.name, CardType::Variant)
        .with_class(&raw.variant_type)
        .with_description(text(&raw.effect));
    card.level = raw.level;
    card.image_url = raw.image_url.clone();
    card.header_display = Some(raw.variant_type.clone());
    card.card_select_display = raw.short_info.clone().unwrap_or_default();
    card.variant_special = Some(VariantSpecial {
        real_type: raw.variant_type.clone(),
        subcategory: raw
            .subcategory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
    });
    card
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_variant() -> RawVariant {
        RawVariant {
            id: "v1".into(),
            name: "苹果".into(),
            variant_type: "食物".into(),
            subcategory: Some("水果".into()),
            level: Some(2),
            effect: Some("回复1点生命".into()),
            short_info: None,
            image_url: None,
        }
    }

    #[test]
    fn test_profession_conversion() {
        let raw = RawCard::Profession(RawProfession {
            id: "p-bard".into(),
            name: "吟游诗人".into(),
            intro: Some("以歌声鼓舞同伴".into()),
            domain_1: "优雅".into(),
            domain_2: "法典".into(),
            starting_hit_points: Some(5),
            starting_evasion: Some(10),
            starting_items: None,
            hope_feature: Some("激励".into()),
            profession_feature: Some("激昂之歌".into()),
            image_url: None,
        });

        let card = StandardCardConverter.convert(&raw).unwrap();
        assert_eq!(card.card_type, CardType::Profession);
        assert_eq!(card.class, "吟游诗人");
        assert_eq!(card.description, "激昂之歌");
        let special = card.profession_special.unwrap();
        assert_eq!(special.domains, vec!["优雅", "法典"]);
        assert_eq!(special.starting_evasion, Some(10));
        assert_eq!(card.card_select_display.item1.as_deref(), Some("优雅 / 法典"));
    }

    #[test]
    fn test_variant_conversion_carries_real_type() {
        let card = StandardCardConverter
            .convert(&RawCard::Variant(raw_variant()))
            .unwrap();
        assert_eq!(card.class, "食物");
        assert_eq!(card.level, Some(2));
        let special = card.variant_special.unwrap();
        assert_eq!(special.real_type, "食物");
        assert_eq!(special.subcategory.as_deref(), Some("水果"));
    }

    #[test]
    fn test_variant_subcategory_is_trimmed() {
        let mut raw = raw_variant();
        raw.subcategory = Some(" 水果 ".into());
        let card = StandardCardConverter.convert(&RawCard::Variant(raw)).unwrap();
        assert_eq!(
            card.variant_special.unwrap().subcategory.as_deref(),
            Some("水果")
        );
    }

    #[test]
    fn test_converted_cards_start_custom_and_unowned() {
        let card = StandardCardConverter
            .convert(&RawCard::Variant(raw_variant()))
            .unwrap();
        assert!(card.batch_id.is_none());
        assert_eq!(card.source, crate::core::catalog::types::CardSource::Custom);
    }

    struct FailingConverter;

    impl CardConverter for FailingConverter {
        fn convert(&self, _raw: &RawCard) -> Result<Card> {
            Err(CatalogError::Format("boom".into()))
        }
    }

    #[test]
    fn test_convert_all_wraps_errors_with_path() {
        let cards = vec![RawCard::Variant(raw_variant())];
        let err = FailingConverter.convert_all(&cards).unwrap_err();
        match err {
            CatalogError::Conversion { path, .. } => assert_eq!(path, "variant[0]"),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
