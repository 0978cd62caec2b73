//! In-memory catalog state.
//!
//! [`UnifiedCardState`] holds three structures kept consistent by full
//! rebuilds after every mutation:
//!
//! - `cards`: id to [`Card`]
//! - `batches`: id to [`Batch`]
//! - `cards_by_type`: [`CardType`] to ordered card ids
//!
//! Every read applies the same visibility rule: a card is visible when it has
//! no owning batch or its owning batch is enabled.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use unicode_normalization::UnicodeNormalization;

use super::error::{CatalogError, Result};
use super::types::{Batch, Card, CardSource, CardType};

/// Directory segment used for built-in cards and unnamed batches.
pub const BUILTIN_IMAGE_SEGMENT: &str = "builtin";

/// Extension of inferred image files.
pub const IMAGE_EXTENSION: &str = "webp";

#[derive(Debug, Default, Clone)]
pub struct UnifiedCardState {
    cards: IndexMap<String, Card>,
    batches: IndexMap<String, Batch>,
    cards_by_type: BTreeMap<CardType, Vec<String>>,
}

impl UnifiedCardState {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Add a batch and the cards it owns, replacing any batch with the same id.
    pub fn insert_batch(&mut self, batch: Batch, cards: Vec<Card>) {
        if self.batches.contains_key(&batch.id) {
            self.detach_batch(&batch.id);
        }
        for card in cards {
            self.cards.insert(card.id.clone(), card);
        }
        self.batches.insert(batch.id.clone(), batch);
        self.rebuild_type_index();
    }

    /// Remove a batch and every card it owns.
    pub fn remove_batch(&mut self, batch_id: &str) -> Option<(Batch, Vec<Card>)> {
        let removed = self.detach_batch(batch_id);
        self.rebuild_type_index();
        removed
    }

    fn detach_batch(&mut self, batch_id: &str) -> Option<(Batch, Vec<Card>)> {
        let batch = self.batches.shift_remove(batch_id)?;
        let cards = batch
            .card_ids
            .iter()
            .filter_map(|id| self.cards.shift_remove(id))
            .collect();
        Some((batch, cards))
    }

    /// Set a batch's disabled flag, returning the previous value.
    pub fn set_batch_disabled(&mut self, batch_id: &str, disabled: bool) -> Result<bool> {
        let batch = self
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| CatalogError::BatchNotFound(batch_id.to_string()))?;
        let previous = batch.disabled;
        batch.disabled = disabled;
        self.rebuild_type_index();
        Ok(previous)
    }

    pub fn clear(&mut self) {
        self.cards.clear();
        self.batches.clear();
        self.cards_by_type.clear();
    }

    /// Recompute `cards_by_type` from scratch.
    pub fn rebuild_type_index(&mut self) {
        let mut index: BTreeMap<CardType, Vec<String>> = BTreeMap::new();
        for card in self.cards.values() {
            index.entry(card.card_type).or_default().push(card.id.clone());
        }
        self.cards_by_type = index;
    }

    // ========================================================================
    // Visibility-filtered reads
    // ========================================================================

    pub fn is_visible(&self, card: &Card) -> bool {
        match &card.batch_id {
            None => true,
            Some(id) => self.batches.get(id).map_or(true, |b| !b.disabled),
        }
    }

    /// Every visible card, in load order.
    pub fn load_all_cards(&self) -> Vec<Card> {
        self.cards
            .values()
            .filter(|c| self.is_visible(c))
            .cloned()
            .collect()
    }

    pub fn load_cards_by_type(&self, card_type: CardType) -> Vec<Card> {
        self.cards_by_type
            .get(&card_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.cards.get(id))
            .filter(|c| self.is_visible(c))
            .cloned()
            .collect()
    }

    pub fn get_card_by_id(&self, id: &str) -> Option<&Card> {
        self.cards.get(id).filter(|c| self.is_visible(c))
    }

    pub fn visible_count(&self) -> usize {
        self.cards.values().filter(|c| self.is_visible(c)).count()
    }

    // ========================================================================
    // Unfiltered reads
    // ========================================================================

    /// Whether any loaded card, visible or not, has this id.
    pub fn contains_card_id(&self, id: &str) -> bool {
        self.cards.contains_key(id)
    }

    /// Batch owning a loaded card, visible or not.
    pub fn owning_batch(&self, card_id: &str) -> Option<&Batch> {
        let batch_id = self.cards.get(card_id)?.batch_id.as_deref()?;
        self.batches.get(batch_id)
    }

    pub fn total_cards(&self) -> usize {
        self.cards.len()
    }

    pub fn batches(&self) -> &IndexMap<String, Batch> {
        &self.batches
    }

    pub fn batch(&self, id: &str) -> Option<&Batch> {
        self.batches.get(id)
    }

    pub fn type_counts(&self) -> BTreeMap<CardType, usize> {
        self.cards_by_type
            .iter()
            .map(|(t, ids)| (*t, ids.len()))
            .collect()
    }

    // ========================================================================
    // Image URL backfill
    // ========================================================================

    /// Infer an image URL for every card that lacks one. Returns how many
    /// cards were filled in.
    ///
    /// Inferred paths are not checked for collisions: two cards whose names
    /// normalize alike in the same batch and type share a URL.
    pub fn preprocess_card_images(&mut self, image_base_path: &str) -> usize {
        let mut filled = 0;
        for card in self.cards.values_mut() {
            if card.has_image_url() {
                continue;
            }
            let batch_name = card
                .batch_id
                .as_ref()
                .and_then(|id| self.batches.get(id))
                .map(|b| b.name.as_str());
            if let Some(url) = infer_image_url(image_base_path, batch_name, card) {
                card.image_url = Some(url);
                filled += 1;
            }
        }
        log::debug!("Inferred image URLs for {} card(s)", filled);
        filled
    }
}

/// `{base}/{batch}/{type}/{name}.webp`, or `None` when the card has neither a
/// usable name nor class.
pub fn infer_image_url(
    image_base_path: &str,
    batch_name: Option<&str>,
    card: &Card,
) -> Option<String> {
    let file = Some(normalize_path_segment(&card.name))
        .filter(|s| !s.is_empty())
        .or_else(|| Some(normalize_path_segment(&card.class)).filter(|s| !s.is_empty()))?;

    let batch_segment = match (card.source, batch_name) {
        (CardSource::Builtin, _) | (_, None) => BUILTIN_IMAGE_SEGMENT.to_string(),
        (CardSource::Custom, Some(name)) => {
            let segment = normalize_path_segment(name);
            if segment.is_empty() {
                BUILTIN_IMAGE_SEGMENT.to_string()
            } else {
                segment
            }
        }
    };

    Some(format!(
        "{}/{}/{}/{}.{}",
        image_base_path.trim_end_matches('/'),
        batch_segment,
        card.card_type,
        file,
        IMAGE_EXTENSION
    ))
}

/// NFKC-normalize, trim, lowercase, collapse whitespace to `-` and drop
/// characters that are unsafe in a path segment.
pub fn normalize_path_segment(input: &str) -> String {
    let normalized: String = input.nfkc().collect();
    let mut out = String::with_capacity(normalized.len());
    let mut pending_dash = false;
    for ch in normalized.trim().to_lowercase().chars() {
        if ch.is_whitespace() {
            pending_dash = !out.is_empty();
            continue;
        }
        if ch.is_control()
            || matches!(
                ch,
                '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' | '#' | '.'
            )
        {
            continue;
        }
        if pending_dash {
            out.push('-');
            pending_dash = false;
        }
        out.push(ch);
    }
    out
}
