//! Card Catalog (C1): immutable card definitions keyed by `cardId`.

use std::collections::HashMap;

use towerlords_protocol::ids::CardId;
use towerlords_protocol::types::CardDefinition;

use crate::error::UnknownCard;

/// Loaded once at process start and never mutated afterward (spec §4.1:
/// "Immutable after load").
#[derive(Clone, Debug, Default)]
pub struct CardCatalog {
    by_id: HashMap<CardId, CardDefinition>,
}

impl CardCatalog {
    pub fn from_definitions(defs: impl IntoIterator<Item = CardDefinition>) -> Self {
        let by_id = defs.into_iter().map(|d| (d.card_id.clone(), d)).collect();
        Self { by_id }
    }

    pub fn get(&self, card_id: &str) -> Option<&CardDefinition> {
        self.by_id.get(card_id)
    }

    pub fn require(&self, card_id: &str) -> Result<&CardDefinition, UnknownCard> {
        self.get(card_id)
            .ok_or_else(|| UnknownCard(card_id.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &CardDefinition> {
        self.by_id.values()
    }

    /// Only collectible cards are eligible for shop generation (spec §3:
    /// "non-collectible cards may be granted mid-match").
    pub fn collectible_ids_by_rarity(
        &self,
        rarity: towerlords_protocol::types::Rarity,
    ) -> Vec<&CardId> {
        self.by_id
            .values()
            .filter(|d| d.collectible && d.rarity == rarity)
            .map(|d| &d.card_id)
            .collect()
    }
}
