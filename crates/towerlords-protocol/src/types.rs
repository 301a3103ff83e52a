use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::CardId;

/// Top-level category driving how a card interacts with the board (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Attack,
    Defense,
    Buff,
    Economy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TowerColor {
    Red,
    Blue,
}

/// Open, loosely-typed configuration carried by a card definition: enemy
/// counts/types for attacks, hp/dps kind for defense/economy, and buff
/// targets. Kept as a JSON value (rather than a closed enum) because the
/// catalog is data, not code — new cards should not require a Rust release.
pub type CardConfig = serde_json::Map<String, serde_json::Value>;

/// Immutable card definition, keyed by `cardId` (spec §3, §4.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardDefinition {
    pub card_id: CardId,
    pub name: String,
    pub card_type: CardType,
    pub rarity: Rarity,
    pub cost: u32,
    #[serde(default)]
    pub base_damage: Option<i32>,
    #[serde(default)]
    pub base_hp_bonus: Option<i32>,
    #[serde(default)]
    pub base_dps_bonus: Option<i32>,
    #[serde(default)]
    pub buff_multiplier: Option<f32>,
    #[serde(default)]
    pub config: CardConfig,
    /// Non-collectible cards (e.g. `marry_refusal`) can be granted mid-match
    /// but never appear in a shop or starting deck.
    #[serde(default = "default_true")]
    pub collectible: bool,
}

fn default_true() -> bool {
    true
}

impl CardDefinition {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_u32(&self, key: &str) -> Option<u32> {
        self.config.get(key).and_then(|v| v.as_u64()).map(|v| v as u32)
    }
}

/// Reason a player's tower fell, kept alongside final state for UI and
/// for the stored result (spec §3, §8 scenario 6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationReason {
    TowerDestroyed,
    Forfeit,
    MarriageRefusal,
    Timeout,
}

/// A single board slot: empty, or occupied by up to two stacked copies of
/// the same attack/defense card (spec §3 invariants, §GLOSSARY Stack/Merge).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSlot {
    pub card_id: Option<CardId>,
    pub stack_count: u8,
}

impl BoardSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.card_id.is_none()
    }
}

/// Heuristic combat stats baked into the catalog loader for ATTACK-spawned
/// units, keyed by `config.enemy_type` (spec §4.3: "override map: e.g.,
/// ogre 30, goblin 10").
pub fn default_enemy_hp_overrides() -> HashMap<String, i32> {
    let mut m = HashMap::new();
    m.insert("goblin".to_string(), 10);
    m.insert("ogre".to_string(), 30);
    m.insert("skeleton".to_string(), 14);
    m.insert("knight".to_string(), 22);
    m.insert("dragon".to_string(), 60);
    m
}
