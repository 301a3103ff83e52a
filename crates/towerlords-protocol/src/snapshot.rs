use serde::{Deserialize, Serialize};

use crate::ids::{CardId, MatchId, Seat, UserId};
use crate::types::{EliminationReason, TowerColor};

/// One board slot as seen over the wire — mirrors `BoardSlot` but is kept
/// separate so protocol consumers don't need `towerlords-core` in scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSlotView {
    pub card_id: Option<CardId>,
    pub stack_count: u8,
}

/// The recipient's own full state (spec §3 PlayerState, §6.1 `MATCH_STATE.self`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSelfView {
    pub user_id: UserId,
    pub seat: Seat,
    pub tower_color: TowerColor,
    pub tower_level: u8,
    pub tower_hp: i32,
    pub tower_hp_max: i32,
    pub tower_dps: i32,
    pub gold: i32,
    pub reroll_cost: i32,
    pub tower_upgrade_cost: i32,
    pub deck: Vec<CardId>,
    pub hand: Vec<CardId>,
    pub discard: Vec<CardId>,
    pub board: [BoardSlotView; crate::ids::BOARD_SIZE],
    pub shop: Vec<CardId>,
    pub total_damage_out: i64,
    pub total_damage_in: i64,
    #[serde(default)]
    pub elimination_reason: Option<EliminationReason>,
    pub pending_marry_proposal: bool,
    pub last_tower_upgrade_round: u32,
}

/// The opponent-facing public view — only what §4.4 says other seats may see.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPublicView {
    pub user_id: UserId,
    pub seat: Seat,
    pub tower_color: TowerColor,
    pub tower_level: u8,
    pub tower_hp: i32,
    pub tower_hp_max: i32,
    #[serde(default)]
    pub elimination_reason: Option<EliminationReason>,
    pub is_winner: bool,
}

/// Wire phase discriminant (spec GLOSSARY "Phase").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Lobby,
    Shop,
    Combat,
    Finished,
}

/// The `MATCH_STATE` payload body (spec §6.1, §4.4): `self` is the full
/// authoritative view for the recipient, `players` is the compact public
/// view of every seat including the recipient's own public mirror.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub v: u64,
    pub match_id: MatchId,
    pub phase: MatchPhase,
    pub round: u32,
    #[serde(rename = "self")]
    pub self_view: PlayerSelfView,
    pub players: Vec<PlayerPublicView>,
}
