use serde::{Deserialize, Serialize};

use crate::event::{BattleEvent, InitialUnit, TickSummary};
use crate::ids::{MatchId, UserId};
use crate::snapshot::MatchSnapshot;
use crate::types::{EliminationReason, TowerColor};

/// Per-player cumulative damage/HP at the close of a round, used for
/// `StoredMatchResult.rounds[].summary` (spec §3, §4.13). Cumulative fields
/// must be monotonically non-decreasing across rounds (spec §8).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundSummary {
    pub user_id: UserId,
    pub cumulative_damage_out: i64,
    pub cumulative_damage_in: i64,
    pub tower_hp: i32,
}

/// Battle playback for one round, attached to the stored result so a match
/// can be replayed after the live battle update has been forgotten by
/// clients (spec §3 `replay`, GLOSSARY "Playback hints").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundReplay {
    pub events: Vec<BattleEvent>,
    pub ticks_to_reach: u32,
    pub initial_units: Vec<InitialUnit>,
    pub shots_per_tick: Vec<u32>,
    pub per_tick_summary: Vec<TickSummary>,
}

/// One persisted round record (spec §3 `rounds[]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub summary: Vec<RoundSummary>,
    pub state: MatchSnapshot,
    pub replay: RoundReplay,
}

/// Per-player record carried in the stored result (spec §3 `players[]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultPlayer {
    pub user_id: UserId,
    pub username: String,
    pub seat: crate::ids::Seat,
    pub tower_color: TowerColor,
    pub final_rank: u8,
    #[serde(default)]
    pub elimination_reason: Option<EliminationReason>,
}

/// Final, persisted record of a completed match (spec §3, §4.13).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMatchResult {
    pub match_id: MatchId,
    pub created_at: i64,
    pub finished_at: i64,
    pub winner_id: Option<UserId>,
    pub rounds: Vec<RoundRecord>,
    pub players: Vec<ResultPlayer>,
}
