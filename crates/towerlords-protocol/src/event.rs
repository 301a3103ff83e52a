use serde::{Deserialize, Serialize};

use crate::ids::{BoardIndex, CardId, Seat};

/// One simulated unit spawned by an ATTACK card (spec §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRef {
    pub owner: Seat,
    /// Index within the owner's spawn order this round; stable for the
    /// duration of one battle, not persisted across rounds.
    pub unit_index: u32,
}

/// All possible simulator→client events, ordered by `at_ms_offset` (spec
/// §4.3). `type` is the wire discriminant clients switch on; fields are
/// exactly what a renderer needs to play the battle back without
/// re-simulating (spec GLOSSARY: "Playback hints").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BattleEvent {
    Spawn {
        at_ms_offset: u32,
        unit: UnitRef,
        enemy_type: String,
        hp: i32,
        from_slot: BoardIndex,
    },
    Move {
        at_ms_offset: u32,
        unit: UnitRef,
        step: u32,
    },
    Shot {
        at_ms_offset: u32,
        shooter: Seat,
        target: UnitRef,
    },
    Hit {
        at_ms_offset: u32,
        target: UnitRef,
        damage: i32,
    },
    Damage {
        at_ms_offset: u32,
        target: Seat,
        amount: i32,
        card_id: Option<CardId>,
    },
    UnitDied {
        at_ms_offset: u32,
        unit: UnitRef,
    },
    TowerHit {
        at_ms_offset: u32,
        target: Seat,
        unit: UnitRef,
        damage: i32,
    },
    RoundEnd {
        at_ms_offset: u32,
    },
}

impl BattleEvent {
    pub fn at_ms_offset(&self) -> u32 {
        match self {
            BattleEvent::Spawn { at_ms_offset, .. }
            | BattleEvent::Move { at_ms_offset, .. }
            | BattleEvent::Shot { at_ms_offset, .. }
            | BattleEvent::Hit { at_ms_offset, .. }
            | BattleEvent::Damage { at_ms_offset, .. }
            | BattleEvent::UnitDied { at_ms_offset, .. }
            | BattleEvent::TowerHit { at_ms_offset, .. }
            | BattleEvent::RoundEnd { at_ms_offset } => *at_ms_offset,
        }
    }
}

/// Per-tick summary used as a playback hint so a client can render a
/// progress bar / damage ticker without replaying every event (spec
/// GLOSSARY: "Playback hints").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub tick: u32,
    pub a_units_alive: u32,
    pub b_units_alive: u32,
    pub a_tower_hp: i32,
    pub b_tower_hp: i32,
}

/// Snapshot of a unit at tick 0, before any movement — a playback hint
/// (spec §4.3 `initialUnits[]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialUnit {
    pub unit: UnitRef,
    pub enemy_type: String,
    pub hp: i32,
    pub from_slot: BoardIndex,
}

