//! Simulator (C3): pure function from two `PlayerState`s to a battle result
//! (spec §4.3). Never mutates its inputs; the caller applies `postHp` and
//! appends the returned events to the stored replay.

use towerlords_protocol::event::{BattleEvent, InitialUnit, TickSummary, UnitRef};
use towerlords_protocol::ids::{BoardIndex, Seat};
use towerlords_protocol::types::{CardType, Rarity};

use crate::catalog::CardCatalog;
use crate::player_state::PlayerState;

/// Every tower shot deals a fixed amount of damage; `towerDps / SHOT_DAMAGE`
/// is therefore the number of shots fired per tick (spec §4.3: "the tower
/// fires `floor(towerDps / 10)` shots this tick"), making `SHOT_DAMAGE = 10`
/// the value implied by that formula.
pub const SHOT_DAMAGE: i32 = 10;

/// Fallback HP for an enemy type absent from the catalog override map
/// (spec §4.3 "override map: e.g., ogre 30, goblin 10").
pub const DEFAULT_ENEMY_HP: i32 = 10;

/// Fallback per-enemy damage for an ATTACK card missing `baseDamage`.
pub const DEFAULT_DAMAGE_PER_ENEMY: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winner {
    A,
    B,
    Draw,
}

#[derive(Clone, Copy, Debug)]
pub struct SimParams {
    pub ticks_to_reach: u32,
    pub max_ticks: u32,
    pub tick_ms: u32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            ticks_to_reach: 10,
            max_ticks: 200,
            tick_ms: 100,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimResult {
    pub winner: Winner,
    pub a_tower_hp: i32,
    pub b_tower_hp: i32,
    pub events: Vec<BattleEvent>,
    pub initial_units: Vec<InitialUnit>,
    pub shots_per_tick: Vec<u32>,
    pub per_tick_summary: Vec<TickSummary>,
    pub ticks_to_reach: u32,
    /// Set when a seat's unanswered `marry_proposal` resolves adversely at
    /// battle end (spec §4.3 `marry_proposal` rule).
    pub marriage_refusal_eliminated: Option<Seat>,
}

struct SimUnit {
    owner: Seat,
    unit_index: u32,
    hp: i32,
    enemy_type: String,
    from_slot: BoardIndex,
    damage_per_enemy: i32,
    step: u32,
    alive: bool,
}

fn enemy_hp(enemy_type: &str) -> i32 {
    towerlords_protocol::types::default_enemy_hp_overrides()
        .get(enemy_type)
        .copied()
        .unwrap_or(DEFAULT_ENEMY_HP)
}

fn spawn_units(player: &PlayerState, catalog: &CardCatalog, owner: Seat) -> Vec<SimUnit> {
    let mut units = Vec::new();
    let mut index = 0u32;
    for (slot_idx, slot) in player.board.iter().enumerate() {
        let Some(card_id) = &slot.card_id else { continue };
        let Some(def) = catalog.get(card_id) else { continue };
        if def.card_type != CardType::Attack {
            continue;
        }
        let enemy_type = def
            .config_str("enemy_type")
            .unwrap_or("goblin")
            .to_string();
        let per_slot_enemies = def.config_u32("enemies").unwrap_or(1);
        let copies = 1 + slot.stack_count as u32;
        let damage_per_enemy = def.base_damage.unwrap_or(DEFAULT_DAMAGE_PER_ENEMY);
        for _ in 0..(per_slot_enemies * copies) {
            units.push(SimUnit {
                owner,
                unit_index: index,
                hp: enemy_hp(&enemy_type),
                enemy_type: enemy_type.clone(),
                from_slot: BoardIndex(slot_idx as u8),
                damage_per_enemy,
                step: 0,
                alive: true,
            });
            index += 1;
        }
    }
    units
}

/// Pure battle resolution. `rng` is accepted for interface symmetry with
/// other draws (shop generation) but the tick loop itself does not need
/// randomness: tie-breaks are defined deterministically (lowest HP, then
/// spawn order) per spec §4.3.
pub fn simulate(a: &PlayerState, b: &PlayerState, catalog: &CardCatalog, params: SimParams) -> SimResult {
    let mut events = Vec::new();
    let mut initial_units = Vec::new();
    let mut shots_per_tick = Vec::new();
    let mut per_tick_summary = Vec::new();

    let mut a_units = spawn_units(a, catalog, Seat(0));
    let mut b_units = spawn_units(b, catalog, Seat(1));

    for unit in a_units.iter().chain(b_units.iter()) {
        let unit_ref = UnitRef {
            owner: unit.owner,
            unit_index: unit.unit_index,
        };
        events.push(BattleEvent::Spawn {
            at_ms_offset: 0,
            unit: unit_ref,
            enemy_type: unit.enemy_type.clone(),
            hp: unit.hp,
            from_slot: unit.from_slot,
        });
        initial_units.push(InitialUnit {
            unit: unit_ref,
            enemy_type: unit.enemy_type.clone(),
            hp: unit.hp,
            from_slot: unit.from_slot,
        });
    }

    let mut a_tower_hp = a.tower_hp;
    let mut b_tower_hp = b.tower_hp;

    for tick in 0..params.max_ticks {
        let at_ms_offset = tick * params.tick_ms;
        let mut shots_this_tick = 0u32;

        // A's units advance on B's tower; B's tower defends.
        shots_this_tick += advance_and_resolve(
            &mut a_units,
            &mut b_tower_hp,
            b.tower_dps,
            params.ticks_to_reach,
            at_ms_offset,
            Seat(1),
            &mut events,
        );
        // B's units advance on A's tower; A's tower defends.
        shots_this_tick += advance_and_resolve(
            &mut b_units,
            &mut a_tower_hp,
            a.tower_dps,
            params.ticks_to_reach,
            at_ms_offset,
            Seat(0),
            &mut events,
        );

        shots_per_tick.push(shots_this_tick);
        per_tick_summary.push(TickSummary {
            tick,
            a_units_alive: a_units.iter().filter(|u| u.alive).count() as u32,
            b_units_alive: b_units.iter().filter(|u| u.alive).count() as u32,
            a_tower_hp,
            b_tower_hp,
        });

        events.push(BattleEvent::RoundEnd {
            at_ms_offset: at_ms_offset + params.tick_ms,
        });

        let a_done = a_units.iter().all(|u| !u.alive) || a_tower_hp <= 0;
        let b_done = b_units.iter().all(|u| !u.alive) || b_tower_hp <= 0;
        if a_tower_hp <= 0 || b_tower_hp <= 0 || (a_done && b_done) {
            break;
        }
    }

    a_tower_hp = a_tower_hp.max(0);
    b_tower_hp = b_tower_hp.max(0);

    let marriage_refusal_eliminated = marriage_refusal_check(a, b);

    let winner = if a_tower_hp <= 0 && b_tower_hp <= 0 {
        let a_alive = a_units.iter().filter(|u| u.alive).count();
        let b_alive = b_units.iter().filter(|u| u.alive).count();
        if a_alive > b_alive {
            Winner::A
        } else if b_alive > a_alive {
            Winner::B
        } else {
            Winner::Draw
        }
    } else if a_tower_hp <= 0 {
        Winner::B
    } else if b_tower_hp <= 0 {
        Winner::A
    } else if b_tower_hp < a_tower_hp {
        Winner::A
    } else if a_tower_hp < b_tower_hp {
        Winner::B
    } else {
        Winner::Draw
    };

    SimResult {
        winner,
        a_tower_hp,
        b_tower_hp,
        events,
        initial_units,
        shots_per_tick,
        per_tick_summary,
        ticks_to_reach: params.ticks_to_reach,
        marriage_refusal_eliminated,
    }
}

fn marriage_refusal_check(a: &PlayerState, b: &PlayerState) -> Option<Seat> {
    if a.pending_marry_proposal && !a.played_marry_refusal {
        Some(a.seat)
    } else if b.pending_marry_proposal && !b.played_marry_refusal {
        Some(b.seat)
    } else {
        None
    }
}

/// Advances every surviving attacking unit one step; lets the defending
/// tower fire at the closest surviving units (lowest remaining distance,
/// then lowest HP, then spawn order — spec §4.3); applies reach damage for
/// units that arrive this tick. Returns the number of shots fired.
fn advance_and_resolve(
    attackers: &mut [SimUnit],
    defender_tower_hp: &mut i32,
    defender_dps: i32,
    ticks_to_reach: u32,
    at_ms_offset: u32,
    defender_seat: Seat,
    events: &mut Vec<BattleEvent>,
) -> u32 {
    for unit in attackers.iter_mut() {
        if !unit.alive {
            continue;
        }
        unit.step += 1;
        events.push(BattleEvent::Move {
            at_ms_offset,
            unit: UnitRef {
                owner: unit.owner,
                unit_index: unit.unit_index,
            },
            step: unit.step,
        });
    }

    let shots = (defender_dps / SHOT_DAMAGE).max(0) as u32;
    let mut remaining_shots = shots;
    while remaining_shots > 0 {
        let target_idx = attackers
            .iter()
            .enumerate()
            .filter(|(_, u)| u.alive && u.step < ticks_to_reach)
            .min_by_key(|(i, u)| (u.hp, *i))
            .map(|(i, _)| i);
        let Some(idx) = target_idx else { break };
        let target_ref = UnitRef {
            owner: attackers[idx].owner,
            unit_index: attackers[idx].unit_index,
        };
        events.push(BattleEvent::Shot {
            at_ms_offset,
            shooter: defender_seat,
            target: target_ref,
        });
        attackers[idx].hp -= SHOT_DAMAGE;
        events.push(BattleEvent::Hit {
            at_ms_offset,
            target: target_ref,
            damage: SHOT_DAMAGE,
        });
        if attackers[idx].hp <= 0 {
            attackers[idx].alive = false;
            events.push(BattleEvent::UnitDied {
                at_ms_offset,
                unit: target_ref,
            });
        }
        remaining_shots -= 1;
    }

    let shots_used = shots.saturating_sub(remaining_shots);
    for unit in attackers.iter_mut() {
        if unit.alive && unit.step >= ticks_to_reach {
            unit.alive = false;
            *defender_tower_hp -= unit.damage_per_enemy;
            events.push(BattleEvent::TowerHit {
                at_ms_offset,
                target: defender_seat,
                unit: UnitRef {
                    owner: unit.owner,
                    unit_index: unit.unit_index,
                },
                damage: unit.damage_per_enemy,
            });
        }
    }

    shots_used
}

/// Widened rarity weights double as a sanity check that the table is
/// monotonic; kept here as a thin re-export so simulator callers don't need
/// to import `Rarity` just to sanity-check a catalog.
pub fn highest_rarity_in_catalog(catalog: &CardCatalog) -> Option<Rarity> {
    catalog.list().map(|d| d.rarity).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TowerCurve;
    use towerlords_protocol::ids::{Seat as SeatId, UserId};
    use towerlords_protocol::types::{CardDefinition, CardType, Rarity, TowerColor};

    fn catalog_with_goblin_raid() -> CardCatalog {
        let mut config = serde_json::Map::new();
        config.insert("enemy_type".into(), "goblin".into());
        config.insert("enemies".into(), serde_json::Value::from(8u32));
        CardCatalog::from_definitions(vec![CardDefinition {
            card_id: "goblin_raid".to_string(),
            name: "Goblin Raid".to_string(),
            card_type: CardType::Attack,
            rarity: Rarity::Common,
            cost: 2,
            base_damage: Some(2),
            base_hp_bonus: None,
            base_dps_bonus: None,
            buff_multiplier: None,
            config,
            collectible: true,
        }])
    }

    fn empty_player(seat: u8, hp: i32, dps: i32) -> PlayerState {
        let curve = TowerCurve::default();
        let mut p = PlayerState::new(
            UserId(uuid::Uuid::new_v4()),
            SeatId(seat),
            TowerColor::Red,
            vec![],
            &curve,
            0,
        );
        p.tower_hp = hp;
        p.tower_hp_max = hp;
        p.tower_dps = dps;
        p
    }

    #[test]
    fn simulation_is_deterministic() {
        let catalog = catalog_with_goblin_raid();
        let mut a = empty_player(0, 1000, 10);
        a.board[0].card_id = Some("goblin_raid".to_string());
        let b = empty_player(1, 1000, 10);

        let r1 = simulate(&a, &b, &catalog, SimParams::default());
        let r2 = simulate(&a, &b, &catalog, SimParams::default());
        assert_eq!(r1.a_tower_hp, r2.a_tower_hp);
        assert_eq!(r1.b_tower_hp, r2.b_tower_hp);
        assert_eq!(r1.events.len(), r2.events.len());
        assert_eq!(r1.winner, r2.winner);
    }

    #[test]
    fn goblin_raid_spawns_eight_units_at_tick_zero() {
        let catalog = catalog_with_goblin_raid();
        let mut a = empty_player(0, 1000, 10);
        a.board[0].card_id = Some("goblin_raid".to_string());
        let b = empty_player(1, 1000, 10);

        let result = simulate(&a, &b, &catalog, SimParams::default());
        let spawns = result
            .events
            .iter()
            .filter(|e| matches!(e, BattleEvent::Spawn { at_ms_offset: 0, .. }))
            .count();
        assert_eq!(spawns, 8);
        assert_eq!(result.a_tower_hp, 1000);
        assert!(result.b_tower_hp <= 1000);
    }

    #[test]
    fn empty_boards_leave_both_towers_untouched() {
        let catalog = CardCatalog::default();
        let a = empty_player(0, 500, 10);
        let b = empty_player(1, 500, 10);
        let result = simulate(&a, &b, &catalog, SimParams::default());
        assert_eq!(result.a_tower_hp, 500);
        assert_eq!(result.b_tower_hp, 500);
        assert_eq!(result.winner, Winner::Draw);
    }
}
