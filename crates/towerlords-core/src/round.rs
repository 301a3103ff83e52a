//! Pure state transitions for the Round Scheduler (C6, spec §4.6). The
//! scheduler's task loop (deadlines, suspension on the command queue) is a
//! `towerlords-server` concern; what happens to `MatchState` when combat
//! resolves or a new shop round opens is deterministic and belongs here,
//! next to the rest of the action handlers.

use towerlords_protocol::snapshot::MatchPhase;
use towerlords_protocol::types::EliminationReason;
use towerlords_protocol::wire::ServerFrame;

use crate::actions::{generate_shop, state_broadcast};
use crate::catalog::CardCatalog;
use crate::config::MatchConfig;
use crate::match_state::MatchState;
use crate::player_state::PlayerState;
use crate::simulator::SimResult;

/// Outcome of applying a resolved battle to the match (spec §4.6 `combat`).
pub enum RoundOutcome {
    /// Neither tower fell; the match returns to `shop` for the next round.
    Continuing(Vec<ServerFrame>),
    /// A tower fell (or a marriage proposal resolved adversely); the match
    /// is now `finished`.
    Finished(Vec<ServerFrame>),
}

fn draw_cards(player: &mut PlayerState, rng: &mut crate::rng::GameRng, count: u32, hand_max: u32) {
    for _ in 0..count {
        if player.hand.len() as u32 >= hand_max {
            break;
        }
        if player.deck.is_empty() {
            if player.discard.is_empty() {
                break;
            }
            std::mem::swap(&mut player.deck, &mut player.discard);
            rng.shuffle(&mut player.deck);
        }
        match player.deck.pop() {
            Some(card) => player.hand.push(card),
            None => break,
        }
    }
}

/// **combat → shop** (spec §4.6): draw up to `DRAW_PER_ROUND`, add
/// `GOLD_PER_ROUND + economyBonus`, regenerate the shop, reset `rerollCost`,
/// `round++`. `economyBonus` is each player's accumulated
/// `gold_bonus_per_round` from ECONOMY cards played so far.
fn advance_to_next_shop_round(state: &mut MatchState, catalog: &CardCatalog, config: &MatchConfig) {
    for seat in 0..2u8 {
        let level = state.player(seat).tower_level;
        let shop_size = config.shop_size_by_level[(level as usize - 1).min(4)];
        let new_shop = generate_shop(state, seat, catalog, config, shop_size);

        let MatchState { rng, players, .. } = state;
        let player = &mut players[seat as usize];
        draw_cards(player, rng, config.draw_per_round, config.hand_max);
        player.gold += config.gold_per_round + player.gold_bonus_per_round;
        player.reroll_cost = 1;
        player.shop = new_shop;
        player.played_marry_refusal = false;
    }
    state.round += 1;
    state.phase = MatchPhase::Shop;
}

/// **MATCH_START / lobby → shop** (spec §4.6): generates each player's
/// opening shop. Called once by the scheduler right after `MatchState::new`.
pub fn start_match(state: &mut MatchState, catalog: &CardCatalog, config: &MatchConfig) -> Vec<ServerFrame> {
    for seat in 0..2u8 {
        let level = state.player(seat).tower_level;
        let shop_size = config.shop_size_by_level[(level as usize - 1).min(4)];
        let shop = generate_shop(state, seat, catalog, config, shop_size);
        state.player_mut(seat).shop = shop;
    }
    state.phase = MatchPhase::Shop;
    state_broadcast(state)
}

/// **combat** resolution (spec §4.6): applies `postHp`, checks elimination
/// and the marriage-refusal rule, and either ends the match or opens the
/// next shop round.
pub fn apply_combat_result(
    state: &mut MatchState,
    result: &SimResult,
    catalog: &CardCatalog,
    config: &MatchConfig,
    now_ms: i64,
) -> RoundOutcome {
    state.phase = MatchPhase::Combat;

    let prior_a_hp = state.player(0).tower_hp;
    let prior_b_hp = state.player(1).tower_hp;
    state.player_mut(0).tower_hp = result.a_tower_hp;
    state.player_mut(1).tower_hp = result.b_tower_hp;
    state.player_mut(0).total_damage_in += (prior_a_hp - result.a_tower_hp).max(0) as i64;
    state.player_mut(1).total_damage_in += (prior_b_hp - result.b_tower_hp).max(0) as i64;
    state.player_mut(0).total_damage_out += (prior_b_hp - result.b_tower_hp).max(0) as i64;
    state.player_mut(1).total_damage_out += (prior_a_hp - result.a_tower_hp).max(0) as i64;

    if let Some(seat) = result.marriage_refusal_eliminated {
        state.player_mut(seat.0).tower_hp = 0;
        state.player_mut(seat.0).elimination_reason = Some(EliminationReason::MarriageRefusal);
    }

    let battle_update = ServerFrame::MatchBattleUpdate {
        v: state.bump_version(),
        match_id: state.match_id,
        round: state.round,
        events: result.events.clone(),
        initial_units: result.initial_units.clone(),
        shots_per_tick: result.shots_per_tick.clone(),
        per_tick_summary: result.per_tick_summary.clone(),
        ticks_to_reach: result.ticks_to_reach,
        post_hp: [state.player(0).tower_hp, state.player(1).tower_hp],
    };

    let a_down = state.player(0).tower_hp <= 0;
    let b_down = state.player(1).tower_hp <= 0;

    if a_down || b_down {
        for seat in 0..2u8 {
            if state.player(seat).tower_hp <= 0 && state.player(seat).elimination_reason.is_none() {
                state.player_mut(seat).elimination_reason = Some(EliminationReason::TowerDestroyed);
            }
        }
        state.winner_id = if a_down && b_down {
            None
        } else if a_down {
            Some(state.player(1).user_id)
        } else {
            Some(state.player(0).user_id)
        };
        state.phase = MatchPhase::Finished;
        state.finished_at = Some(now_ms);

        let mut frames = vec![battle_update];
        frames.extend(state_broadcast(state));
        RoundOutcome::Finished(frames)
    } else {
        advance_to_next_shop_round(state, catalog, config);
        let mut frames = vec![battle_update];
        frames.extend(state_broadcast(state));
        RoundOutcome::Continuing(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TowerCurve;
    use towerlords_protocol::ids::{MatchId, Seat, UserId};
    use towerlords_protocol::types::TowerColor;

    fn catalog() -> CardCatalog {
        CardCatalog::default()
    }

    fn fresh_match() -> MatchState {
        let curve = TowerCurve::default();
        let a = PlayerState::new(UserId(uuid::Uuid::new_v4()), Seat(0), TowerColor::Red, vec![], &curve, 5);
        let b = PlayerState::new(UserId(uuid::Uuid::new_v4()), Seat(1), TowerColor::Blue, vec![], &curve, 5);
        MatchState::new(MatchId::new(), 42, [a, b], 50)
    }

    #[test]
    fn start_match_populates_both_shops() {
        let cat = catalog();
        let config = MatchConfig::default();
        let mut m = fresh_match();
        start_match(&mut m, &cat, &config);
        assert_eq!(m.phase, MatchPhase::Shop);
    }

    #[test]
    fn surviving_round_advances_round_and_adds_gold() {
        let cat = catalog();
        let config = MatchConfig::default();
        let mut m = fresh_match();
        m.phase = MatchPhase::Combat;
        let starting_gold = m.players[0].gold;

        let result = SimResult {
            winner: crate::simulator::Winner::Draw,
            a_tower_hp: m.players[0].tower_hp,
            b_tower_hp: m.players[1].tower_hp,
            events: vec![],
            initial_units: vec![],
            shots_per_tick: vec![],
            per_tick_summary: vec![],
            ticks_to_reach: 10,
            marriage_refusal_eliminated: None,
        };
        let round_before = m.round;
        match apply_combat_result(&mut m, &result, &cat, &config, 1000) {
            RoundOutcome::Continuing(_) => {}
            RoundOutcome::Finished(_) => panic!("expected the match to continue"),
        }
        assert_eq!(m.round, round_before + 1);
        assert_eq!(m.phase, MatchPhase::Shop);
        assert_eq!(m.players[0].gold, starting_gold + config.gold_per_round);
    }

    #[test]
    fn economy_bonus_is_added_on_top_of_gold_per_round() {
        let cat = catalog();
        let config = MatchConfig::default();
        let mut m = fresh_match();
        m.phase = MatchPhase::Combat;
        m.players[0].gold_bonus_per_round = 3;
        let starting_gold = m.players[0].gold;

        let result = SimResult {
            winner: crate::simulator::Winner::Draw,
            a_tower_hp: m.players[0].tower_hp,
            b_tower_hp: m.players[1].tower_hp,
            events: vec![],
            initial_units: vec![],
            shots_per_tick: vec![],
            per_tick_summary: vec![],
            ticks_to_reach: 10,
            marriage_refusal_eliminated: None,
        };
        apply_combat_result(&mut m, &result, &cat, &config, 1000);
        assert_eq!(m.players[0].gold, starting_gold + config.gold_per_round + 3);
    }

    #[test]
    fn tower_destroyed_ends_the_match() {
        let cat = catalog();
        let config = MatchConfig::default();
        let mut m = fresh_match();
        m.phase = MatchPhase::Combat;

        let result = SimResult {
            winner: crate::simulator::Winner::A,
            a_tower_hp: m.players[0].tower_hp,
            b_tower_hp: 0,
            events: vec![],
            initial_units: vec![],
            shots_per_tick: vec![],
            per_tick_summary: vec![],
            ticks_to_reach: 10,
            marriage_refusal_eliminated: None,
        };
        match apply_combat_result(&mut m, &result, &cat, &config, 1000) {
            RoundOutcome::Finished(_) => {}
            RoundOutcome::Continuing(_) => panic!("expected the match to finish"),
        }
        assert_eq!(m.phase, MatchPhase::Finished);
        assert_eq!(m.winner_id, Some(m.players[0].user_id));
        assert_eq!(
            m.players[1].elimination_reason,
            Some(EliminationReason::TowerDestroyed)
        );
    }
}
