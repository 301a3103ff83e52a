//! Action Handlers (C5): validate and apply player actions atomically
//! (spec §4.5). Each handler takes the match's exclusive writer as given
//! (spec §5 single-writer invariant) and mutates `MatchState` in place,
//! returning the broadcasts to publish or a `Denial`. This is an in-place
//! rendering of the spec's `(MatchState, userId, payload) -> (MatchState',
//! broadcast[]) | Denial` contract: because the caller already holds the
//! only mutable reference to this match, mutating in place and cloning a
//! fresh state are observably identical, and the former avoids cloning a
//! match's full board/deck/hand on every action.

use towerlords_protocol::ids::{BoardIndex, CardId, MatchId, UserId};
use towerlords_protocol::snapshot::MatchPhase;
use towerlords_protocol::types::CardType;
use towerlords_protocol::wire::{DenialCode, ServerFrame};

use crate::catalog::CardCatalog;
use crate::config::MatchConfig;
use crate::error::Denial;
use crate::match_state::{ChatEntry, MatchState};

pub fn denial_code(d: Denial) -> DenialCode {
    match d {
        Denial::NotEnoughGold => DenialCode::NotEnoughGold,
        Denial::HandFull => DenialCode::HandFull,
        Denial::CardNotInShop => DenialCode::CardNotInShop,
        Denial::InvalidSlot => DenialCode::InvalidSlot,
        Denial::SlotOccupied => DenialCode::SlotOccupied,
        Denial::StackFull => DenialCode::StackFull,
        Denial::EmptySlot => DenialCode::EmptySlot,
        Denial::WrongPhase => DenialCode::WrongPhase,
        Denial::MaxLevel => DenialCode::MaxLevel,
        Denial::AlreadyUpgradedThisRound => DenialCode::AlreadyUpgradedThisRound,
    }
}

fn require_shop_phase(state: &MatchState) -> Result<(), Denial> {
    if state.phase != MatchPhase::Shop {
        Err(Denial::WrongPhase)
    } else {
        Ok(())
    }
}

pub(crate) fn state_broadcast(state: &mut MatchState) -> Vec<ServerFrame> {
    state.bump_version();
    state
        .players
        .iter()
        .map(|p| {
            ServerFrame::MatchState {
                snapshot: state.snapshot_for(p.user_id),
            }
        })
        .collect()
}

/// **SHOP_BUY(cardId)** — spec §4.5.
pub fn shop_buy(
    state: &mut MatchState,
    user_id: UserId,
    card_id: &str,
    catalog: &CardCatalog,
    config: &MatchConfig,
) -> Result<Vec<ServerFrame>, Denial> {
    let seat = state.seat_of(user_id).ok_or(Denial::WrongPhase)?;
    require_shop_phase(state)?;
    let player = state.player(seat);

    if !player.shop.iter().any(|c| c == card_id) {
        return Err(Denial::CardNotInShop);
    }
    let def = catalog.require(card_id).map_err(|_| Denial::CardNotInShop)?;
    if player.gold < def.cost as i32 {
        return Err(Denial::NotEnoughGold);
    }
    if player.hand.len() as u32 >= config.hand_max {
        return Err(Denial::HandFull);
    }

    let cost = def.cost as i32;
    let player = state.player_mut(seat);
    player.gold -= cost;
    player.shop.retain(|c| c != card_id);
    player.hand.push(card_id.to_string());

    Ok(state_broadcast(state))
}

/// **SHOP_REROLL** — spec §4.5.
pub fn shop_reroll(
    state: &mut MatchState,
    user_id: UserId,
    catalog: &CardCatalog,
    config: &MatchConfig,
) -> Result<Vec<ServerFrame>, Denial> {
    let seat = state.seat_of(user_id).ok_or(Denial::WrongPhase)?;
    require_shop_phase(state)?;

    if state.player(seat).gold < state.player(seat).reroll_cost {
        return Err(Denial::NotEnoughGold);
    }

    let level = state.player(seat).tower_level;
    let shop_size = config.shop_size_by_level[(level as usize - 1).min(4)];
    let new_shop = generate_shop(state, seat, catalog, config, shop_size);

    let player = state.player_mut(seat);
    player.gold -= player.reroll_cost;
    player.reroll_cost += config.max_reroll_per_round_cost_increment;
    player.shop = new_shop;

    Ok(state_broadcast(state))
}

pub(crate) fn generate_shop(
    state: &mut MatchState,
    seat: u8,
    catalog: &CardCatalog,
    config: &MatchConfig,
    shop_size: u32,
) -> Vec<CardId> {
    let level = state.player(seat).tower_level;
    let weights = config.rarity_weights.weights_for_level(level);
    let mut shop = Vec::with_capacity(shop_size as usize);
    for _ in 0..shop_size {
        let rarity = state.rng.draw_rarity(weights);
        let candidates = catalog.collectible_ids_by_rarity(rarity);
        if candidates.is_empty() {
            continue;
        }
        let pick = candidates[state.rng.gen_range_usize(candidates.len())].clone();
        shop.push(pick);
    }
    shop
}

/// **BOARD_PLACE(handIndex, boardIndex)** — spec §4.5.
pub fn board_place(
    state: &mut MatchState,
    user_id: UserId,
    hand_index: usize,
    board_index: BoardIndex,
    catalog: &CardCatalog,
) -> Result<(Vec<ServerFrame>, Option<MergeInfo>), Denial> {
    let seat = state.seat_of(user_id).ok_or(Denial::WrongPhase)?;
    require_shop_phase(state)?;
    if !board_index.in_range() {
        return Err(Denial::InvalidSlot);
    }

    let player = state.player(seat);
    let card_id = player
        .hand
        .get(hand_index)
        .cloned()
        .ok_or(Denial::InvalidSlot)?;
    let def = catalog.require(&card_id).map_err(|_| Denial::InvalidSlot)?;

    match def.card_type {
        CardType::Buff | CardType::Economy => {
            state.player_mut(seat).hand.remove(hand_index);
            apply_instant_effect(state, seat, &card_id, def);
            state.player_mut(seat).discard.push(card_id);
            Ok((state_broadcast(state), None))
        }
        CardType::Attack | CardType::Defense => {
            let slot = player.board_slot(board_index).cloned().unwrap();
            let occupant_matches = slot.card_id.as_deref() == Some(card_id.as_str());
            if !slot.is_empty() && !occupant_matches {
                return Err(Denial::SlotOccupied);
            }
            if occupant_matches && slot.stack_count >= 2 {
                return Err(Denial::StackFull);
            }

            state.player_mut(seat).hand.remove(hand_index);
            let merge = place_or_stack(state.player_mut(seat), &card_id, board_index);
            if let Some(def2) = catalog.get(&card_id) {
                apply_permanent_defense(state, seat, &card_id, def2);
            }
            Ok((state_broadcast(state), merge))
        }
    }
}

#[derive(Clone, Debug)]
pub struct MergeInfo {
    pub card_id: CardId,
    pub chosen_index: BoardIndex,
    pub cleared_indices: Vec<BoardIndex>,
    pub new_merge_count: u8,
}

fn place_or_stack(
    player: &mut crate::player_state::PlayerState,
    card_id: &str,
    board_index: BoardIndex,
) -> Option<MergeInfo> {
    let idx = board_index.as_usize();
    if player.board[idx].card_id.as_deref() == Some(card_id) {
        player.board[idx].stack_count += 1;
    } else {
        player.board[idx].card_id = Some(card_id.to_string());
        player.board[idx].stack_count = 0;
    }

    // A third scattered copy (this slot now at stackCount=0 but two other
    // slots also hold it) merges into the lowest-index slot (spec §4.5
    // "if placing creates a third matching copy across distinct slots").
    let occupied: Vec<BoardIndex> = player
        .board
        .iter()
        .enumerate()
        .filter(|(_, s)| s.card_id.as_deref() == Some(card_id))
        .map(|(i, _)| BoardIndex(i as u8))
        .collect();

    if occupied.len() >= 2 && player.board[idx].stack_count == 0 {
        let chosen = occupied[0];
        let cleared: Vec<BoardIndex> = occupied.iter().skip(1).copied().collect();
        let total_copies: u32 = occupied
            .iter()
            .map(|i| 1 + player.board[i.as_usize()].stack_count as u32)
            .sum();
        for idx in &cleared {
            player.board[idx.as_usize()] = Default::default();
        }
        let new_count = (total_copies - 1).min(2) as u8;
        player.board[chosen.as_usize()].card_id = Some(card_id.to_string());
        player.board[chosen.as_usize()].stack_count = new_count;
        return Some(MergeInfo {
            card_id: card_id.to_string(),
            chosen_index: chosen,
            cleared_indices: cleared,
            new_merge_count: new_count,
        });
    }

    None
}

/// Applies a BUFF/ECONOMY card's immediate effect. `marry_proposal` reaches
/// across to the opponent's seat: it sets their `pendingMarryProposal` and
/// grants them the non-collectible `marry_refusal` response card, since they
/// otherwise have no way to ever hold it (spec §3 `CardDefinition`
/// "non-collectible cards ... may be granted mid-match (e.g., `marry_refusal`)",
/// spec §4.3 `marry_proposal` rule).
fn apply_instant_effect(
    state: &mut MatchState,
    seat: u8,
    card_id: &str,
    def: &towerlords_protocol::types::CardDefinition,
) {
    if card_id == "marry_proposal" {
        let opponent_seat = MatchState::other_seat(seat);
        let opponent = state.player_mut(opponent_seat);
        opponent.pending_marry_proposal = true;
        if !opponent.hand.iter().any(|c| c == "marry_refusal") {
            opponent.hand.push("marry_refusal".to_string());
        }
        return;
    }
    if card_id == "marry_refusal" {
        state.player_mut(seat).played_marry_refusal = true;
        return;
    }
    if def.card_type == CardType::Economy {
        if let Some(bonus) = def.base_dps_bonus {
            state.player_mut(seat).gold_bonus_per_round += bonus;
        }
    }
}

/// Applies an ATTACK/DEFENSE card's permanent board effect. `marry_refusal`
/// is catalogued as a DEFENSE card (spec §4.3) but registers the refusal
/// flag instead of a stat bonus.
fn apply_permanent_defense(
    state: &mut MatchState,
    seat: u8,
    card_id: &str,
    def: &towerlords_protocol::types::CardDefinition,
) {
    if card_id == "marry_refusal" {
        state.player_mut(seat).played_marry_refusal = true;
        return;
    }
    if def.card_type != CardType::Defense {
        return;
    }
    match def.config_str("kind") {
        Some("hp_permanent") => {
            if let Some(bonus) = def.base_hp_bonus {
                let player = state.player_mut(seat);
                player.tower_hp_max += bonus;
                player.tower_hp += bonus;
            }
        }
        Some("dps_permanent") => {
            if let Some(bonus) = def.base_dps_bonus {
                state.player_mut(seat).tower_dps += bonus;
            }
        }
        _ => {}
    }
}

/// **BOARD_SELL(boardIndex)** — spec §4.5.
pub fn board_sell(
    state: &mut MatchState,
    user_id: UserId,
    board_index: BoardIndex,
    catalog: &CardCatalog,
) -> Result<Vec<ServerFrame>, Denial> {
    let seat = state.seat_of(user_id).ok_or(Denial::WrongPhase)?;
    require_shop_phase(state)?;
    if !board_index.in_range() {
        return Err(Denial::EmptySlot);
    }

    let player = state.player(seat);
    let slot = player.board_slot(board_index).cloned().unwrap_or_default();
    let Some(card_id) = slot.card_id.clone() else {
        return Err(Denial::EmptySlot);
    };
    let refund = catalog.get(&card_id).map(|d| d.cost as i32 / 2).unwrap_or(0);

    let player = state.player_mut(seat);
    if slot.stack_count > 0 {
        player.board[board_index.as_usize()].stack_count -= 1;
    } else {
        player.board[board_index.as_usize()] = Default::default();
    }
    player.gold += refund;
    player.discard.push(card_id);

    Ok(state_broadcast(state))
}

/// **TOWER_UPGRADE** — spec §4.5.
pub fn tower_upgrade(
    state: &mut MatchState,
    user_id: UserId,
    config: &MatchConfig,
) -> Result<Vec<ServerFrame>, Denial> {
    let seat = state.seat_of(user_id).ok_or(Denial::WrongPhase)?;
    require_shop_phase(state)?;

    let round = state.round;
    let player = state.player(seat);
    if player.tower_level >= crate::config::TowerCurve::MAX_LEVEL {
        return Err(Denial::MaxLevel);
    }
    if player.last_tower_upgrade_round >= round {
        return Err(Denial::AlreadyUpgradedThisRound);
    }
    if player.gold < player.tower_upgrade_cost {
        return Err(Denial::NotEnoughGold);
    }

    let cost = player.tower_upgrade_cost;
    let player = state.player_mut(seat);
    player.gold -= cost;
    player.tower_level += 1;
    player.tower_hp_max = config.tower_curve.hp_max(player.tower_level);
    player.tower_dps = config.tower_curve.dps(player.tower_level);
    player.tower_hp = player.tower_hp_max;
    player.tower_upgrade_cost = config
        .tower_curve
        .upgrade_cost(player.tower_level)
        .unwrap_or(i32::MAX);
    player.last_tower_upgrade_round = round;

    Ok(state_broadcast(state))
}

/// **MATCH_END_ROUND** — spec §4.5, gated by `MatchConfig::end_round_enabled`.
pub fn match_end_round(
    state: &mut MatchState,
    user_id: UserId,
    config: &MatchConfig,
) -> Result<(), Denial> {
    if !config.end_round_enabled {
        return Err(Denial::WrongPhase);
    }
    let _seat = state.seat_of(user_id).ok_or(Denial::WrongPhase)?;
    require_shop_phase(state)?;
    // Arming is observed by the scheduler via `round_deadline`; setting it
    // to the current time lets the next scheduler tick fire immediately.
    state.round_deadline = Some(0);
    Ok(())
}

/// **MATCH_FORFEIT** — spec §4.5.
pub fn match_forfeit(state: &mut MatchState, user_id: UserId, now_ms: i64) -> Vec<ServerFrame> {
    let Some(seat) = state.seat_of(user_id) else {
        return vec![];
    };
    state.player_mut(seat).tower_hp = 0;
    state.player_mut(seat).elimination_reason =
        Some(towerlords_protocol::types::EliminationReason::Forfeit);
    let winner_seat = MatchState::other_seat(seat);
    state.winner_id = Some(state.player(winner_seat).user_id);
    state.phase = MatchPhase::Finished;
    state.finished_at = Some(now_ms);

    let mut out = vec![ServerFrame::MatchForfeitInfo {
        match_id: state.match_id,
        user_id,
    }];
    out.extend(state_broadcast(state));
    out
}

/// **CHAT_SEND(text)** — spec §4.5. Returns `Ok(None)` (silently dropped,
/// no broadcast) when the per-user rate limit is exceeded.
pub fn chat_send(
    state: &mut MatchState,
    user_id: UserId,
    text: &str,
    config: &MatchConfig,
    now_ms: i64,
) -> Option<Vec<ServerFrame>> {
    let seat = state.seat_of(user_id)?;
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.len() > config.chat_max_len {
        return None;
    }

    let (max_msgs, window_ms) = config.chat_rate;
    let player = state.player_mut(seat);
    if now_ms - player.chat_rate_window_start > window_ms {
        player.chat_rate_window_start = now_ms;
        player.chat_message_count = 0;
    }
    if player.chat_message_count >= max_msgs {
        return None;
    }
    player.chat_message_count += 1;

    let entry = ChatEntry {
        user_id,
        text: trimmed.to_string(),
        sent_at: now_ms,
    };
    state.chat_history.push(entry.clone());

    Some(vec![ServerFrame::ChatMsg {
        match_id: state.match_id,
        message: towerlords_protocol::wire::ChatMessageView {
            user_id: entry.user_id,
            text: entry.text,
            sent_at: entry.sent_at,
        },
    }])
}

/// Seat identity helper shared by the scheduler when building denial frames
/// outside a handler (e.g. when decode already rejected the action).
pub fn denied_frame_for_shop_buy(
    match_id: MatchId,
    card_id: CardId,
    denial: Denial,
) -> ServerFrame {
    ServerFrame::ShopBuyDenied {
        match_id,
        card_id,
        reason: denial_code(denial),
    }
}

pub fn denied_frame_for_board_place(
    match_id: MatchId,
    hand_index: u32,
    board_index: u8,
    card_id: Option<CardId>,
    denial: Denial,
) -> ServerFrame {
    ServerFrame::BoardPlaceDenied {
        match_id,
        hand_index,
        board_index,
        card_id,
        reason: denial_code(denial),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TowerCurve;
    use towerlords_protocol::ids::{Seat as SeatId, UserId as UserIdT};
    use towerlords_protocol::types::{CardDefinition, Rarity, TowerColor};

    fn catalog() -> CardCatalog {
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
            config: Default::default(),
            collectible: true,
        }])
    }

    fn fresh_match() -> MatchState {
        let curve = TowerCurve::default();
        let a = crate::player_state::PlayerState::new(
            UserIdT(uuid::Uuid::new_v4()),
            SeatId(0),
            TowerColor::Red,
            vec![],
            &curve,
            2,
        );
        let b = crate::player_state::PlayerState::new(
            UserIdT(uuid::Uuid::new_v4()),
            SeatId(1),
            TowerColor::Blue,
            vec![],
            &curve,
            2,
        );
        let mut m = MatchState::new(MatchId::new(), 42, [a, b], 50);
        m.phase = MatchPhase::Shop;
        m
    }

    #[test]
    fn buy_with_exact_gold_succeeds_scenario_1() {
        let cat = catalog();
        let mut m = fresh_match();
        let uid = m.players[0].user_id;
        m.players[0].shop = vec!["goblin_raid".to_string()];
        let config = MatchConfig::default();

        let result = shop_buy(&mut m, uid, "goblin_raid", &cat, &config);
        assert!(result.is_ok());
        assert_eq!(m.players[0].gold, 0);
        assert_eq!(m.players[0].hand, vec!["goblin_raid".to_string()]);
        assert!(m.players[0].shop.is_empty());
    }

    #[test]
    fn reject_buy_when_hand_full_scenario_2() {
        let cat = catalog();
        let mut m = fresh_match();
        let uid = m.players[0].user_id;
        m.players[0].hand = vec!["x".to_string(); 7];
        m.players[0].shop = vec!["goblin_raid".to_string()];
        m.players[0].gold = 100;
        let config = MatchConfig::default();

        let result = shop_buy(&mut m, uid, "goblin_raid", &cat, &config);
        assert!(matches!(result, Err(Denial::HandFull)));
        assert_eq!(m.players[0].hand.len(), 7);
    }

    #[test]
    fn reject_buy_with_insufficient_gold() {
        let cat = catalog();
        let mut m = fresh_match();
        let uid = m.players[0].user_id;
        m.players[0].gold = 1;
        m.players[0].shop = vec!["goblin_raid".to_string()];
        let config = MatchConfig::default();

        let result = shop_buy(&mut m, uid, "goblin_raid", &cat, &config);
        assert!(matches!(result, Err(Denial::NotEnoughGold)));
    }

    #[test]
    fn merge_to_stack_count_two_scenario_4() {
        let mut player = {
            let curve = TowerCurve::default();
            crate::player_state::PlayerState::new(
                UserIdT(uuid::Uuid::new_v4()),
                SeatId(0),
                TowerColor::Red,
                vec![],
                &curve,
                0,
            )
        };
        assert!(place_or_stack(&mut player, "reinforced_walls", BoardIndex(0)).is_none());
        assert!(place_or_stack(&mut player, "reinforced_walls", BoardIndex(1)).is_none());
        let merge = place_or_stack(&mut player, "reinforced_walls", BoardIndex(2)).unwrap();
        assert_eq!(merge.chosen_index, BoardIndex(0));
        assert_eq!(merge.cleared_indices, vec![BoardIndex(1), BoardIndex(2)]);
        assert_eq!(merge.new_merge_count, 2);
        assert!(player.board[1].is_empty());
        assert!(player.board[2].is_empty());
        assert_eq!(player.board[0].stack_count, 2);
    }

    #[test]
    fn reroll_exhausts_gold_scenario_5() {
        let cat = catalog();
        let mut m = fresh_match();
        let uid = m.players[0].user_id;
        m.players[0].gold = 4;
        m.players[0].reroll_cost = 2;
        let config = MatchConfig::default();

        assert!(shop_reroll(&mut m, uid, &cat, &config).is_ok());
        assert_eq!(m.players[0].gold, 2);
        assert!(shop_reroll(&mut m, uid, &cat, &config).is_ok());
        assert_eq!(m.players[0].gold, 0);
        let result = shop_reroll(&mut m, uid, &cat, &config);
        assert!(matches!(result, Err(Denial::NotEnoughGold)));
    }

    #[test]
    fn forfeit_ends_match_scenario_6() {
        let mut m = fresh_match();
        let loser = m.players[0].user_id;
        let winner = m.players[1].user_id;

        let frames = match_forfeit(&mut m, loser, 1000);
        assert!(!frames.is_empty());
        assert_eq!(m.phase, MatchPhase::Finished);
        assert_eq!(m.winner_id, Some(winner));
        assert_eq!(m.players[0].tower_hp, 0);
        assert_eq!(
            m.players[0].elimination_reason,
            Some(towerlords_protocol::types::EliminationReason::Forfeit)
        );
    }

    #[test]
    fn gold_never_goes_negative_across_a_sequence() {
        let cat = catalog();
        let mut m = fresh_match();
        let uid = m.players[0].user_id;
        m.players[0].gold = 3;
        m.players[0].shop = vec!["goblin_raid".to_string()];
        let config = MatchConfig::default();

        let _ = shop_buy(&mut m, uid, "goblin_raid", &cat, &config);
        assert!(m.players[0].gold >= 0);
        for _ in 0..10 {
            let _ = shop_reroll(&mut m, uid, &cat, &config);
            assert!(m.players[0].gold >= 0);
        }
    }

    fn marry_catalog() -> CardCatalog {
        CardCatalog::from_definitions(vec![
            CardDefinition {
                card_id: "marry_proposal".to_string(),
                name: "Marry Proposal".to_string(),
                card_type: CardType::Buff,
                rarity: Rarity::Rare,
                cost: 0,
                base_damage: None,
                base_hp_bonus: None,
                base_dps_bonus: None,
                buff_multiplier: None,
                config: Default::default(),
                collectible: true,
            },
            CardDefinition {
                card_id: "marry_refusal".to_string(),
                name: "Marry Refusal".to_string(),
                card_type: CardType::Defense,
                rarity: Rarity::Common,
                cost: 0,
                base_damage: None,
                base_hp_bonus: None,
                base_dps_bonus: None,
                buff_multiplier: None,
                config: Default::default(),
                collectible: false,
            },
        ])
    }

    #[test]
    fn marry_proposal_flags_the_opponent_and_grants_refusal() {
        let cat = marry_catalog();
        let mut m = fresh_match();
        let caster = m.players[0].user_id;
        m.players[0].hand = vec!["marry_proposal".to_string()];

        let result = board_place(&mut m, caster, 0, BoardIndex(0), &cat);
        assert!(result.is_ok());
        assert!(!m.players[0].pending_marry_proposal, "caster must not be flagged");
        assert!(m.players[1].pending_marry_proposal, "opponent must be flagged");
        assert_eq!(m.players[1].hand, vec!["marry_refusal".to_string()]);
        assert!(m.players[0].board.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn marry_refusal_registers_when_played_as_a_board_card() {
        let cat = marry_catalog();
        let mut m = fresh_match();
        m.players[1].pending_marry_proposal = true;
        let defender = m.players[1].user_id;
        m.players[1].hand = vec!["marry_refusal".to_string()];

        let result = board_place(&mut m, defender, 0, BoardIndex(0), &cat);
        assert!(result.is_ok());
        assert!(m.players[1].played_marry_refusal);
    }

    #[test]
    fn chat_send_rate_limits_per_window() {
        let mut m = fresh_match();
        let uid = m.players[0].user_id;
        let config = MatchConfig::default();
        let mut sent = 0;
        for i in 0..10 {
            if chat_send(&mut m, uid, "hi", &config, i).is_some() {
                sent += 1;
            }
        }
        assert_eq!(sent, config.chat_rate.0 as usize);
    }
}
