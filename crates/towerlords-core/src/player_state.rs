//! Per-seat authoritative state (spec §3 `PlayerState`).

use towerlords_protocol::ids::{BoardIndex, CardId, Seat, UserId, BOARD_SIZE};
use towerlords_protocol::snapshot::{BoardSlotView, PlayerPublicView, PlayerSelfView};
use towerlords_protocol::types::{BoardSlot, EliminationReason, TowerColor};

use crate::config::TowerCurve;

#[derive(Clone, Debug)]
pub struct PlayerState {
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
    pub board: [BoardSlot; BOARD_SIZE],
    pub shop: Vec<CardId>,
    pub total_damage_out: i64,
    pub total_damage_in: i64,
    pub elimination_reason: Option<EliminationReason>,
    pub pending_marry_proposal: bool,
    /// Cleared at the start of each round; set when the player places
    /// `marry_refusal` this round (spec §4.3 `marry_proposal` rule).
    pub played_marry_refusal: bool,
    /// Permanent per-round gold income from ECONOMY cards played so far
    /// (spec §4.6 `combat -> shop`: `GOLD_PER_ROUND + economyBonus`).
    pub gold_bonus_per_round: i32,
    pub last_tower_upgrade_round: u32,
    /// Rolling chat rate-limit window: message count since `rate_window_start`
    /// (spec §4.5 `CHAT_SEND`, §6.4 `CHAT_RATE`).
    pub chat_message_count: u32,
    pub chat_rate_window_start: i64,
}

impl PlayerState {
    pub fn new(
        user_id: UserId,
        seat: Seat,
        tower_color: TowerColor,
        deck: Vec<CardId>,
        curve: &TowerCurve,
        starting_gold: i32,
    ) -> Self {
        Self {
            user_id,
            seat,
            tower_color,
            tower_level: 1,
            tower_hp: curve.hp_max(1),
            tower_hp_max: curve.hp_max(1),
            tower_dps: curve.dps(1),
            gold: starting_gold,
            reroll_cost: 1,
            tower_upgrade_cost: curve.upgrade_cost(1).unwrap_or(i32::MAX),
            deck,
            hand: Vec::new(),
            discard: Vec::new(),
            board: std::array::from_fn(|_| BoardSlot::empty()),
            shop: Vec::new(),
            total_damage_out: 0,
            total_damage_in: 0,
            elimination_reason: None,
            pending_marry_proposal: false,
            played_marry_refusal: false,
            gold_bonus_per_round: 0,
            last_tower_upgrade_round: 0,
            chat_message_count: 0,
            chat_rate_window_start: 0,
        }
    }

    pub fn is_eliminated(&self) -> bool {
        self.tower_hp <= 0
    }

    pub fn board_slot(&self, idx: BoardIndex) -> Option<&BoardSlot> {
        self.board.get(idx.as_usize())
    }

    pub fn board_slot_mut(&mut self, idx: BoardIndex) -> Option<&mut BoardSlot> {
        self.board.get_mut(idx.as_usize())
    }

    /// Total copies of `card_id` occupying board slots, used to detect a
    /// third scattered copy that should trigger a merge (spec §4.5
    /// `BOARD_PLACE`).
    pub fn board_copy_count(&self, card_id: &str) -> u32 {
        self.board
            .iter()
            .filter(|s| s.card_id.as_deref() == Some(card_id))
            .map(|s| 1 + s.stack_count as u32)
            .sum()
    }

    pub fn to_self_view(&self) -> PlayerSelfView {
        PlayerSelfView {
            user_id: self.user_id,
            seat: self.seat,
            tower_color: self.tower_color,
            tower_level: self.tower_level,
            tower_hp: self.tower_hp,
            tower_hp_max: self.tower_hp_max,
            tower_dps: self.tower_dps,
            gold: self.gold,
            reroll_cost: self.reroll_cost,
            tower_upgrade_cost: self.tower_upgrade_cost,
            deck: self.deck.clone(),
            hand: self.hand.clone(),
            discard: self.discard.clone(),
            board: self.board.clone().map(|s| BoardSlotView {
                card_id: s.card_id,
                stack_count: s.stack_count,
            }),
            shop: self.shop.clone(),
            total_damage_out: self.total_damage_out,
            total_damage_in: self.total_damage_in,
            elimination_reason: self.elimination_reason,
            pending_marry_proposal: self.pending_marry_proposal,
            last_tower_upgrade_round: self.last_tower_upgrade_round,
        }
    }

    pub fn to_public_view(&self, winner: Option<UserId>) -> PlayerPublicView {
        PlayerPublicView {
            user_id: self.user_id,
            seat: self.seat,
            tower_color: self.tower_color,
            tower_level: self.tower_level,
            tower_hp: self.tower_hp,
            tower_hp_max: self.tower_hp_max,
            elimination_reason: self.elimination_reason,
            is_winner: winner == Some(self.user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId(uuid::Uuid::new_v4())
    }

    #[test]
    fn new_player_starts_at_level_one_full_hp() {
        let curve = TowerCurve::default();
        let p = PlayerState::new(user(), Seat(0), TowerColor::Red, vec![], &curve, 3);
        assert_eq!(p.tower_level, 1);
        assert_eq!(p.tower_hp, curve.hp_max(1));
        assert_eq!(p.tower_hp, p.tower_hp_max);
        assert!(!p.is_eliminated());
        assert_eq!(p.board.len(), BOARD_SIZE);
        assert!(p.board.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn board_copy_count_sums_stacked_and_scattered_copies() {
        let curve = TowerCurve::default();
        let mut p = PlayerState::new(user(), Seat(0), TowerColor::Blue, vec![], &curve, 0);
        p.board[0].card_id = Some("reinforced_walls".to_string());
        p.board[0].stack_count = 1;
        p.board[2].card_id = Some("reinforced_walls".to_string());
        p.board[2].stack_count = 0;
        assert_eq!(p.board_copy_count("reinforced_walls"), 3);
        assert_eq!(p.board_copy_count("unrelated"), 0);
    }
}
