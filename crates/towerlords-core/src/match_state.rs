//! Match State (C4): mutable per-match model (spec §3 `MatchState`, §4.4).

use towerlords_protocol::ids::{MatchId, UserId};
use towerlords_protocol::snapshot::{MatchPhase, MatchSnapshot};

use crate::player_state::PlayerState;
use crate::rng::GameRng;

/// Bounded chat log kept with the match (spec §4.12 "last 50").
#[derive(Clone, Debug, Default)]
pub struct ChatHistory {
    pub ring: std::collections::VecDeque<ChatEntry>,
    pub capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ChatEntry {
    pub user_id: UserId,
    pub text: String,
    pub sent_at: i64,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(entry);
    }
}

/// The full per-match model (spec §3 `MatchState`). Mutated only by the
/// match's own scheduler task (single-writer invariant, spec §5).
#[derive(Clone, Debug)]
pub struct MatchState {
    pub match_id: MatchId,
    pub phase: MatchPhase,
    pub round: u32,
    /// Absolute epoch-millis deadline for the current shop phase, if any.
    pub round_deadline: Option<i64>,
    pub players: [PlayerState; 2],
    pub rng_seed: u64,
    pub rng: GameRng,
    pub chat_history: ChatHistory,
    pub winner_id: Option<UserId>,
    pub finished_at: Option<i64>,
    /// Monotonic, bumped on every mutation (spec §3, §8 "Snapshot
    /// monotonicity").
    pub version: u64,
}

impl MatchState {
    pub fn new(match_id: MatchId, rng_seed: u64, players: [PlayerState; 2], chat_ring: usize) -> Self {
        Self {
            match_id,
            phase: MatchPhase::Lobby,
            round: 1,
            round_deadline: None,
            players,
            rng_seed,
            rng: GameRng::seed_from_u64(rng_seed),
            chat_history: ChatHistory::new(chat_ring),
            winner_id: None,
            finished_at: None,
            version: 0,
        }
    }

    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn player(&self, seat: u8) -> &PlayerState {
        &self.players[seat as usize]
    }

    pub fn player_mut(&mut self, seat: u8) -> &mut PlayerState {
        &mut self.players[seat as usize]
    }

    pub fn seat_of(&self, user_id: UserId) -> Option<u8> {
        self.players
            .iter()
            .position(|p| p.user_id == user_id)
            .map(|i| i as u8)
    }

    pub fn other_seat(seat: u8) -> u8 {
        1 - seat
    }

    /// Snapshot for a given recipient: their own full view plus the public
    /// view of every seat (spec §4.4, §6.1 `MATCH_STATE`).
    pub fn snapshot_for(&self, recipient: UserId) -> MatchSnapshot {
        let players = self
            .players
            .iter()
            .map(|p| p.to_public_view(self.winner_id))
            .collect();
        let self_view = self
            .players
            .iter()
            .find(|p| p.user_id == recipient)
            .map(|p| p.to_self_view())
            .unwrap_or_else(|| self.players[0].to_self_view());
        MatchSnapshot {
            v: self.version,
            match_id: self.match_id,
            phase: self.phase,
            round: self.round,
            self_view,
            players,
        }
    }
}

impl PartialEq for PlayerState {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }
}
