use thiserror::Error;

/// Action-denial codes (spec §4.5, §7 "Action denials"). Emitted as typed
/// `*_DENIED`/`ERROR{code:...}` frames by the caller, never as a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("not enough gold")]
    NotEnoughGold,
    #[error("hand is full")]
    HandFull,
    #[error("card is not in the shop")]
    CardNotInShop,
    #[error("invalid board slot")]
    InvalidSlot,
    #[error("slot is occupied by a different card")]
    SlotOccupied,
    #[error("stack is already at maximum")]
    StackFull,
    #[error("slot is empty")]
    EmptySlot,
    #[error("action not valid in the current phase")]
    WrongPhase,
    #[error("tower is already at max level")]
    MaxLevel,
    #[error("tower already upgraded this round")]
    AlreadyUpgradedThisRound,
}

/// Catalog lookup failure (spec §4.1).
#[derive(Debug, Clone, Error)]
#[error("unknown card id: {0}")]
pub struct UnknownCard(pub String);

/// Session-scoped errors that tell the client to forget its active match
/// and navigate home (spec §7 "Session").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("caller is not a player in this match")]
    NotAPlayer,
    #[error("match is not available")]
    MatchNotAvailable,
    #[error("match not found")]
    MatchNotFound,
    #[error("match is not running")]
    MatchNotRunning,
}
