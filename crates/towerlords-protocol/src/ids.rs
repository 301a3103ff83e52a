use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Card ids are strings used in the catalog (human-readable, stable across
/// versions) — mirrors the teacher's `DataId` convention for YAML-sourced
/// content.
pub type CardId = String;

/// Opaque match identifier, generated at creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub Uuid);

impl MatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque lobby identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(pub Uuid);

impl LobbyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LobbyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LobbyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered account, stable across matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seat index within a match. The core assumes exactly two (spec §1
/// Non-goals), but the type itself does not bake that in so the invariant
/// stays an explicit runtime check rather than an implicit type limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seat(pub u8);

/// A live transport-level connection, scoped to the process lifetime of the
/// server (not persisted). Assigned by the connection registry on accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(pub u64);

/// Fixed board geometry (spec §3: `|board| = 7` exactly).
pub const BOARD_SIZE: usize = 7;

/// Index into a player's board, in `[0, BOARD_SIZE)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardIndex(pub u8);

impl BoardIndex {
    pub fn in_range(self) -> bool {
        (self.0 as usize) < BOARD_SIZE
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}
