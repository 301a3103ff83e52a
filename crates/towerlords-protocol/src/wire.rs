use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{BattleEvent, InitialUnit, TickSummary};
use crate::ids::{CardId, ConnId, LobbyId, MatchId, UserId};
use crate::snapshot::MatchSnapshot;

/// Current wire protocol version (spec §6.1: frames carry `v:1`).
pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    #[error("missing or unsupported frame version")]
    BadVersion,
}

/// Denial/error codes reused across `*_DENIED` and `ERROR` frames (spec §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialCode {
    NotEnoughGold,
    HandFull,
    CardNotInShop,
    InvalidSlot,
    SlotOccupied,
    StackFull,
    EmptySlot,
    WrongPhase,
    MaxLevel,
    AlreadyUpgradedThisRound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadFrame,
    Unauthenticated,
    AuthFail,
    Overflow,
    NotAPlayer,
    MatchNotAvailable,
    MatchNotFound,
    MatchNotRunning,
    LobbyFull,
    LobbyNotOpen,
    LobbyCodeRequired,
    NotReady,
    Timeout,
    QueueFull,
    Internal,
}

/// Public-facing lobby view used in `LOBBY_STATE` (kept intentionally thin;
/// the server owns the richer internal `Lobby` model).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyView {
    pub lobby_id: LobbyId,
    pub owner_id: UserId,
    pub status: String,
    pub players: Vec<LobbyPlayerView>,
    #[serde(default)]
    pub match_id: Option<MatchId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayerView {
    pub user_id: UserId,
    pub is_ready: bool,
    #[serde(default)]
    pub deck_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    pub user_id: UserId,
    pub text: String,
    pub sent_at: i64,
}

/// Client→server frames (spec §6.1). `v` is checked, not stored, by the
/// socket boundary; it is not part of this payload because decoding
/// already rejected anything but `v:1`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Auth {
        token: String,
    },
    Ping,
    Pong,
    MatchJoin {
        match_id: MatchId,
    },
    MatchStateRequest {
        match_id: MatchId,
    },
    MatchmakingStart {
        #[serde(default)]
        deck_id: Option<String>,
    },
    MatchmakingCancel,
    MatchReadyConfirm {
        match_id: MatchId,
    },
    LobbySubscribe {
        lobby_id: LobbyId,
    },
    LobbySetDeck {
        lobby_id: LobbyId,
        deck_id: String,
    },
    LobbySetReady {
        lobby_id: LobbyId,
        is_ready: bool,
    },
    ChatSend {
        match_id: MatchId,
        text: String,
    },
    ChatHistoryRequest {
        match_id: MatchId,
    },
    ShopReroll {
        match_id: MatchId,
    },
    ShopBuy {
        match_id: MatchId,
        card_id: CardId,
    },
    BoardPlace {
        match_id: MatchId,
        hand_index: u32,
        board_index: u8,
    },
    BoardSell {
        match_id: MatchId,
        board_index: u8,
    },
    TowerUpgrade {
        match_id: MatchId,
    },
    /// Gated by `MatchConfig::end_round_enabled` (spec §9 Open Questions).
    MatchEndRound {
        match_id: MatchId,
    },
    MatchForfeit {
        match_id: MatchId,
    },
    BattleDone {
        match_id: MatchId,
        round: u32,
    },
}

/// Server→client frames (spec §6.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Hello {
        conn_id: ConnId,
        room: String,
        ts: i64,
    },
    AuthOk {
        user_id: UserId,
    },
    AuthFail {
        #[serde(default)]
        reason: Option<String>,
    },
    Ping,
    Pong,
    MatchJoined {
        match_id: MatchId,
        seat: crate::ids::Seat,
    },
    ChatHistory {
        match_id: MatchId,
        messages: Vec<ChatMessageView>,
    },
    ChatMsg {
        match_id: MatchId,
        message: ChatMessageView,
    },
    MatchState {
        #[serde(flatten)]
        snapshot: MatchSnapshot,
    },
    MatchRoundEnd {
        match_id: MatchId,
        round: u32,
        #[serde(default)]
        phase: Option<String>,
    },
    MatchBattleUpdate {
        v: u64,
        match_id: MatchId,
        round: u32,
        events: Vec<BattleEvent>,
        initial_units: Vec<InitialUnit>,
        shots_per_tick: Vec<u32>,
        per_tick_summary: Vec<TickSummary>,
        ticks_to_reach: u32,
        post_hp: [i32; 2],
    },
    MatchForfeitInfo {
        match_id: MatchId,
        user_id: UserId,
    },
    /// A player's socket dropped mid-match; their seat is held for the
    /// reconnect grace period rather than forfeited immediately (spec §4.11).
    PlayerDisconnected {
        match_id: MatchId,
        user_id: UserId,
    },
    PlayerReconnected {
        match_id: MatchId,
        user_id: UserId,
    },
    ShopBuyDenied {
        match_id: MatchId,
        card_id: CardId,
        reason: DenialCode,
    },
    BoardPlaceDenied {
        match_id: MatchId,
        hand_index: u32,
        board_index: u8,
        #[serde(default)]
        card_id: Option<CardId>,
        reason: DenialCode,
    },
    /// Catch-all denial for actions without a dedicated `*_DENIED` shape
    /// (`SHOP_REROLL`, `BOARD_SELL`, `TOWER_UPGRADE`, `MATCH_END_ROUND`) —
    /// spec §8 scenario 5's "`SHOP_BUY_DENIED`-equivalent" for reroll.
    ActionDenied {
        match_id: MatchId,
        action: String,
        reason: DenialCode,
    },
    BoardMerge {
        match_id: MatchId,
        card_id: CardId,
        chosen_index: u8,
        cleared_indices: Vec<u8>,
        new_merge_count: u8,
    },
    LobbyState {
        #[serde(default)]
        lobby: Option<LobbyView>,
    },
    Error {
        code: ErrorCode,
        #[serde(default)]
        msg: Option<String>,
        #[serde(default)]
        issues: Vec<String>,
    },
}

/// Envelope actually written to the socket: `{v, ...frame fields}` with
/// `type` supplied by the frame's own tag (spec §6.1: "all frames are JSON
/// objects with fields `{v:1, type, ...}`").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<F> {
    pub v: u8,
    #[serde(flatten)]
    pub frame: F,
}

pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, WireError> {
    let envelope = Envelope {
        v: WIRE_VERSION,
        frame: frame.clone(),
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub fn decode_client_frame(text: &str) -> Result<ClientFrame, WireError> {
    let envelope: Envelope<ClientFrame> = serde_json::from_str(text)?;
    if envelope.v != WIRE_VERSION {
        return Err(WireError::BadVersion);
    }
    Ok(envelope.frame)
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, WireError> {
    let envelope = Envelope {
        v: WIRE_VERSION,
        frame: frame.clone(),
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub fn decode_server_frame(text: &str) -> Result<ServerFrame, WireError> {
    let envelope: Envelope<ServerFrame> = serde_json::from_str(text)?;
    if envelope.v != WIRE_VERSION {
        return Err(WireError::BadVersion);
    }
    Ok(envelope.frame)
}

/// Deterministic snapshot hash for desync detection and replay verification
/// (kept in the teacher's FNV-1a shape; the payload hashed is now the JSON
/// encoding rather than MessagePack).
pub fn snapshot_hash(snapshot: &MatchSnapshot) -> Result<u64, WireError> {
    let bytes = serde_json::to_vec(snapshot)?;
    Ok(hash_bytes_fnv1a64(&bytes))
}

/// Deterministic, stable 64-bit hash for raw bytes (FNV-1a).
pub fn hash_bytes_fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
