//! Lobby Manager (C9, spec §4.9): private two-seat rooms with an optional
//! join code. States: `open -> full -> started -> (deleted)`. Generalizes
//! the teacher's `Lobby`/`LobbyError` (ready-state, host reassignment) to
//! TowerLords' deck-selection and join-code requirements.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use towerlords_protocol::ids::{LobbyId, MatchId, UserId};
use towerlords_protocol::wire::{LobbyPlayerView, LobbyView};

const MAX_PLAYERS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LobbyStatus {
    Open,
    Full,
    Started,
    Deleted,
}

#[derive(Clone, Debug)]
struct LobbyPlayer {
    is_ready: bool,
    deck_id: Option<String>,
}

struct Lobby {
    owner_id: UserId,
    code: Option<String>,
    status: LobbyStatus,
    players: HashMap<UserId, LobbyPlayer>,
    /// Preserves join order so `start()` hands the scheduler a stable seat
    /// assignment (spec §4.9 "create a match with these players").
    order: Vec<UserId>,
    match_id: Option<MatchId>,
}

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("lobby not found")]
    NotFound,
    #[error("lobby is full")]
    LobbyFull,
    #[error("lobby is not open")]
    LobbyNotOpen,
    #[error("join code required")]
    LobbyCodeRequired,
    #[error("wrong join code")]
    WrongCode,
    #[error("caller is not in this lobby")]
    NotInLobby,
    #[error("caller already in this lobby")]
    AlreadyInLobby,
    #[error("not every player is ready with a deck selected")]
    NotReady,
    #[error("only the owner may do this")]
    NotHost,
}

#[derive(Clone)]
pub struct LobbyManager {
    lobbies: Arc<DashMap<LobbyId, Lobby>>,
}

impl LobbyManager {
    pub fn new() -> Self {
        Self {
            lobbies: Arc::new(DashMap::new()),
        }
    }

    pub fn create(&self, owner_id: UserId, code: Option<String>) -> LobbyId {
        let lobby_id = LobbyId::new();
        let mut players = HashMap::new();
        players.insert(
            owner_id,
            LobbyPlayer {
                is_ready: false,
                deck_id: None,
            },
        );
        self.lobbies.insert(
            lobby_id,
            Lobby {
                owner_id,
                code,
                status: LobbyStatus::Open,
                players,
                order: vec![owner_id],
                match_id: None,
            },
        );
        lobby_id
    }

    pub fn join(&self, lobby_id: LobbyId, user_id: UserId, code: Option<&str>) -> Result<(), LobbyError> {
        let mut lobby = self.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        if lobby.status != LobbyStatus::Open {
            return Err(LobbyError::LobbyNotOpen);
        }
        if lobby.players.contains_key(&user_id) {
            return Err(LobbyError::AlreadyInLobby);
        }
        if let Some(expected) = &lobby.code {
            match code {
                Some(given) if given == expected => {}
                Some(_) => return Err(LobbyError::WrongCode),
                None => return Err(LobbyError::LobbyCodeRequired),
            }
        }
        if lobby.players.len() >= MAX_PLAYERS {
            return Err(LobbyError::LobbyFull);
        }

        lobby.players.insert(
            user_id,
            LobbyPlayer {
                is_ready: false,
                deck_id: None,
            },
        );
        lobby.order.push(user_id);
        if lobby.players.len() >= MAX_PLAYERS {
            lobby.status = LobbyStatus::Full;
        }
        Ok(())
    }

    /// Leaving an open/full lobby removes the player; the last player
    /// leaving deletes the lobby (spec §4.9 "leave by last player deletes").
    /// Host reassignment mirrors the teacher's `Lobby::remove_player`.
    pub fn leave(&self, lobby_id: LobbyId, user_id: UserId) -> Result<(), LobbyError> {
        let mut lobby = self.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        if lobby.players.remove(&user_id).is_none() {
            return Err(LobbyError::NotInLobby);
        }
        lobby.order.retain(|u| *u != user_id);

        if lobby.players.is_empty() {
            lobby.status = LobbyStatus::Deleted;
            return Ok(());
        }
        if lobby.owner_id == user_id {
            lobby.owner_id = lobby.order[0];
        }
        if lobby.status == LobbyStatus::Full {
            lobby.status = LobbyStatus::Open;
        }
        Ok(())
    }

    pub fn set_deck(&self, lobby_id: LobbyId, user_id: UserId, deck_id: String) -> Result<(), LobbyError> {
        let mut lobby = self.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        let player = lobby.players.get_mut(&user_id).ok_or(LobbyError::NotInLobby)?;
        player.deck_id = Some(deck_id);
        Ok(())
    }

    pub fn set_ready(&self, lobby_id: LobbyId, user_id: UserId, is_ready: bool) -> Result<(), LobbyError> {
        let mut lobby = self.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        let player = lobby.players.get_mut(&user_id).ok_or(LobbyError::NotInLobby)?;
        player.is_ready = is_ready;
        Ok(())
    }

    fn can_start_locked(lobby: &Lobby) -> bool {
        lobby.status == LobbyStatus::Full
            && lobby.players.len() == MAX_PLAYERS
            && lobby.players.values().all(|p| p.is_ready && p.deck_id.is_some())
    }

    pub fn can_start(&self, lobby_id: LobbyId) -> bool {
        self.lobbies.get(&lobby_id).map(|l| Self::can_start_locked(&l)).unwrap_or(false)
    }

    /// Starts the lobby, binding it to `match_id` (spec §4.9: "On start:
    /// create a match with these players and broadcast `LOBBY_STATE`
    /// referencing `matchId`"). The match itself is created by the caller
    /// (the `MatchRegistry`) before this is invoked, since seat assignment
    /// needs the ordered player list returned here.
    pub fn start(&self, lobby_id: LobbyId, user_id: UserId, match_id: MatchId) -> Result<Vec<UserId>, LobbyError> {
        let mut lobby = self.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        if lobby.owner_id != user_id {
            return Err(LobbyError::NotHost);
        }
        if !Self::can_start_locked(&lobby) {
            return Err(LobbyError::NotReady);
        }
        lobby.status = LobbyStatus::Started;
        lobby.match_id = Some(match_id);
        Ok(lobby.order.clone())
    }

    pub fn close(&self, lobby_id: LobbyId, user_id: UserId) -> Result<(), LobbyError> {
        let mut lobby = self.lobbies.get_mut(&lobby_id).ok_or(LobbyError::NotFound)?;
        if lobby.owner_id != user_id {
            return Err(LobbyError::NotHost);
        }
        lobby.status = LobbyStatus::Deleted;
        Ok(())
    }

    pub fn view(&self, lobby_id: LobbyId) -> Option<LobbyView> {
        self.lobbies.get(&lobby_id).map(|lobby| to_view(lobby_id, &lobby))
    }

    pub fn list_open(&self) -> Vec<LobbyView> {
        self.lobbies
            .iter()
            .filter(|e| matches!(e.status, LobbyStatus::Open))
            .map(|e| to_view(*e.key(), &e))
            .collect()
    }
}

fn to_view(lobby_id: LobbyId, lobby: &Lobby) -> LobbyView {
    LobbyView {
        lobby_id,
        owner_id: lobby.owner_id,
        status: match lobby.status {
            LobbyStatus::Open => "open",
            LobbyStatus::Full => "full",
            LobbyStatus::Started => "started",
            LobbyStatus::Deleted => "deleted",
        }
        .to_string(),
        players: lobby
            .order
            .iter()
            .filter_map(|uid| {
                lobby.players.get(uid).map(|p| LobbyPlayerView {
                    user_id: *uid,
                    is_ready: p.is_ready,
                    deck_id: p.deck_id.clone(),
                })
            })
            .collect(),
        match_id: lobby.match_id,
    }
}

impl Default for LobbyManager {
    fn default() -> Self {
        Self::new()
    }
}
