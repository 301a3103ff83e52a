//! Repository Interface (C14, spec §4.14): abstract persistence the core
//! depends on but never implements. "No SQL in the core; an adapter
//! implements this" — `towerlords-server` (or a future storage crate) owns
//! the concrete `Repository` backed by whatever database it chooses.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use towerlords_protocol::ids::{LobbyId, MatchId, UserId};
use towerlords_protocol::replay::StoredMatchResult;
use towerlords_protocol::wire::{ChatMessageView, LobbyView};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: String,
    pub credential_hash: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeckRecord {
    pub deck_id: String,
    pub owner_id: UserId,
    pub cards: Vec<String>,
}

/// Abstract CRUD surface used by the match runtime and the lobby/matchmaking
/// layer (spec §4.14). Every method is fallible and async: callers must not
/// block the match writer on these for longer than `PERSIST_SOFT_MS` (spec
/// §5), so the core only ever awaits this trait from outside a match's
/// single-writer section (e.g. chat append, finish-time persist).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> Result<UserRecord, RepositoryError>;
    async fn find_user_by_credentials(&self, token: &str) -> Result<UserRecord, RepositoryError>;

    async fn find_deck(&self, deck_id: &str) -> Result<DeckRecord, RepositoryError>;
    async fn list_decks(&self, owner_id: UserId) -> Result<Vec<DeckRecord>, RepositoryError>;

    async fn create_lobby(&self, lobby: LobbyView) -> Result<LobbyId, RepositoryError>;
    async fn update_lobby(&self, lobby: LobbyView) -> Result<(), RepositoryError>;
    async fn find_lobby(&self, lobby_id: LobbyId) -> Result<LobbyView, RepositoryError>;
    async fn list_open_lobbies(&self) -> Result<Vec<LobbyView>, RepositoryError>;

    async fn create_match(&self, match_id: MatchId, players: &[UserId]) -> Result<(), RepositoryError>;
    async fn mark_match_finished(&self, match_id: MatchId, finished_at: i64) -> Result<(), RepositoryError>;
    async fn store_match_result(&self, result: &StoredMatchResult) -> Result<(), RepositoryError>;
    async fn find_match_result(&self, match_id: MatchId) -> Result<StoredMatchResult, RepositoryError>;
    async fn list_match_results_by_player(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StoredMatchResult>, RepositoryError>;

    async fn append_chat(&self, match_id: MatchId, message: ChatMessageView) -> Result<(), RepositoryError>;
    async fn chat_history(&self, match_id: MatchId) -> Result<Vec<ChatMessageView>, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Minimal in-memory `Repository` used to exercise the trait's shape in
    /// tests; production storage is an adapter outside this crate.
    #[derive(Default)]
    struct InMemoryRepository {
        results: Mutex<HashMap<MatchId, StoredMatchResult>>,
    }

    #[async_trait]
    impl Repository for InMemoryRepository {
        async fn find_user(&self, _user_id: UserId) -> Result<UserRecord, RepositoryError> {
            Err(RepositoryError::NotFound)
        }

        async fn find_user_by_credentials(&self, _token: &str) -> Result<UserRecord, RepositoryError> {
            Err(RepositoryError::NotFound)
        }

        async fn find_deck(&self, _deck_id: &str) -> Result<DeckRecord, RepositoryError> {
            Err(RepositoryError::NotFound)
        }

        async fn list_decks(&self, _owner_id: UserId) -> Result<Vec<DeckRecord>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn create_lobby(&self, _lobby: LobbyView) -> Result<LobbyId, RepositoryError> {
            Ok(LobbyId::new())
        }

        async fn update_lobby(&self, _lobby: LobbyView) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn find_lobby(&self, _lobby_id: LobbyId) -> Result<LobbyView, RepositoryError> {
            Err(RepositoryError::NotFound)
        }

        async fn list_open_lobbies(&self) -> Result<Vec<LobbyView>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn create_match(&self, _match_id: MatchId, _players: &[UserId]) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn mark_match_finished(&self, _match_id: MatchId, _finished_at: i64) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn store_match_result(&self, result: &StoredMatchResult) -> Result<(), RepositoryError> {
            self.results.lock().unwrap().insert(result.match_id, result.clone());
            Ok(())
        }

        async fn find_match_result(&self, match_id: MatchId) -> Result<StoredMatchResult, RepositoryError> {
            self.results
                .lock()
                .unwrap()
                .get(&match_id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn list_match_results_by_player(
            &self,
            user_id: UserId,
        ) -> Result<Vec<StoredMatchResult>, RepositoryError> {
            Ok(self
                .results
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.players.iter().any(|p| p.user_id == user_id))
                .cloned()
                .collect())
        }

        async fn append_chat(&self, _match_id: MatchId, _message: ChatMessageView) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn chat_history(&self, _match_id: MatchId) -> Result<Vec<ChatMessageView>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn store_then_find_match_result_roundtrips() {
        let repo = InMemoryRepository::default();
        let match_id = MatchId::new();
        let result = StoredMatchResult {
            match_id,
            created_at: 0,
            finished_at: 1,
            winner_id: None,
            rounds: Vec::new(),
            players: Vec::new(),
        };
        repo.store_match_result(&result).await.unwrap();
        let fetched = repo.find_match_result(match_id).await.unwrap();
        assert_eq!(fetched.match_id, match_id);
        assert!(matches!(
            repo.find_match_result(MatchId::new()).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
