//! In-memory `Repository` adapter (spec §4.14, §1 Non-goals: "durable
//! storage schema" is out of scope — the core only depends on the trait).
//! Generalizes the shape of `towerlords_core::repository`'s own test-only
//! `InMemoryRepository` into something `main` can run the process against
//! until a real database-backed adapter is wired in.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use towerlords_core::{DeckRecord, Repository, RepositoryError, UserRecord};
use towerlords_protocol::ids::{LobbyId, MatchId, UserId};
use towerlords_protocol::replay::StoredMatchResult;
use towerlords_protocol::wire::{ChatMessageView, LobbyView};

#[derive(Default)]
pub struct InMemoryRepository {
    users_by_token: Mutex<HashMap<String, UserRecord>>,
    decks: Mutex<HashMap<String, DeckRecord>>,
    lobbies: Mutex<HashMap<LobbyId, LobbyView>>,
    match_results: Mutex<HashMap<MatchId, StoredMatchResult>>,
    chat: Mutex<HashMap<MatchId, Vec<ChatMessageView>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token -> user mapping. Stands in for the login/register
    /// flow the spec scopes out beyond token validation (spec §1).
    pub fn seed_user(&self, token: &str, record: UserRecord) {
        self.users_by_token.lock().unwrap().insert(token.to_string(), record);
    }

    pub fn seed_deck(&self, deck: DeckRecord) {
        self.decks.lock().unwrap().insert(deck.deck_id.clone(), deck);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_user(&self, user_id: UserId) -> Result<UserRecord, RepositoryError> {
        self.users_by_token
            .lock()
            .unwrap()
            .values()
            .find(|u| u.user_id == user_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_user_by_credentials(&self, token: &str) -> Result<UserRecord, RepositoryError> {
        self.users_by_token.lock().unwrap().get(token).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn find_deck(&self, deck_id: &str) -> Result<DeckRecord, RepositoryError> {
        self.decks.lock().unwrap().get(deck_id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn list_decks(&self, owner_id: UserId) -> Result<Vec<DeckRecord>, RepositoryError> {
        Ok(self.decks.lock().unwrap().values().filter(|d| d.owner_id == owner_id).cloned().collect())
    }

    async fn create_lobby(&self, lobby: LobbyView) -> Result<LobbyId, RepositoryError> {
        let lobby_id = lobby.lobby_id;
        self.lobbies.lock().unwrap().insert(lobby_id, lobby);
        Ok(lobby_id)
    }

    async fn update_lobby(&self, lobby: LobbyView) -> Result<(), RepositoryError> {
        self.lobbies.lock().unwrap().insert(lobby.lobby_id, lobby);
        Ok(())
    }

    async fn find_lobby(&self, lobby_id: LobbyId) -> Result<LobbyView, RepositoryError> {
        self.lobbies.lock().unwrap().get(&lobby_id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn list_open_lobbies(&self) -> Result<Vec<LobbyView>, RepositoryError> {
        Ok(self.lobbies.lock().unwrap().values().filter(|l| l.status == "open").cloned().collect())
    }

    async fn create_match(&self, _match_id: MatchId, _players: &[UserId]) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn mark_match_finished(&self, _match_id: MatchId, _finished_at: i64) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn store_match_result(&self, result: &StoredMatchResult) -> Result<(), RepositoryError> {
        self.match_results.lock().unwrap().insert(result.match_id, result.clone());
        Ok(())
    }

    async fn find_match_result(&self, match_id: MatchId) -> Result<StoredMatchResult, RepositoryError> {
        self.match_results.lock().unwrap().get(&match_id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn list_match_results_by_player(&self, user_id: UserId) -> Result<Vec<StoredMatchResult>, RepositoryError> {
        Ok(self
            .match_results
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.players.iter().any(|p| p.user_id == user_id))
            .cloned()
            .collect())
    }

    async fn append_chat(&self, match_id: MatchId, message: ChatMessageView) -> Result<(), RepositoryError> {
        self.chat.lock().unwrap().entry(match_id).or_default().push(message);
        Ok(())
    }

    async fn chat_history(&self, match_id: MatchId) -> Result<Vec<ChatMessageView>, RepositoryError> {
        Ok(self.chat.lock().unwrap().get(&match_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_token_resolves_to_its_user() {
        let repo = InMemoryRepository::new();
        let user_id = UserId(uuid::Uuid::new_v4());
        repo.seed_user(
            "tok-1",
            UserRecord { user_id, username: "ada".to_string(), credential_hash: String::new() },
        );

        let found = repo.find_user_by_credentials("tok-1").await.unwrap();
        assert_eq!(found.user_id, user_id);
        assert!(matches!(repo.find_user_by_credentials("missing").await, Err(RepositoryError::NotFound)));
    }
}
