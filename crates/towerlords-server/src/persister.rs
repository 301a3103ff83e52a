//! Result Persister (C13, spec §4.13): assembles `StoredMatchResult` at
//! match finish and writes it through the `Repository` trait, retrying on
//! backend failure so a flaky store doesn't drop a finished match's record
//! (spec §7 "persistence failures are retried with backoff, never silently
//! dropped").

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use towerlords_core::{Repository, RepositoryError};
use towerlords_protocol::replay::StoredMatchResult;

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 200;

#[derive(Clone)]
pub struct ResultPersister {
    repo: Arc<dyn Repository>,
}

impl ResultPersister {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Stores `result`, retrying with exponential backoff up to
    /// `MAX_ATTEMPTS` times. Logs and gives up rather than blocking the
    /// scheduler task indefinitely on a persistently broken backend.
    pub async fn persist(&self, result: StoredMatchResult) {
        let match_id = result.match_id;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.repo.store_match_result(&result).await {
                Ok(()) => {
                    let _ = self.repo.mark_match_finished(match_id, result.finished_at).await;
                    return;
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        error!(match_id = %match_id, attempt, error = %err, "giving up persisting match result");
                        return;
                    }
                    warn!(match_id = %match_id, attempt, error = %err, "retrying match result persistence");
                    tokio::time::sleep(Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1))).await;
                }
            }
        }
    }

    pub async fn find(&self, match_id: towerlords_protocol::ids::MatchId) -> Result<StoredMatchResult, RepositoryError> {
        self.repo.find_match_result(match_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use towerlords_core::{DeckRecord, UserRecord};
    use towerlords_protocol::ids::{LobbyId, MatchId, UserId};
    use towerlords_protocol::wire::{ChatMessageView, LobbyView};

    struct FlakyRepository {
        fail_until_attempt: u32,
        attempts: AtomicU32,
        stored: Mutex<Option<StoredMatchResult>>,
    }

    #[async_trait]
    impl Repository for FlakyRepository {
        async fn find_user(&self, _: UserId) -> Result<UserRecord, RepositoryError> {
            Err(RepositoryError::NotFound)
        }
        async fn find_user_by_credentials(&self, _: &str) -> Result<UserRecord, RepositoryError> {
            Err(RepositoryError::NotFound)
        }
        async fn find_deck(&self, _: &str) -> Result<DeckRecord, RepositoryError> {
            Err(RepositoryError::NotFound)
        }
        async fn list_decks(&self, _: UserId) -> Result<Vec<DeckRecord>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn create_lobby(&self, _: LobbyView) -> Result<LobbyId, RepositoryError> {
            Ok(LobbyId::new())
        }
        async fn update_lobby(&self, _: LobbyView) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn find_lobby(&self, _: LobbyId) -> Result<LobbyView, RepositoryError> {
            Err(RepositoryError::NotFound)
        }
        async fn list_open_lobbies(&self) -> Result<Vec<LobbyView>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn create_match(&self, _: MatchId, _: &[UserId]) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn mark_match_finished(&self, _: MatchId, _: i64) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn store_match_result(&self, result: &StoredMatchResult) -> Result<(), RepositoryError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < self.fail_until_attempt {
                return Err(RepositoryError::Backend("not yet".into()));
            }
            *self.stored.lock().unwrap() = Some(result.clone());
            Ok(())
        }
        async fn find_match_result(&self, _: MatchId) -> Result<StoredMatchResult, RepositoryError> {
            self.stored.lock().unwrap().clone().ok_or(RepositoryError::NotFound)
        }
        async fn list_match_results_by_player(&self, _: UserId) -> Result<Vec<StoredMatchResult>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn append_chat(&self, _: MatchId, _: ChatMessageView) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn chat_history(&self, _: MatchId) -> Result<Vec<ChatMessageView>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    fn result() -> StoredMatchResult {
        StoredMatchResult {
            match_id: MatchId::new(),
            created_at: 0,
            finished_at: 100,
            winner_id: None,
            rounds: Vec::new(),
            players: Vec::new(),
        }
    }

    #[tokio::test]
    async fn retries_until_the_backend_recovers() {
        let repo = Arc::new(FlakyRepository {
            fail_until_attempt: 3,
            attempts: AtomicU32::new(0),
            stored: Mutex::new(None),
        });
        let persister = ResultPersister::new(repo.clone());
        let result = result();
        let match_id = result.match_id;
        persister.persist(result).await;

        let found = persister.find(match_id).await.unwrap();
        assert_eq!(found.match_id, match_id);
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 3);
    }
}
