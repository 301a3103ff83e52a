//! Match Registry (C7, spec §4.7): process-wide map from `MatchId` to the
//! channel that reaches that match's scheduler task. `create` is the only
//! place a match's single writer task is spawned.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::info;

use towerlords_core::{CardCatalog, MatchConfig, PlayerState, Repository};
use towerlords_protocol::ids::{CardId, MatchId, Seat, UserId};
use towerlords_protocol::types::TowerColor;

use crate::room_bus::RoomBus;
use crate::scheduler::{self, MatchCommand};

const COMMAND_QUEUE_DEPTH: usize = 128;

/// One seat's starting material, resolved by the caller (lobby/matchmaking
/// layer) before `create` is called — the registry itself does not know
/// about decks or repositories beyond persisting the final result.
pub struct SeatSetup {
    pub user_id: UserId,
    pub tower_color: TowerColor,
    pub deck: Vec<CardId>,
}

#[derive(Clone)]
pub struct MatchRegistry {
    senders: Arc<DashMap<MatchId, mpsc::Sender<MatchCommand>>>,
    catalog: Arc<CardCatalog>,
    config: Arc<MatchConfig>,
    repo: Arc<dyn Repository>,
    bus: RoomBus,
}

impl MatchRegistry {
    pub fn new(catalog: Arc<CardCatalog>, config: Arc<MatchConfig>, repo: Arc<dyn Repository>, bus: RoomBus) -> Self {
        Self {
            senders: Arc::new(DashMap::new()),
            catalog,
            config,
            repo,
            bus,
        }
    }

    /// Creates a match for exactly two seats and spawns its scheduler task
    /// (spec §4.7 "on create: spawn the match task, seed its RNG").
    pub fn create(&self, seats: [SeatSetup; 2], rng_seed: u64) -> MatchId {
        let match_id = MatchId::new();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        self.senders.insert(match_id, tx);

        let curve = self.config.tower_curve.clone();
        let players = [
            PlayerState::new(seats[0].user_id, Seat(0), seats[0].tower_color, seats[0].deck.clone(), &curve, self.config.starting_gold),
            PlayerState::new(seats[1].user_id, Seat(1), seats[1].tower_color, seats[1].deck.clone(), &curve, self.config.starting_gold),
        ];
        let state = towerlords_core::MatchState::new(match_id, rng_seed, players, self.config.chat_ring);

        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let repo = self.repo.clone();
        let bus = self.bus.clone();
        let senders = self.senders.clone();

        info!(match_id = %match_id, "spawning match scheduler");
        tokio::spawn(async move {
            scheduler::run_match(state, catalog, config, bus, repo, rx).await;
            senders.remove(&match_id);
        });

        match_id
    }

    pub fn sender(&self, match_id: MatchId) -> Option<mpsc::Sender<MatchCommand>> {
        self.senders.get(&match_id).map(|e| e.clone())
    }

    pub fn is_live(&self, match_id: MatchId) -> bool {
        self.senders.contains_key(&match_id)
    }

    pub fn live_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use towerlords_core::{DeckRecord, RepositoryError, UserRecord};
    use towerlords_protocol::ids::LobbyId;
    use towerlords_protocol::replay::StoredMatchResult;
    use towerlords_protocol::wire::{ChatMessageView, LobbyView};
    use crate::connection::ConnectionRegistry;

    struct NullRepository;

    #[async_trait]
    impl Repository for NullRepository {
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
        async fn store_match_result(&self, _: &StoredMatchResult) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn find_match_result(&self, _: MatchId) -> Result<StoredMatchResult, RepositoryError> {
            Err(RepositoryError::NotFound)
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

    fn registry() -> MatchRegistry {
        let bus = RoomBus::new(ConnectionRegistry::new());
        MatchRegistry::new(
            Arc::new(CardCatalog::default()),
            Arc::new(MatchConfig::default()),
            Arc::new(NullRepository),
            bus,
        )
    }

    #[tokio::test]
    async fn create_spawns_a_live_match_with_a_sender() {
        let registry = registry();
        let match_id = registry.create(
            [
                SeatSetup { user_id: UserId(uuid::Uuid::new_v4()), tower_color: TowerColor::Red, deck: vec![] },
                SeatSetup { user_id: UserId(uuid::Uuid::new_v4()), tower_color: TowerColor::Blue, deck: vec![] },
            ],
            42,
        );
        assert!(registry.is_live(match_id));
        assert!(registry.sender(match_id).is_some());
        assert_eq!(registry.live_count(), 1);
    }
}
