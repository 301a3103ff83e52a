//! Round Scheduler (C6, spec §4.6): the async per-match task. This task
//! holds the only `&mut MatchState` for its match (spec §5 single-writer
//! invariant) and is the sole place matches move `lobby -> shop -> combat ->
//! finished`. It owns *when*; `towerlords_core::actions`/`round` own *what*.
//!
//! Callers never touch `MatchState` directly — they send a `MatchCommand`
//! over this match's channel and await the oneshot reply. The reply is a
//! plain ack/denial; the frames an action produces are published onto the
//! Room Bus from inside this task, not handed back through the channel,
//! since most of them fan out to both players rather than just the caller.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{info, warn};

use towerlords_core::simulator::{simulate, SimParams};
use towerlords_core::{
    apply_combat_result, board_place, board_sell, chat_send, denial_code, match_end_round,
    match_forfeit, shop_buy, shop_reroll, start_match, tower_upgrade, CardCatalog, Denial, MatchConfig,
    MatchState, Repository, RoundOutcome,
};
use towerlords_protocol::ids::{BoardIndex, CardId, Seat, UserId};
use towerlords_protocol::replay::{ResultPlayer, RoundRecord, RoundReplay, RoundSummary, StoredMatchResult};
use towerlords_protocol::snapshot::MatchPhase;
use towerlords_protocol::wire::{DenialCode, ServerFrame};

use crate::chat::history_frame;
use crate::persister::ResultPersister;
use crate::room_bus::{match_room, user_room, RoomBus};

pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

/// Why a command was rejected without ever reaching a `Denial` (caller is
/// not one of this match's two seats, or the channel for an unused command
/// variant never applies). Kept distinct from `DenialCode` because it is a
/// session-shape error, not a game-rule denial (spec §7 "Session").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionRejection {
    Denied(DenialCode),
    NotAPlayer,
}

impl From<Denial> for ActionRejection {
    fn from(d: Denial) -> Self {
        ActionRejection::Denied(denial_code(d))
    }
}

pub type Ack = oneshot::Sender<Result<(), ActionRejection>>;

/// Commands accepted by a match's scheduler task (spec §4.5/§4.6). Every
/// variant but `Join` carries the acting `user_id`; `Join` is what turns
/// that id into a validated seat.
pub enum MatchCommand {
    Join {
        user_id: UserId,
        reply: oneshot::Sender<Result<Seat, ActionRejection>>,
    },
    StateRequest {
        user_id: UserId,
        reply: Ack,
    },
    ChatHistoryRequest {
        user_id: UserId,
        reply: Ack,
    },
    ShopBuy {
        user_id: UserId,
        card_id: CardId,
        reply: Ack,
    },
    ShopReroll {
        user_id: UserId,
        reply: Ack,
    },
    BoardPlace {
        user_id: UserId,
        hand_index: u32,
        board_index: u8,
        reply: Ack,
    },
    BoardSell {
        user_id: UserId,
        board_index: u8,
        reply: Ack,
    },
    TowerUpgrade {
        user_id: UserId,
        reply: Ack,
    },
    EndRound {
        user_id: UserId,
        reply: Ack,
    },
    Forfeit {
        user_id: UserId,
        reply: Ack,
    },
    ChatSend {
        user_id: UserId,
        text: String,
        reply: Ack,
    },
    /// Client finished playing back the last `MATCH_BATTLE_UPDATE`; purely
    /// informational since the simulator already ran to completion.
    BattleDone {
        user_id: UserId,
        reply: Ack,
    },
    /// The transport layer lost this player's socket; notify the room so the
    /// opponent sees the hold rather than silence (spec §4.11). The seat
    /// itself keeps playing out on its own deadlines — losing the socket
    /// does not pause the match.
    PlayerDisconnected {
        user_id: UserId,
        reply: Ack,
    },
    /// A fresh socket reconnected as this player; notify the room and push
    /// them a fresh snapshot so they pick the match back up mid-state.
    PlayerReconnected {
        user_id: UserId,
        reply: Ack,
    },
}

fn snapshot_frame(state: &MatchState, user_id: UserId) -> ServerFrame {
    ServerFrame::MatchState {
        snapshot: state.snapshot_for(user_id),
    }
}

fn publish_all(bus: &RoomBus, state: &MatchState, frames: Vec<ServerFrame>) {
    for frame in frames {
        match &frame {
            ServerFrame::MatchState { snapshot } => bus.publish(&user_room(snapshot.self_view.user_id), &frame),
            _ => bus.publish(&match_room(state.match_id), &frame),
        }
    }
}

fn send_denied(bus: &RoomBus, state: &MatchState, user_id: UserId, action: &str, reason: DenialCode) {
    bus.publish(
        &user_room(user_id),
        &ServerFrame::ActionDenied {
            match_id: state.match_id,
            action: action.to_string(),
            reason,
        },
    );
}

fn round_record(state: &MatchState, replay: RoundReplay) -> RoundRecord {
    RoundRecord {
        round: state.round,
        summary: state
            .players
            .iter()
            .map(|p| RoundSummary {
                user_id: p.user_id,
                cumulative_damage_out: p.total_damage_out,
                cumulative_damage_in: p.total_damage_in,
                tower_hp: p.tower_hp,
            })
            .collect(),
        state: state.snapshot_for(state.players[0].user_id),
        replay,
    }
}

fn stored_result(state: &MatchState, created_at: i64, rounds: Vec<RoundRecord>) -> StoredMatchResult {
    let finished_at = state.finished_at.unwrap_or_else(now_ms);
    let ranked_winner_first = |seat: usize| -> u8 {
        match state.winner_id {
            Some(uid) if uid == state.players[seat].user_id => 1,
            Some(_) => 2,
            None => 1,
        }
    };
    StoredMatchResult {
        match_id: state.match_id,
        created_at,
        finished_at,
        winner_id: state.winner_id,
        rounds,
        players: state
            .players
            .iter()
            .enumerate()
            .map(|(seat, p)| ResultPlayer {
                user_id: p.user_id,
                // `PlayerState` doesn't carry a display name; the registry
                // caller resolves it from the repository when it builds the
                // seat list and could thread it through here in a follow-up.
                username: p.user_id.0.to_string(),
                seat: p.seat,
                tower_color: p.tower_color,
                final_rank: ranked_winner_first(seat),
                elimination_reason: p.elimination_reason,
            })
            .collect(),
    }
}

/// Runs one match end-to-end: populates the opening shop, then alternates
/// `shop` (draining commands until `round_deadline` or an armed
/// `MATCH_END_ROUND` fires combat) and `combat` (one synchronous
/// `simulate()` call) until a tower falls, then lingers for
/// `FINISHED_GRACE_MS` so late `MATCH_STATE`/`CHAT_HISTORY` requests still
/// get an answer before the task exits.
pub async fn run_match(
    mut state: MatchState,
    catalog: Arc<CardCatalog>,
    config: Arc<MatchConfig>,
    bus: RoomBus,
    repo: Arc<dyn Repository>,
    mut commands: mpsc::Receiver<MatchCommand>,
) {
    let match_id = state.match_id;
    let created_at = now_ms();
    let persister = ResultPersister::new(repo);
    let mut rounds: Vec<RoundRecord> = Vec::new();

    info!(match_id = %match_id, "match scheduler starting");
    let opening = start_match(&mut state, &catalog, &config);
    publish_all(&bus, &state, opening);
    state.round_deadline = Some(now_ms() + config.round_shop_ms as i64);

    loop {
        if state.phase == MatchPhase::Finished {
            break;
        }

        let deadline = state
            .round_deadline
            .map(|ms| Instant::now() + duration_until(ms))
            .unwrap_or_else(|| Instant::now() + Duration::from_millis(config.round_shop_ms));

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                run_combat(&mut state, &catalog, &config, &bus, &mut rounds);
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => handle_command(&mut state, &catalog, &config, &bus, cmd),
                    None => {
                        warn!(match_id = %match_id, "command channel closed, ending match early");
                        break;
                    }
                }
            }
        }
    }

    persister.persist(stored_result(&state, created_at, rounds)).await;

    let grace = Duration::from_millis(config.finished_grace_ms);
    let grace_deadline = Instant::now() + grace;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(grace_deadline) => break,
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => handle_command(&mut state, &catalog, &config, &bus, cmd),
                    None => break,
                }
            }
        }
    }
    info!(match_id = %match_id, "match scheduler exiting");
}

fn duration_until(target_ms: i64) -> Duration {
    let delta = target_ms - now_ms();
    if delta <= 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis(delta as u64)
    }
}

fn run_combat(state: &mut MatchState, catalog: &CardCatalog, config: &MatchConfig, bus: &RoomBus, rounds: &mut Vec<RoundRecord>) {
    let params = SimParams {
        ticks_to_reach: config.ticks_to_reach,
        max_ticks: 200,
        tick_ms: config.sim_tick_ms,
    };
    let result = simulate(&state.players[0], &state.players[1], catalog, params);
    let replay = RoundReplay {
        events: result.events.clone(),
        ticks_to_reach: result.ticks_to_reach,
        initial_units: result.initial_units.clone(),
        shots_per_tick: result.shots_per_tick.clone(),
        per_tick_summary: result.per_tick_summary.clone(),
    };

    match apply_combat_result(state, &result, catalog, config, now_ms()) {
        RoundOutcome::Continuing(frames) => {
            rounds.push(round_record(state, replay));
            publish_all(bus, state, frames);
            state.round_deadline = Some(now_ms() + config.round_shop_ms as i64);
        }
        RoundOutcome::Finished(frames) => {
            rounds.push(round_record(state, replay));
            publish_all(bus, state, frames);
            state.round_deadline = None;
        }
    }
}

fn handle_command(state: &mut MatchState, catalog: &CardCatalog, config: &MatchConfig, bus: &RoomBus, cmd: MatchCommand) {
    match cmd {
        MatchCommand::Join { user_id, reply } => {
            let result = match state.seat_of(user_id) {
                Some(seat) => {
                    bus.publish(&user_room(user_id), &snapshot_frame(state, user_id));
                    Ok(Seat(seat))
                }
                None => Err(ActionRejection::NotAPlayer),
            };
            let _ = reply.send(result);
        }
        MatchCommand::StateRequest { user_id, reply } => {
            if state.seat_of(user_id).is_none() {
                let _ = reply.send(Err(ActionRejection::NotAPlayer));
                return;
            }
            bus.publish(&user_room(user_id), &snapshot_frame(state, user_id));
            let _ = reply.send(Ok(()));
        }
        MatchCommand::ChatHistoryRequest { user_id, reply } => {
            if state.seat_of(user_id).is_none() {
                let _ = reply.send(Err(ActionRejection::NotAPlayer));
                return;
            }
            bus.publish(&user_room(user_id), &history_frame(state));
            let _ = reply.send(Ok(()));
        }
        MatchCommand::ShopBuy { user_id, card_id, reply } => {
            match shop_buy(state, user_id, &card_id, catalog, config) {
                Ok(frames) => {
                    publish_all(bus, state, frames);
                    let _ = reply.send(Ok(()));
                }
                Err(denial) => {
                    let code = denial_code(denial);
                    send_denied(bus, state, user_id, "SHOP_BUY", code);
                    let _ = reply.send(Err(ActionRejection::Denied(code)));
                }
            }
        }
        MatchCommand::ShopReroll { user_id, reply } => {
            match shop_reroll(state, user_id, catalog, config) {
                Ok(frames) => {
                    publish_all(bus, state, frames);
                    let _ = reply.send(Ok(()));
                }
                Err(denial) => {
                    let code = denial_code(denial);
                    send_denied(bus, state, user_id, "SHOP_REROLL", code);
                    let _ = reply.send(Err(ActionRejection::Denied(code)));
                }
            }
        }
        MatchCommand::BoardPlace { user_id, hand_index, board_index, reply } => {
            match board_place(state, user_id, hand_index as usize, BoardIndex(board_index), catalog) {
                Ok((frames, merge)) => {
                    publish_all(bus, state, frames);
                    if let Some(merge) = merge {
                        bus.publish(
                            &match_room(state.match_id),
                            &ServerFrame::BoardMerge {
                                match_id: state.match_id,
                                card_id: merge.card_id,
                                chosen_index: merge.chosen_index.0,
                                cleared_indices: merge.cleared_indices.iter().map(|i| i.0).collect(),
                                new_merge_count: merge.new_merge_count,
                            },
                        );
                    }
                    let _ = reply.send(Ok(()));
                }
                Err(denial) => {
                    let code = denial_code(denial);
                    bus.publish(
                        &user_room(user_id),
                        &ServerFrame::BoardPlaceDenied {
                            match_id: state.match_id,
                            hand_index,
                            board_index,
                            card_id: None,
                            reason: code,
                        },
                    );
                    let _ = reply.send(Err(ActionRejection::Denied(code)));
                }
            }
        }
        MatchCommand::BoardSell { user_id, board_index, reply } => {
            match board_sell(state, user_id, BoardIndex(board_index), catalog) {
                Ok(frames) => {
                    publish_all(bus, state, frames);
                    let _ = reply.send(Ok(()));
                }
                Err(denial) => {
                    let code = denial_code(denial);
                    send_denied(bus, state, user_id, "BOARD_SELL", code);
                    let _ = reply.send(Err(ActionRejection::Denied(code)));
                }
            }
        }
        MatchCommand::TowerUpgrade { user_id, reply } => {
            match tower_upgrade(state, user_id, config) {
                Ok(frames) => {
                    publish_all(bus, state, frames);
                    let _ = reply.send(Ok(()));
                }
                Err(denial) => {
                    let code = denial_code(denial);
                    send_denied(bus, state, user_id, "TOWER_UPGRADE", code);
                    let _ = reply.send(Err(ActionRejection::Denied(code)));
                }
            }
        }
        MatchCommand::EndRound { user_id, reply } => {
            match match_end_round(state, user_id, config) {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                }
                Err(denial) => {
                    let code = denial_code(denial);
                    send_denied(bus, state, user_id, "MATCH_END_ROUND", code);
                    let _ = reply.send(Err(ActionRejection::Denied(code)));
                }
            }
        }
        MatchCommand::Forfeit { user_id, reply } => {
            if state.seat_of(user_id).is_none() {
                let _ = reply.send(Err(ActionRejection::NotAPlayer));
                return;
            }
            let frames = match_forfeit(state, user_id, now_ms());
            publish_all(bus, state, frames);
            let _ = reply.send(Ok(()));
        }
        MatchCommand::ChatSend { user_id, text, reply } => {
            if let Some(frames) = chat_send(state, user_id, &text, config, now_ms()) {
                publish_all(bus, state, frames);
            }
            let _ = reply.send(Ok(()));
        }
        MatchCommand::BattleDone { user_id: _, reply } => {
            let _ = reply.send(Ok(()));
        }
        MatchCommand::PlayerDisconnected { user_id, reply } => {
            if state.seat_of(user_id).is_none() {
                let _ = reply.send(Err(ActionRejection::NotAPlayer));
                return;
            }
            bus.publish(
                &match_room(state.match_id),
                &ServerFrame::PlayerDisconnected {
                    match_id: state.match_id,
                    user_id,
                },
            );
            let _ = reply.send(Ok(()));
        }
        MatchCommand::PlayerReconnected { user_id, reply } => {
            if state.seat_of(user_id).is_none() {
                let _ = reply.send(Err(ActionRejection::NotAPlayer));
                return;
            }
            bus.publish(
                &match_room(state.match_id),
                &ServerFrame::PlayerReconnected {
                    match_id: state.match_id,
                    user_id,
                },
            );
            bus.publish(&user_room(user_id), &snapshot_frame(state, user_id));
            let _ = reply.send(Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use towerlords_core::config::TowerCurve;
    use towerlords_core::player_state::PlayerState;
    use towerlords_core::{DeckRecord, RepositoryError, UserRecord};
    use towerlords_protocol::ids::{LobbyId, MatchId};
    use towerlords_protocol::types::TowerColor;
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

    fn fresh_match() -> MatchState {
        let curve = TowerCurve::default();
        let a = PlayerState::new(UserId(uuid::Uuid::new_v4()), Seat(0), TowerColor::Red, vec![], &curve, 5);
        let b = PlayerState::new(UserId(uuid::Uuid::new_v4()), Seat(1), TowerColor::Blue, vec![], &curve, 5);
        MatchState::new(MatchId::new(), 7, [a, b], 50)
    }

    #[tokio::test]
    async fn join_by_a_player_returns_their_seat() {
        let catalog = CardCatalog::default();
        let config = MatchConfig::default();
        let bus = RoomBus::new(ConnectionRegistry::new());
        let mut state = fresh_match();
        let uid = state.players[1].user_id;

        let (tx, rx) = oneshot::channel();
        handle_command(&mut state, &catalog, &config, &bus, MatchCommand::Join { user_id: uid, reply: tx });
        assert_eq!(rx.await.unwrap(), Ok(Seat(1)));
    }

    #[tokio::test]
    async fn join_by_a_stranger_is_rejected() {
        let catalog = CardCatalog::default();
        let config = MatchConfig::default();
        let bus = RoomBus::new(ConnectionRegistry::new());
        let mut state = fresh_match();
        let stranger = UserId(uuid::Uuid::new_v4());

        let (tx, rx) = oneshot::channel();
        handle_command(&mut state, &catalog, &config, &bus, MatchCommand::Join { user_id: stranger, reply: tx });
        assert_eq!(rx.await.unwrap(), Err(ActionRejection::NotAPlayer));
    }

    #[tokio::test]
    async fn forfeit_finishes_the_match() {
        let catalog = CardCatalog::default();
        let config = MatchConfig::default();
        let bus = RoomBus::new(ConnectionRegistry::new());
        let mut state = fresh_match();
        state.phase = MatchPhase::Shop;
        let uid = state.players[0].user_id;

        let (tx, rx) = oneshot::channel();
        handle_command(&mut state, &catalog, &config, &bus, MatchCommand::Forfeit { user_id: uid, reply: tx });
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert_eq!(state.phase, MatchPhase::Finished);
    }

    #[tokio::test]
    async fn combat_round_with_empty_boards_returns_to_shop() {
        let catalog = CardCatalog::default();
        let config = MatchConfig::default();
        let bus = RoomBus::new(ConnectionRegistry::new());
        let mut state = fresh_match();
        state.phase = MatchPhase::Combat;
        let mut rounds = Vec::new();

        run_combat(&mut state, &catalog, &config, &bus, &mut rounds);
        assert_eq!(state.phase, MatchPhase::Shop);
        assert_eq!(rounds.len(), 1);
    }

    #[tokio::test]
    async fn player_disconnected_is_rejected_for_a_stranger() {
        let catalog = CardCatalog::default();
        let config = MatchConfig::default();
        let bus = RoomBus::new(ConnectionRegistry::new());
        let mut state = fresh_match();
        let stranger = UserId(uuid::Uuid::new_v4());

        let (tx, rx) = oneshot::channel();
        handle_command(
            &mut state,
            &catalog,
            &config,
            &bus,
            MatchCommand::PlayerDisconnected { user_id: stranger, reply: tx },
        );
        assert_eq!(rx.await.unwrap(), Err(ActionRejection::NotAPlayer));
    }

    #[tokio::test]
    async fn player_reconnected_acks_for_a_seated_player() {
        let catalog = CardCatalog::default();
        let config = MatchConfig::default();
        let bus = RoomBus::new(ConnectionRegistry::new());
        let mut state = fresh_match();
        let uid = state.players[0].user_id;

        let (tx, rx) = oneshot::channel();
        handle_command(
            &mut state,
            &catalog,
            &config,
            &bus,
            MatchCommand::PlayerReconnected { user_id: uid, reply: tx },
        );
        assert_eq!(rx.await.unwrap(), Ok(()));
    }
}
