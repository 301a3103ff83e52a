//! WebSocket transport (spec §6.1): the axum upgrade handler and the
//! reader/writer task pair that turns one socket into a registered
//! connection. Frame decode/encode goes through `towerlords_protocol::wire`;
//! this module's only job is the `connected -> authenticated -> closed`
//! handshake and dispatching authenticated frames to the match/lobby/
//! matchmaking layers.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use towerlords_core::Repository;
use towerlords_protocol::ids::{CardId, ConnId, LobbyId, MatchId, Seat, UserId};
use towerlords_protocol::types::TowerColor;
use towerlords_protocol::wire::{decode_client_frame, ClientFrame, ErrorCode, ServerFrame};

use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::lobby::LobbyManager;
use crate::matchmaking::{MatchedPair, MatchmakingError, MatchmakingQueue};
use crate::registry::{MatchRegistry, SeatSetup};
use crate::room_bus::{lobby_room, match_id_from_room, match_room, user_room, RoomBus};
use crate::scheduler::{ActionRejection, MatchCommand};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub connections: ConnectionRegistry,
    pub bus: RoomBus,
    pub matches: MatchRegistry,
    pub lobbies: LobbyManager,
    pub queue: Arc<MatchmakingQueue>,
    pub repo: Arc<dyn Repository>,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

fn error_frame(code: ErrorCode, msg: Option<String>) -> ServerFrame {
    ServerFrame::Error { code, msg, issues: Vec::new() }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let conn_id = state.connections.register(outbound_tx, now_ms());

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    state.bus.send_to(conn_id, &ServerFrame::Hello { conn_id, room: "lobby".to_string(), ts: now_ms() });

    let Some(user_id) = authenticate(&state, conn_id, &mut stream).await else {
        cleanup(&state, conn_id).await;
        writer.abort();
        return;
    };

    info!(conn_id = conn_id.0, user_id = %user_id, "connection authenticated");
    state.bus.subscribe(conn_id, &user_room(user_id));
    resume_held_rooms(&state, conn_id, user_id).await;

    let keepalive = Duration::from_millis(state.config.keepalive_ms);
    let mut ticker = tokio::time::interval(keepalive);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if state.connections.record_ping_sweep(conn_id, state.config.keepalive_miss) {
                    warn!(conn_id = conn_id.0, "keepalive exceeded, closing connection");
                    break;
                }
                state.bus.send_to(conn_id, &ServerFrame::Ping);
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(&state, conn_id, user_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(conn_id = conn_id.0, error = %err, "socket read error");
                        break;
                    }
                }
            }
        }
    }

    cleanup(&state, conn_id).await;
    writer.abort();
}

/// Closing a socket no longer tears its rooms down unconditionally: an
/// authenticated connection is held as `Disconnected` instead, so a
/// reconnect can pick its match rooms back up (spec §4.11). A connection
/// that never authenticated has nothing worth holding.
async fn cleanup(state: &AppState, conn_id: ConnId) {
    match state.connections.begin_disconnect(conn_id, now_ms()) {
        Some((user_id, rooms)) => {
            for room in &rooms {
                if let Some(match_id) = match_id_from_room(room) {
                    notify_match(state, match_id, |reply| MatchCommand::PlayerDisconnected { user_id, reply }).await;
                }
            }
        }
        None => state.bus.drop_connection(conn_id),
    }
}

/// Picks up any rooms left behind by a prior socket for this user (spec
/// §4.11 reconnect) and tells each affected match the player is back.
async fn resume_held_rooms(state: &AppState, conn_id: ConnId, user_id: UserId) {
    let Some((old_conn_id, rooms)) = state.connections.reconnect(user_id) else {
        return;
    };
    state.bus.migrate_connection(old_conn_id, conn_id, &rooms);
    for room in &rooms {
        if let Some(match_id) = match_id_from_room(room) {
            notify_match(state, match_id, |reply| MatchCommand::PlayerReconnected { user_id, reply }).await;
        }
    }
}

async fn notify_match<F>(state: &AppState, match_id: MatchId, build: F)
where
    F: FnOnce(oneshot::Sender<Result<(), ActionRejection>>) -> MatchCommand,
{
    if let Some(sender) = state.matches.sender(match_id) {
        let (reply, _reply_rx) = oneshot::channel();
        let _ = sender.send(build(reply)).await;
    }
}

/// Background task: forces a forfeit for any player whose socket has been
/// `Disconnected` for longer than `grace_ms` (spec §4.11 "forced forfeit on
/// timeout"). Runs for the life of the process.
pub async fn run_disconnect_sweeper(state: AppState, grace_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(grace_ms.max(1_000) / 2));
    loop {
        ticker.tick().await;
        for (conn_id, user_id, rooms) in state.connections.sweep_expired_disconnects(grace_ms, now_ms()) {
            state.bus.forget_rooms(conn_id, &rooms);
            for room in &rooms {
                if let Some(match_id) = match_id_from_room(room) {
                    warn!(match_id = %match_id, user_id = %user_id, "forcing forfeit after reconnect grace expired");
                    notify_match(&state, match_id, |reply| MatchCommand::Forfeit { user_id, reply }).await;
                }
            }
        }
    }
}

/// Runs the `connected -> authenticated` phase: closes the socket if `AUTH`
/// doesn't arrive within `auth_timeout_ms` (spec §4.11), otherwise returns
/// the authenticated user.
async fn authenticate(
    state: &AppState,
    conn_id: ConnId,
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<UserId> {
    let deadline = tokio::time::sleep(Duration::from_millis(state.config.auth_timeout_ms));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return None,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match decode_client_frame(&text) {
                            Ok(ClientFrame::Auth { token }) => {
                                match state.repo.find_user_by_credentials(&token).await {
                                    Ok(record) => {
                                        if state.connections.authenticate(conn_id, record.user_id).is_ok() {
                                            state.bus.send_to(conn_id, &ServerFrame::AuthOk { user_id: record.user_id });
                                            return Some(record.user_id);
                                        }
                                        return None;
                                    }
                                    Err(_) => {
                                        state.bus.send_to(conn_id, &ServerFrame::AuthFail { reason: Some("invalid token".to_string()) });
                                    }
                                }
                            }
                            Ok(ClientFrame::Ping) => state.bus.send_to(conn_id, &ServerFrame::Pong),
                            _ => {
                                state.bus.send_to(conn_id, &error_frame(ErrorCode::Unauthenticated, None));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    _ => {}
                }
            }
        }
    }
}

async fn dispatch_text(state: &AppState, conn_id: ConnId, user_id: UserId, text: &str) {
    state.connections.touch(conn_id, now_ms());
    let frame = match decode_client_frame(text) {
        Ok(frame) => frame,
        Err(_) => {
            state.bus.send_to(conn_id, &error_frame(ErrorCode::BadFrame, None));
            return;
        }
    };

    match frame {
        ClientFrame::Auth { .. } => {}
        ClientFrame::Ping => state.bus.send_to(conn_id, &ServerFrame::Pong),
        ClientFrame::Pong => {}
        ClientFrame::MatchReadyConfirm { .. } => {}
        ClientFrame::MatchJoin { match_id } => join_match(state, conn_id, user_id, match_id).await,
        ClientFrame::MatchStateRequest { match_id } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::StateRequest { user_id, reply }).await
        }
        ClientFrame::ChatHistoryRequest { match_id } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::ChatHistoryRequest { user_id, reply }).await
        }
        ClientFrame::ChatSend { match_id, text } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::ChatSend { user_id, text, reply }).await
        }
        ClientFrame::ShopReroll { match_id } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::ShopReroll { user_id, reply }).await
        }
        ClientFrame::ShopBuy { match_id, card_id } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::ShopBuy { user_id, card_id, reply }).await
        }
        ClientFrame::BoardPlace { match_id, hand_index, board_index } => {
            send_ack_command(state, conn_id, match_id, |reply| {
                MatchCommand::BoardPlace { user_id, hand_index, board_index, reply }
            })
            .await
        }
        ClientFrame::BoardSell { match_id, board_index } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::BoardSell { user_id, board_index, reply }).await
        }
        ClientFrame::TowerUpgrade { match_id } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::TowerUpgrade { user_id, reply }).await
        }
        ClientFrame::MatchEndRound { match_id } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::EndRound { user_id, reply }).await
        }
        ClientFrame::MatchForfeit { match_id } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::Forfeit { user_id, reply }).await
        }
        ClientFrame::BattleDone { match_id, .. } => {
            send_ack_command(state, conn_id, match_id, |reply| MatchCommand::BattleDone { user_id, reply }).await
        }
        ClientFrame::MatchmakingStart { deck_id } => matchmaking_start(state, conn_id, user_id, deck_id).await,
        ClientFrame::MatchmakingCancel => {
            state.queue.cancel(user_id);
        }
        ClientFrame::LobbySubscribe { lobby_id } => lobby_subscribe(state, conn_id, lobby_id),
        ClientFrame::LobbySetDeck { lobby_id, deck_id } => lobby_set_deck(state, conn_id, user_id, lobby_id, deck_id),
        ClientFrame::LobbySetReady { lobby_id, is_ready } => lobby_set_ready(state, conn_id, user_id, lobby_id, is_ready),
    }
}

async fn join_match(state: &AppState, conn_id: ConnId, user_id: UserId, match_id: MatchId) {
    let Some(sender) = state.matches.sender(match_id) else {
        state.bus.send_to(conn_id, &error_frame(ErrorCode::MatchNotFound, None));
        return;
    };
    let (reply, reply_rx) = oneshot::channel();
    if sender.send(MatchCommand::Join { user_id, reply }).await.is_err() {
        state.bus.send_to(conn_id, &error_frame(ErrorCode::MatchNotRunning, None));
        return;
    }
    match reply_rx.await {
        Ok(Ok(seat)) => {
            state.bus.subscribe(conn_id, &match_room(match_id));
            state.bus.send_to(conn_id, &ServerFrame::MatchJoined { match_id, seat });
        }
        Ok(Err(ActionRejection::NotAPlayer)) => {
            state.bus.send_to(conn_id, &error_frame(ErrorCode::NotAPlayer, None));
        }
        Ok(Err(ActionRejection::Denied(_))) | Err(_) => {
            state.bus.send_to(conn_id, &error_frame(ErrorCode::Internal, None));
        }
    }
}

/// Sends a command that replies with a plain `Result<(), ActionRejection>`;
/// shared by every in-match action except `MATCH_JOIN` (which returns a
/// seat). A denial's frame is published by the scheduler itself, so this
/// only needs to surface session-shape errors back to the caller.
async fn send_ack_command<F>(state: &AppState, conn_id: ConnId, match_id: MatchId, build: F)
where
    F: FnOnce(oneshot::Sender<Result<(), ActionRejection>>) -> MatchCommand,
{
    let Some(sender) = state.matches.sender(match_id) else {
        state.bus.send_to(conn_id, &error_frame(ErrorCode::MatchNotFound, None));
        return;
    };
    let (reply, reply_rx) = oneshot::channel();
    if sender.send(build(reply)).await.is_err() {
        state.bus.send_to(conn_id, &error_frame(ErrorCode::MatchNotRunning, None));
        return;
    }
    match tokio::time::timeout(Duration::from_millis(state.config.action_timeout_ms), reply_rx).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(ActionRejection::NotAPlayer))) => {
            state.bus.send_to(conn_id, &error_frame(ErrorCode::NotAPlayer, None));
        }
        Ok(Ok(Err(ActionRejection::Denied(_)))) => {}
        Ok(Err(_)) => state.bus.send_to(conn_id, &error_frame(ErrorCode::Internal, None)),
        Err(_) => state.bus.send_to(conn_id, &error_frame(ErrorCode::Timeout, None)),
    }
}

async fn matchmaking_start(state: &AppState, conn_id: ConnId, user_id: UserId, deck_id: Option<String>) {
    match state.queue.start(user_id, deck_id, now_ms()) {
        Ok(Some(pair)) => create_match_from_pair(state, pair).await,
        Ok(None) => {}
        Err(MatchmakingError::AlreadyQueued) => {
            state.bus.send_to(conn_id, &error_frame(ErrorCode::Internal, Some("already queued".to_string())));
        }
        Err(MatchmakingError::QueueFull) => {
            state.bus.send_to(conn_id, &error_frame(ErrorCode::QueueFull, None));
        }
    }
}

async fn resolve_deck(state: &AppState, deck_id: Option<&str>) -> Vec<CardId> {
    match deck_id {
        Some(id) => state.repo.find_deck(id).await.map(|d| d.cards).unwrap_or_default(),
        None => Vec::new(),
    }
}

async fn create_match_from_pair(state: &AppState, pair: MatchedPair) {
    let deck_a = resolve_deck(state, pair.a.1.as_deref()).await;
    let deck_b = resolve_deck(state, pair.b.1.as_deref()).await;
    let seats = [
        SeatSetup { user_id: pair.a.0, tower_color: TowerColor::Red, deck: deck_a },
        SeatSetup { user_id: pair.b.0, tower_color: TowerColor::Blue, deck: deck_b },
    ];
    let rng_seed = now_ms() as u64;
    let match_id = state.matches.create(seats, rng_seed);
    if let Err(err) = state.repo.create_match(match_id, &[pair.a.0, pair.b.0]).await {
        warn!(match_id = %match_id, error = %err, "failed to record new match in repository");
    }

    for (user_id, seat) in [(pair.a.0, Seat(0)), (pair.b.0, Seat(1))] {
        state.bus.publish(&user_room(user_id), &ServerFrame::MatchJoined { match_id, seat });
    }
}

fn lobby_subscribe(state: &AppState, conn_id: ConnId, lobby_id: LobbyId) {
    state.bus.subscribe(conn_id, &lobby_room(lobby_id));
    state.bus.send_to(conn_id, &ServerFrame::LobbyState { lobby: state.lobbies.view(lobby_id) });
}

fn lobby_set_deck(state: &AppState, conn_id: ConnId, user_id: UserId, lobby_id: LobbyId, deck_id: String) {
    match state.lobbies.set_deck(lobby_id, user_id, deck_id) {
        Ok(()) => broadcast_lobby_state(state, lobby_id),
        Err(err) => send_lobby_error(state, conn_id, err),
    }
}

fn lobby_set_ready(state: &AppState, conn_id: ConnId, user_id: UserId, lobby_id: LobbyId, is_ready: bool) {
    match state.lobbies.set_ready(lobby_id, user_id, is_ready) {
        Ok(()) => broadcast_lobby_state(state, lobby_id),
        Err(err) => send_lobby_error(state, conn_id, err),
    }
}

fn broadcast_lobby_state(state: &AppState, lobby_id: LobbyId) {
    state.bus.publish(&lobby_room(lobby_id), &ServerFrame::LobbyState { lobby: state.lobbies.view(lobby_id) });
}

fn send_lobby_error(state: &AppState, conn_id: ConnId, err: crate::lobby::LobbyError) {
    use crate::lobby::LobbyError;
    let code = match err {
        LobbyError::LobbyFull => ErrorCode::LobbyFull,
        LobbyError::LobbyNotOpen => ErrorCode::LobbyNotOpen,
        LobbyError::LobbyCodeRequired | LobbyError::WrongCode => ErrorCode::LobbyCodeRequired,
        LobbyError::NotReady => ErrorCode::NotReady,
        LobbyError::NotFound => ErrorCode::MatchNotFound,
        LobbyError::NotInLobby | LobbyError::AlreadyInLobby | LobbyError::NotHost => ErrorCode::Internal,
    };
    state.bus.send_to(conn_id, &error_frame(code, Some(err.to_string())));
}
