//! Connection Registry (C11, spec §4.11): per-socket bookkeeping and the
//! `connected -> authenticated -> joined(rooms...) -> closed` state machine,
//! extended with `disconnected -> (reconnected | closed on grace timeout)`
//! for a socket that drops mid-match (spec §4.11 "reconnect-safe joins").
//!
//! Room membership is tracked here for introspection (`rooms_of`) but the
//! Room Bus (`room_bus.rs`) owns the reverse index used for `publish`, since
//! that is the hot path and wants room -> members, not connection -> rooms.
//!
//! A disconnected entry is kept, not removed, so its `user_id` and room
//! memberships survive until either a fresh socket reconnects as the same
//! user (`reconnect`) or the grace period lapses (`sweep_expired_disconnects`,
//! which the caller turns into a forced forfeit).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

use towerlords_protocol::ids::{ConnId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticated,
    /// Socket dropped while authenticated; the entry is held for a grace
    /// period so `reconnect` can restore it instead of forfeiting the match.
    Disconnected,
    Closed,
}

struct ConnectionEntry {
    state: ConnectionState,
    user_id: Option<UserId>,
    rooms: HashSet<String>,
    outbound: mpsc::UnboundedSender<String>,
    last_seen_ms: i64,
    missed_pings: u32,
    disconnected_at_ms: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection not found")]
    NotFound,
    #[error("connection already authenticated")]
    AlreadyAuthenticated,
    #[error("connection is closed")]
    Closed,
}

/// Process-wide table of live sockets. Cheap to clone (an `Arc` internally),
/// so every reader/writer task and every match scheduler holds a copy.
#[derive(Clone)]
pub struct ConnectionRegistry {
    conns: Arc<DashMap<ConnId, ConnectionEntry>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            conns: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a fresh socket in the `Connected` state and returns its id.
    pub fn register(&self, outbound: mpsc::UnboundedSender<String>, now_ms: i64) -> ConnId {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.conns.insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connected,
                user_id: None,
                rooms: HashSet::new(),
                outbound,
                last_seen_ms: now_ms,
                missed_pings: 0,
                disconnected_at_ms: None,
            },
        );
        id
    }

    pub fn authenticate(&self, conn_id: ConnId, user_id: UserId) -> Result<(), ConnectionError> {
        let mut entry = self.conns.get_mut(&conn_id).ok_or(ConnectionError::NotFound)?;
        if entry.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        if entry.state == ConnectionState::Authenticated {
            return Err(ConnectionError::AlreadyAuthenticated);
        }
        entry.state = ConnectionState::Authenticated;
        entry.user_id = Some(user_id);
        Ok(())
    }

    pub fn user_id(&self, conn_id: ConnId) -> Option<UserId> {
        self.conns.get(&conn_id).and_then(|e| e.user_id)
    }

    pub fn state(&self, conn_id: ConnId) -> Option<ConnectionState> {
        self.conns.get(&conn_id).map(|e| e.state)
    }

    pub fn touch(&self, conn_id: ConnId, now_ms: i64) {
        if let Some(mut entry) = self.conns.get_mut(&conn_id) {
            entry.last_seen_ms = now_ms;
            entry.missed_pings = 0;
        }
    }

    /// Called every `keepalive_ms` tick; returns `true` once the connection
    /// has exceeded `keepalive_miss` consecutive unanswered pings.
    pub fn record_ping_sweep(&self, conn_id: ConnId, miss_limit: u32) -> bool {
        self.conns
            .get_mut(&conn_id)
            .map(|mut e| {
                e.missed_pings += 1;
                e.missed_pings > miss_limit
            })
            .unwrap_or(true)
    }

    pub fn join_room(&self, conn_id: ConnId, room: &str) -> Result<(), ConnectionError> {
        let mut entry = self.conns.get_mut(&conn_id).ok_or(ConnectionError::NotFound)?;
        entry.rooms.insert(room.to_string());
        Ok(())
    }

    pub fn leave_room(&self, conn_id: ConnId, room: &str) {
        if let Some(mut entry) = self.conns.get_mut(&conn_id) {
            entry.rooms.remove(room);
        }
    }

    pub fn rooms_of(&self, conn_id: ConnId) -> Vec<String> {
        self.conns
            .get(&conn_id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Enqueues `text` on the connection's single writer task. Backpressure
    /// (spec §5 "per-connection send queues have a bounded capacity") is the
    /// writer task's responsibility; this queue is unbounded so `publish`
    /// never blocks the match's single writer.
    pub fn send(&self, conn_id: ConnId, text: String) -> Result<(), ConnectionError> {
        let entry = self.conns.get(&conn_id).ok_or(ConnectionError::NotFound)?;
        entry.outbound.send(text).map_err(|_| ConnectionError::Closed)
    }

    /// Tears down room memberships and removes the connection (spec §4.11:
    /// "closed connections' room memberships are torn down").
    pub fn remove(&self, conn_id: ConnId) -> Vec<String> {
        match self.conns.remove(&conn_id) {
            Some((_, entry)) => entry.rooms.into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn connections_of_user(&self, user_id: UserId) -> Vec<ConnId> {
        self.conns
            .iter()
            .filter(|e| e.user_id == Some(user_id))
            .map(|e| *e.key())
            .collect()
    }

    /// Transitions an authenticated socket to `Disconnected` instead of
    /// removing it outright, so its room memberships survive for
    /// `reconnect`/`sweep_expired_disconnects` (spec §4.11). Returns the
    /// user id and rooms held at disconnect time; `None` if the connection
    /// was never authenticated (nothing to hold onto — caller should tear
    /// it down immediately instead).
    pub fn begin_disconnect(&self, conn_id: ConnId, now_ms: i64) -> Option<(UserId, Vec<String>)> {
        let mut entry = self.conns.get_mut(&conn_id)?;
        let user_id = entry.user_id?;
        entry.state = ConnectionState::Disconnected;
        entry.disconnected_at_ms = Some(now_ms);
        Some((user_id, entry.rooms.iter().cloned().collect()))
    }

    /// Looks for a `Disconnected` entry belonging to `user_id` and, if
    /// found, removes it and hands back its former connection id and rooms
    /// so the caller can migrate those room memberships onto the fresh
    /// socket (spec §4.11 reconnect).
    pub fn reconnect(&self, user_id: UserId) -> Option<(ConnId, Vec<String>)> {
        let stale_id = *self
            .conns
            .iter()
            .find(|e| e.state == ConnectionState::Disconnected && e.user_id == Some(user_id))?
            .key();
        let (_, entry) = self.conns.remove(&stale_id)?;
        Some((stale_id, entry.rooms.into_iter().collect()))
    }

    /// Removes every `Disconnected` entry that has outlived `grace_ms`,
    /// returning `(conn_id, user_id, rooms)` for each so the caller can
    /// force a forfeit and clear the stale room memberships from the bus.
    pub fn sweep_expired_disconnects(&self, grace_ms: u64, now_ms: i64) -> Vec<(ConnId, UserId, Vec<String>)> {
        let expired: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|e| {
                e.state == ConnectionState::Disconnected
                    && e.disconnected_at_ms
                        .is_some_and(|since| now_ms - since >= grace_ms as i64)
            })
            .map(|e| *e.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|conn_id| {
                let (_, entry) = self.conns.remove(&conn_id)?;
                let user_id = entry.user_id?;
                Some((conn_id, user_id, entry.rooms.into_iter().collect()))
            })
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId(uuid::Uuid::new_v4())
    }

    #[test]
    fn register_then_authenticate_transitions_state() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, 0);
        assert_eq!(registry.state(conn_id), Some(ConnectionState::Connected));

        let uid = user();
        registry.authenticate(conn_id, uid).unwrap();
        assert_eq!(registry.state(conn_id), Some(ConnectionState::Authenticated));
        assert_eq!(registry.user_id(conn_id), Some(uid));

        assert!(matches!(
            registry.authenticate(conn_id, uid),
            Err(ConnectionError::AlreadyAuthenticated)
        ));
    }

    #[test]
    fn remove_returns_former_room_memberships() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, 0);
        registry.join_room(conn_id, "lobby:1").unwrap();
        registry.join_room(conn_id, "user:9").unwrap();

        let mut rooms = registry.remove(conn_id);
        rooms.sort();
        assert_eq!(rooms, vec!["lobby:1".to_string(), "user:9".to_string()]);
        assert_eq!(registry.state(conn_id), None);
    }

    #[test]
    fn ping_sweep_closes_after_miss_limit() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, 0);

        assert!(!registry.record_ping_sweep(conn_id, 2));
        assert!(!registry.record_ping_sweep(conn_id, 2));
        assert!(registry.record_ping_sweep(conn_id, 2));
    }

    #[test]
    fn touch_resets_missed_ping_count() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, 0);

        registry.record_ping_sweep(conn_id, 5);
        registry.touch(conn_id, 100);
        assert!(!registry.record_ping_sweep(conn_id, 1));
    }

    #[test]
    fn begin_disconnect_holds_rooms_until_reconnect() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, 0);
        let uid = user();
        registry.authenticate(conn_id, uid).unwrap();
        registry.join_room(conn_id, "match:1").unwrap();

        let (held_user, mut rooms) = registry.begin_disconnect(conn_id, 1_000).unwrap();
        assert_eq!(held_user, uid);
        rooms.sort();
        assert_eq!(rooms, vec!["match:1".to_string()]);
        assert_eq!(registry.state(conn_id), Some(ConnectionState::Disconnected));

        let (old_conn_id, mut recovered_rooms) = registry.reconnect(uid).unwrap();
        assert_eq!(old_conn_id, conn_id);
        recovered_rooms.sort();
        assert_eq!(recovered_rooms, vec!["match:1".to_string()]);
        assert_eq!(registry.state(conn_id), None);
    }

    #[test]
    fn begin_disconnect_on_unauthenticated_socket_returns_none() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, 0);
        assert!(registry.begin_disconnect(conn_id, 1_000).is_none());
    }

    #[test]
    fn sweep_expired_disconnects_only_removes_entries_past_grace() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx, 0);
        let uid = user();
        registry.authenticate(conn_id, uid).unwrap();
        registry.join_room(conn_id, "match:1").unwrap();
        registry.begin_disconnect(conn_id, 1_000);

        assert!(registry.sweep_expired_disconnects(30_000, 10_000).is_empty());
        assert_eq!(registry.state(conn_id), Some(ConnectionState::Disconnected));

        let expired = registry.sweep_expired_disconnects(30_000, 31_001);
        assert_eq!(expired.len(), 1);
        let (expired_conn_id, expired_user, mut expired_rooms) = expired.into_iter().next().unwrap();
        assert_eq!(expired_conn_id, conn_id);
        assert_eq!(expired_user, uid);
        expired_rooms.sort();
        assert_eq!(expired_rooms, vec!["match:1".to_string()]);
        assert_eq!(registry.state(conn_id), None);
    }
}
