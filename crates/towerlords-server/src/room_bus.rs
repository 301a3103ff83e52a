//! Room Bus (C10, spec §4.10): the sole outbound path from handlers to
//! sockets. Addresses are plain strings (`lobby:{id}`, `match:{id}`,
//! `user:{id}`); `publish` fans a frame out to every subscriber's own send
//! queue, which is what gives per-room-per-publisher ordering (spec §5):
//! each subscriber drains its queue on a single writer task, so messages
//! pushed in `publish` call order arrive in that order.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use towerlords_protocol::ids::{ConnId, MatchId};

use crate::connection::ConnectionRegistry;

pub fn lobby_room(lobby_id: towerlords_protocol::ids::LobbyId) -> String {
    format!("lobby:{lobby_id}")
}

pub fn match_room(match_id: towerlords_protocol::ids::MatchId) -> String {
    format!("match:{match_id}")
}

pub fn user_room(user_id: towerlords_protocol::ids::UserId) -> String {
    format!("user:{user_id}")
}

/// Recovers a `MatchId` from a `"match:{uuid}"` room key, the inverse of
/// `match_room`. Used by the disconnect sweeper to turn a held room into the
/// match it should forfeit in (ids have no `FromStr`, so this is the one
/// place that needs to know the `match:` prefix format).
pub fn match_id_from_room(room: &str) -> Option<MatchId> {
    let uuid_part = room.strip_prefix("match:")?;
    uuid::Uuid::parse_str(uuid_part).ok().map(MatchId)
}

#[derive(Clone)]
pub struct RoomBus {
    registry: ConnectionRegistry,
    members: Arc<DashMap<String, HashSet<ConnId>>>,
}

impl RoomBus {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            members: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self, conn_id: ConnId, room: &str) {
        self.members.entry(room.to_string()).or_default().insert(conn_id);
        let _ = self.registry.join_room(conn_id, room);
    }

    pub fn unsubscribe(&self, conn_id: ConnId, room: &str) {
        if let Some(mut set) = self.members.get_mut(room) {
            set.remove(&conn_id);
        }
        self.registry.leave_room(conn_id, room);
    }

    /// Drops `conn_id` from every room it belonged to (spec §4.11: closing a
    /// connection tears down its room memberships).
    pub fn drop_connection(&self, conn_id: ConnId) {
        for room in self.registry.remove(conn_id) {
            if let Some(mut set) = self.members.get_mut(&room) {
                set.remove(&conn_id);
            }
        }
    }

    /// Serializes `frame` once and pushes it onto every subscriber's queue.
    /// A send failure (closed socket) only drops that one recipient; it is
    /// not surfaced to the publisher, matching "outstanding messages are
    /// dropped" on close (spec §4.11).
    pub fn publish(&self, room: &str, frame: &towerlords_protocol::wire::ServerFrame) {
        let Ok(text) = towerlords_protocol::wire::encode_server_frame(frame) else {
            warn!(room, "failed to encode server frame for publish");
            return;
        };
        let Some(set) = self.members.get(room) else {
            return;
        };
        for conn_id in set.iter() {
            if self.registry.send(*conn_id, text.clone()).is_err() {
                warn!(room, conn_id = conn_id.0, "dropping publish to closed connection");
            }
        }
    }

    pub fn send_to(&self, conn_id: ConnId, frame: &towerlords_protocol::wire::ServerFrame) {
        let Ok(text) = towerlords_protocol::wire::encode_server_frame(frame) else {
            warn!(conn_id = conn_id.0, "failed to encode server frame for direct send");
            return;
        };
        let _ = self.registry.send(conn_id, text);
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.members.get(room).map(|s| s.len()).unwrap_or(0)
    }

    /// Removes `conn_id` from `rooms` without touching the registry's own
    /// bookkeeping (spec §4.11 reconnect: the disconnected entry has already
    /// been removed from the registry by `ConnectionRegistry::reconnect`, so
    /// only the bus's reverse index still needs clearing).
    pub fn forget_rooms(&self, conn_id: ConnId, rooms: &[String]) {
        for room in rooms {
            if let Some(mut set) = self.members.get_mut(room) {
                set.remove(&conn_id);
            }
        }
    }

    /// Re-subscribes `new_conn` to every room `old_conn` held at disconnect
    /// time, and drops `old_conn`'s now-stale membership (spec §4.11
    /// reconnect: a fresh socket inherits the held rooms in place).
    pub fn migrate_connection(&self, old_conn: ConnId, new_conn: ConnId, rooms: &[String]) {
        for room in rooms {
            if let Some(mut set) = self.members.get_mut(room) {
                set.remove(&old_conn);
            }
            self.subscribe(new_conn, room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use towerlords_protocol::ids::MatchId;
    use towerlords_protocol::wire::ServerFrame;

    #[test]
    fn publish_reaches_every_subscriber_once() {
        let registry = ConnectionRegistry::new();
        let bus = RoomBus::new(registry.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let conn_a = registry.register(tx_a, 0);
        let conn_b = registry.register(tx_b, 0);

        let match_id = MatchId::new();
        let room = match_room(match_id);
        bus.subscribe(conn_a, &room);
        bus.subscribe(conn_b, &room);

        bus.publish(&room, &ServerFrame::Ping);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn unsubscribed_connection_does_not_receive_publish() {
        let registry = ConnectionRegistry::new();
        let bus = RoomBus::new(registry.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx, 0);

        let room = "lobby:test".to_string();
        bus.subscribe(conn, &room);
        bus.unsubscribe(conn, &room);
        bus.publish(&room, &ServerFrame::Ping);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn drop_connection_clears_all_memberships() {
        let registry = ConnectionRegistry::new();
        let bus = RoomBus::new(registry.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx, 0);

        bus.subscribe(conn, "lobby:1");
        bus.subscribe(conn, "user:1");
        bus.drop_connection(conn);
        assert_eq!(bus.member_count("lobby:1"), 0);
        assert_eq!(bus.member_count("user:1"), 0);
    }

    #[test]
    fn match_id_from_room_roundtrips_with_match_room() {
        let match_id = MatchId::new();
        let room = match_room(match_id);
        assert_eq!(match_id_from_room(&room), Some(match_id));
        assert_eq!(match_id_from_room("lobby:not-a-match"), None);
    }

    #[test]
    fn migrate_connection_moves_membership_to_the_new_socket() {
        let registry = ConnectionRegistry::new();
        let bus = RoomBus::new(registry.clone());
        let (tx_old, _rx_old) = mpsc::unbounded_channel();
        let (tx_new, mut rx_new) = mpsc::unbounded_channel();
        let old_conn = registry.register(tx_old, 0);
        let new_conn = registry.register(tx_new, 0);

        let room = "match:1".to_string();
        bus.subscribe(old_conn, &room);
        bus.migrate_connection(old_conn, new_conn, &[room.clone()]);

        bus.publish(&room, &ServerFrame::Ping);
        assert!(rx_new.try_recv().is_ok());
        assert_eq!(bus.member_count(&room), 1);
    }
}
