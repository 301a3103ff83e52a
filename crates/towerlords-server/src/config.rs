//! Connection-level server configuration (spec §6.4).
//!
//! Match-scoped tunables (`CHAT_RING`, `CHAT_RATE`, round timing, the tower
//! curve) live in `towerlords_core::MatchConfig` instead, since they travel
//! with a match rather than with a socket.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    /// Keepalive `PING` cadence; missing `keepalive_miss` replies closes the
    /// socket (spec §4.11).
    pub keepalive_ms: u64,
    pub keepalive_miss: u32,
    /// Time allowed for `AUTH` after `HELLO` before the socket is closed.
    pub auth_timeout_ms: u64,
    /// Per-handler deadline; firing returns `ERROR{code:TIMEOUT}` and leaves
    /// state unchanged (spec §5).
    pub action_timeout_ms: u64,
    /// How long a finished match stays in the registry to serve snapshots to
    /// reconnecting clients before eviction (spec §4.6).
    pub finished_grace_ms: u64,
    /// How long a player's seat is held after their socket drops mid-match
    /// before the match forces a forfeit on their behalf (spec §4.11
    /// `Connected -> Disconnected -> (reconnect | forced forfeit)`). Distinct
    /// from `finished_grace_ms`, which only applies once a match is already
    /// over.
    pub reconnect_grace_ms: u64,
    /// Matchmaking queue entries survive a connection loss for this long
    /// (spec §4.8).
    pub queue_ttl_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".parse().unwrap(),
            keepalive_ms: 15_000,
            keepalive_miss: 2,
            auth_timeout_ms: 5_000,
            action_timeout_ms: 2_000,
            finished_grace_ms: 60_000,
            reconnect_grace_ms: 30_000,
            queue_ttl_ms: 10_000,
        }
    }
}
