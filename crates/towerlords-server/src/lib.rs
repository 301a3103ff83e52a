//! TowerLords authoritative match server: the connection/room/lobby/
//! matchmaking/scheduler/persistence layers that turn `towerlords-core`'s
//! deterministic match state machine into a live WebSocket + HTTP service.

pub mod chat;
pub mod config;
pub mod connection;
pub mod lobby;
pub mod matchmaking;
pub mod memory_repo;
pub mod persister;
pub mod registry;
pub mod room_bus;
pub mod scheduler;
pub mod transport;

pub use config::ServerConfig;
pub use connection::ConnectionRegistry;
pub use lobby::{LobbyError, LobbyManager};
pub use matchmaking::{MatchedPair, MatchmakingError, MatchmakingQueue};
pub use memory_repo::InMemoryRepository;
pub use registry::{MatchRegistry, SeatSetup};
pub use room_bus::RoomBus;
pub use scheduler::{ActionRejection, MatchCommand};
pub use transport::{run_disconnect_sweeper, ws_handler, AppState};
