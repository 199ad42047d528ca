//! Network Layer
//!
//! WebSocket server and replication adapter for remote seats.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod session;
pub mod server;
pub mod replica;

pub use protocol::{ClientMessage, ServerMessage, ProtocolError, GameEndInfo, JoinedInfo};
pub use session::{MatchSession, SessionId, SessionState, SessionManager, SessionConfig, DiceMode};
pub use server::{GameServer, ServerConfig, GameServerError};
pub use replica::{ReplicaView, ReplicaError};
