//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON with a `type` tag. Internally tagged enums cannot go
//! through bincode, so there is no binary form of these messages; transcripts
//! carry their own bincode encoding.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use uuid::Uuid;

use crate::game::command::{Command, RollRequest};
use crate::game::events::GameEvent;
use crate::game::roster::Side;
use crate::game::state::{LineScore, SessionSnapshot};

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 32;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Take a seat in a new or existing session.
    Join {
        /// Display name.
        player_name: String,
        /// Play against the server's CPU.
        #[serde(default)]
        vs_cpu: bool,
        /// Hex id of a waiting two-player session to join; `None` finds or
        /// opens one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Reclaim a seat after a dropped connection.
    Rejoin {
        /// Hex session id.
        session_id: String,
        /// Player id from the original `joined` message.
        player_id: String,
    },

    /// A game command, issued from the sender's seat.
    Command {
        /// The command.
        command: Command,
    },

    /// Result of a physical roll (client dice mode only).
    RollResult {
        /// Request being answered.
        request_id: u64,
        /// Face rolled.
        value: u8,
    },

    /// Request the current snapshot (for reconnection).
    SyncRequest,

    /// Start a new game with the same seats once this one is over.
    Rematch,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },

    /// Player is leaving the session.
    Leave,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Seat taken.
    Joined(JoinedInfo),

    /// Seated, waiting for an opponent.
    Waiting {
        /// Hex session id to share with the opponent.
        session_id: String,
    },

    /// The team-assignment contest moved this client to another side.
    SeatChanged {
        /// New side.
        side: Side,
    },

    /// Domain event from the authority.
    Event(GameEvent),

    /// Full read model after a batch of events.
    State(SessionSnapshot),

    /// The authority is waiting for this client's roll.
    RollRequest(RollRequest),

    /// A command or roll was refused; nothing changed.
    Rejected {
        /// Human-readable reason.
        reason: String,
    },

    /// Game finished.
    GameEnd(GameEndInfo),

    /// Pong response.
    Pong {
        /// Client timestamp from the ping.
        timestamp: u64,
        /// Server wall-clock time in milliseconds.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Seat assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedInfo {
    /// Hex session id.
    pub session_id: String,
    /// Player id assigned by the server.
    pub player_id: String,
    /// Side the player is seated on.
    pub side: Side,
    /// The opponent is the CPU.
    pub vs_cpu: bool,
    /// Server version.
    pub server_version: String,
}

/// Final result of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEndInfo {
    /// Winning side.
    pub winner: Option<Side>,
    /// Away runs.
    pub away_score: u32,
    /// Home runs.
    pub home_score: u32,
    /// Runs by inning.
    pub line_score: LineScore,
    /// Innings played.
    pub innings: u32,
    /// Hex state hash at the end of the game.
    pub final_state_hash: String,
    /// The game was abandoned and awarded to `winner`.
    #[serde(default)]
    pub forfeit: bool,
    /// Bincode transcript, for clients that want to verify the game.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<u8>>,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Description.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed or failed validation.
    InvalidInput,
    /// No session with that id.
    SessionNotFound,
    /// Both seats are taken.
    SessionFull,
    /// Client already holds a seat.
    AlreadyInSession,
    /// Client has no seat.
    NotInSession,
    /// Connection limit reached.
    ServerOverloaded,
    /// Something went wrong on the server.
    InternalError,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Errors decoding or validating a client message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON for any message.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// Join with a blank name.
    #[error("player name is empty")]
    EmptyName,

    /// Join with an overlong name.
    #[error("player name longer than {MAX_NAME_LEN} characters")]
    NameTooLong,

    /// Session id is not 32 hex digits.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Player id is not a UUID.
    #[error("invalid player id: {0}")]
    InvalidPlayerId(String),
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Deserialize and validate at the boundary.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let msg = Self::from_json(s)?;
        if let ClientMessage::Join { player_name, session_id, .. } = &msg {
            let name = player_name.trim();
            if name.is_empty() {
                return Err(ProtocolError::EmptyName);
            }
            if name.chars().count() > MAX_NAME_LEN {
                return Err(ProtocolError::NameTooLong);
            }
            if let Some(id) = session_id {
                parse_session_id(id)?;
            }
        }
        if let ClientMessage::Rejoin { session_id, player_id } = &msg {
            parse_session_id(session_id)?;
            parse_player_id(player_id)?;
        }
        Ok(msg)
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Refusal message for any displayable error.
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        ServerMessage::Rejected { reason: reason.to_string() }
    }
}

/// Decode a hex session id.
pub fn parse_session_id(s: &str) -> Result<[u8; 16], ProtocolError> {
    let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidSessionId(s.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidSessionId(s.to_string()))
}

/// Decode a player id.
pub fn parse_player_id(s: &str) -> Result<Uuid, ProtocolError> {
    Uuid::parse_str(s).map_err(|_| ProtocolError::InvalidPlayerId(s.to_string()))
}
