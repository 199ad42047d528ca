//! Replica View
//!
//! What a non-authoritative participant holds: the latest snapshot the
//! authority sent, its seat, and any roll the authority is waiting on. The
//! view never computes game state. It pre-checks turn order so a client can
//! grey out controls, then builds the message to forward.

use thiserror::Error;

use crate::game::command::{Command, RollRequest};
use crate::game::dice::{DieRoll, RollError};
use crate::game::roster::Side;
use crate::game::state::{GamePhase, SessionSnapshot};
use crate::game::turn::AuthorityMode;
use crate::network::protocol::{ClientMessage, GameEndInfo, ServerMessage};

/// Why the view refused to forward a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplicaError {
    /// No snapshot has arrived yet.
    #[error("no game state received yet")]
    NoSnapshot,

    /// The local seat may not act now.
    #[error("it is not {0:?}'s turn")]
    NotYourTurn(Side),

    /// Only the authority starts games.
    #[error("only the host may start the game")]
    HostOnly,

    /// A roll result with no request outstanding for this seat.
    #[error("no roll requested from this seat")]
    NoRollRequested,

    /// Face outside the die.
    #[error(transparent)]
    InvalidRoll(#[from] RollError),
}

/// A participant's view of a remote game.
#[derive(Clone, Debug)]
pub struct ReplicaView {
    local_side: Side,
    session_id: Option<String>,
    player_id: Option<String>,
    snapshot: Option<SessionSnapshot>,
    roll_request: Option<RollRequest>,
    result: Option<GameEndInfo>,
}

impl ReplicaView {
    /// View for a participant seated on `local_side`.
    pub fn new(local_side: Side) -> Self {
        Self {
            local_side,
            session_id: None,
            player_id: None,
            snapshot: None,
            roll_request: None,
            result: None,
        }
    }

    /// Seat this view acts for.
    pub fn local_side(&self) -> Side {
        self.local_side
    }

    fn mode(&self) -> AuthorityMode {
        AuthorityMode::Replicated { local_side: self.local_side }
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Option<&SessionSnapshot> {
        self.snapshot.as_ref()
    }

    /// Roll the authority is waiting on from this seat.
    pub fn roll_request(&self) -> Option<RollRequest> {
        self.roll_request
    }

    /// Final result, once the game is over.
    pub fn result(&self) -> Option<&GameEndInfo> {
        self.result.as_ref()
    }

    /// Ids needed to rejoin after a dropped connection.
    pub fn rejoin_message(&self) -> Option<ClientMessage> {
        Some(ClientMessage::Rejoin {
            session_id: self.session_id.clone()?,
            player_id: self.player_id.clone()?,
        })
    }

    /// Fold one message from the authority into the view.
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Joined(info) => {
                self.local_side = info.side;
                self.session_id = Some(info.session_id.clone());
                self.player_id = Some(info.player_id.clone());
                self.result = None;
            }
            ServerMessage::SeatChanged { side } => {
                self.local_side = *side;
            }
            ServerMessage::State(snapshot) => {
                // After a game end the next state belongs to the rematch
                let stale = self.result.is_none()
                    && self.snapshot.as_ref().is_some_and(|s| {
                        s.game_id == snapshot.game_id && s.sequence > snapshot.sequence
                    });
                if stale {
                    return;
                }
                let pending_id = snapshot.pending_roll.map(|p| p.request_id);
                if self.roll_request.is_some_and(|r| pending_id != Some(r.request_id)) {
                    self.roll_request = None;
                }
                if snapshot.phase != GamePhase::GameOver {
                    self.result = None;
                }
                self.snapshot = Some(snapshot.clone());
            }
            ServerMessage::RollRequest(request) if request.side == self.local_side() => {
                self.roll_request = Some(*request);
            }
            ServerMessage::GameEnd(info) => {
                self.result = Some(info.clone());
                self.roll_request = None;
            }
            _ => {}
        }
    }

    /// May the local seat issue a turn command now?
    pub fn may_act(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| {
            s.pending_roll.is_none() && self.mode().local_may_act(&s.turn_context())
        })
    }

    /// Message forwarding `command` to the authority, if the local seat may
    /// issue it. The authority validates again.
    pub fn command(&self, command: Command) -> Result<ClientMessage, ReplicaError> {
        let side = self.local_side();
        match &command {
            Command::StartGame { .. } => return Err(ReplicaError::HostOnly),
            Command::SubmitTeamRoll { side: roll_side, .. } if *roll_side != side => {
                return Err(ReplicaError::NotYourTurn(side));
            }
            Command::SubmitTeamRoll { .. } => {}
            Command::RollRequested | Command::AttemptOptionalAction | Command::DeclineOptionalAction => {
                if self.snapshot.is_none() {
                    return Err(ReplicaError::NoSnapshot);
                }
                if !self.may_act() {
                    return Err(ReplicaError::NotYourTurn(side));
                }
            }
        }
        Ok(ClientMessage::Command { command })
    }

    /// Message reporting a physical roll for the outstanding request.
    pub fn roll_result(&mut self, value: u8) -> Result<ClientMessage, ReplicaError> {
        DieRoll::new(value)?;
        let request = self.roll_request.take().ok_or(ReplicaError::NoRollRequested)?;
        Ok(ClientMessage::RollResult { request_id: request.request_id, value })
    }
}
