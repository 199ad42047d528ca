//! Commands
//!
//! Everything an actor can ask of the state machine, who is asking, and why
//! a request may be turned down.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::dice::RollError;
use crate::game::roster::Side;
use crate::game::state::{GamePhase, RollPurpose};

/// A request to the state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Leave WaitingForPlayers.
    StartGame {
        /// One side is played by the CPU.
        vs_cpu: bool,
        /// The CPU plays home.
        cpu_is_home: bool,
    },
    /// Report a team-assignment roll for a seat.
    SubmitTeamRoll {
        /// Seat rolling.
        side: Side,
        /// Raw die value; validated before use.
        roll: u8,
    },
    /// Ask the dice source for the roll the current phase needs.
    RollRequested,
    /// Go for the optional action on offer.
    AttemptOptionalAction,
    /// Pass on the optional action on offer.
    DeclineOptionalAction,
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartGame { .. } => "start_game",
            Command::SubmitTeamRoll { .. } => "submit_team_roll",
            Command::RollRequested => "roll_requested",
            Command::AttemptOptionalAction => "attempt_optional_action",
            Command::DeclineOptionalAction => "decline_optional_action",
        }
    }
}

/// Who issued a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Issuer {
    /// The authority itself (local play, game setup).
    Host,
    /// A participant seated on one side, human or CPU.
    Seat(Side),
}

/// Why a command was refused. A refused command changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Command is not accepted in this phase.
    #[error("{command} is not accepted during {phase:?}")]
    WrongPhase {
        /// Command name.
        command: &'static str,
        /// Current phase.
        phase: GamePhase,
    },

    /// Issuer is not the side expected to act.
    #[error("it is not {0:?}'s turn")]
    NotYourTurn(Side),

    /// A roll is already outstanding.
    #[error("roll {0} is still pending")]
    RollPending(u64),

    /// A roll result arrived with nothing outstanding.
    #[error("no roll is pending")]
    NoPendingRoll,

    /// A roll result quoted the wrong request.
    #[error("roll request {got} does not match pending request {expected}")]
    UnknownRollRequest {
        /// Id quoted.
        got: u64,
        /// Id outstanding.
        expected: u64,
    },

    /// Die value outside 1..=20.
    #[error("invalid roll: {0}")]
    InvalidRoll(#[from] RollError),

    /// Game is over; only a reset is accepted.
    #[error("the game is over")]
    GameOver,

    /// Only the host may issue this command.
    #[error("only the host may {0}")]
    NotHost(&'static str),

    /// Seat already rolled for team assignment.
    #[error("{0:?} already rolled for team assignment")]
    AlreadyRolled(Side),
}

/// A roll the caller must now obtain from its dice source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRequest {
    /// Id to quote when delivering the result.
    pub request_id: u64,
    /// Faces on the die.
    pub sides: u8,
    /// What the roll decides.
    pub purpose: RollPurpose,
    /// Side that asked.
    pub side: Side,
}

/// Result of an accepted command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Applied; the machine may have advanced several phases.
    Applied,
    /// Accepted; the machine now waits for this roll.
    RollRequested(RollRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json() {
        let json = serde_json::to_string(&Command::RollRequested).unwrap();
        assert_eq!(json, "\"roll_requested\"");

        let cmd = Command::SubmitTeamRoll { side: Side::Home, roll: 14 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"submit_team_roll":{"side":"home","roll":14}}"#);
        assert_eq!(serde_json::from_str::<Command>(&json).unwrap(), cmd);
    }

    #[test]
    fn test_rejection_messages() {
        let err = Rejection::WrongPhase { command: "roll_requested", phase: GamePhase::GameOver };
        assert_eq!(err.to_string(), "roll_requested is not accepted during GameOver");

        let err: Rejection = RollError::OutOfRange { value: 0, sides: 20 }.into();
        assert_eq!(err.to_string(), "invalid roll: roll 0 is outside 1..=20");
    }
}
