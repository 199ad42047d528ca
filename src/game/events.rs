//! Game Events
//!
//! Outbound notifications pushed by the state machine and drained by the
//! presentation layer (or broadcast to every seat by a network session).

use serde::{Serialize, Deserialize};

use crate::game::at_bat::Advantage;
use crate::game::card::AtBatOutcome;
use crate::game::optional::OptionalActionKind;
use crate::game::roster::Side;
use crate::game::state::{GamePhase, HalfInning, RollPurpose};

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEventData {
    /// Phase transition.
    PhaseChanged {
        /// Phase left.
        from: GamePhase,
        /// Phase entered.
        to: GamePhase,
    },

    /// Runs were added.
    ScoreChanged {
        /// Away total.
        away: u32,
        /// Home total.
        home: u32,
    },

    /// Out count changed.
    OutsChanged {
        /// Outs in the half-inning.
        outs: u8,
    },

    /// A new half-inning began.
    InningChanged {
        /// Inning number.
        inning: u32,
        /// Half.
        half: HalfInning,
    },

    /// A batter stepped in.
    AtBatStarted {
        /// Batting side.
        side: Side,
        /// Lineup slot.
        batter_index: usize,
    },

    /// A plate appearance finished.
    AtBatEnded {
        /// Batting side.
        side: Side,
        /// Outcome.
        outcome: AtBatOutcome,
        /// Runs scored on the play.
        runs: u32,
    },

    /// The machine is waiting on a die.
    RollRequested {
        /// Request to answer.
        request_id: u64,
        /// What the roll decides.
        purpose: RollPurpose,
        /// Side that asked.
        side: Side,
    },

    /// Defense roll compared.
    DefenseResolved {
        /// Defense roll.
        roll: u8,
        /// Chart that will govern.
        advantage: Advantage,
    },

    /// An optional action is on offer.
    OptionalActionAvailable {
        /// Action.
        action: OptionalActionKind,
        /// Side that decides.
        side: Side,
    },

    /// An optional action was rolled.
    OptionalActionResolved {
        /// Action.
        action: OptionalActionKind,
        /// Contest won by the deciding side.
        success: bool,
        /// Runs scored on the play.
        runs: u32,
    },

    /// Team-assignment contest settled.
    TeamsAssigned {
        /// Seats swapped sides.
        swapped: bool,
    },

    /// Final out.
    GameOver {
        /// Winner (`None` only if the game was abandoned level).
        winner: Option<Side>,
        /// Away total.
        away: u32,
        /// Home total.
        home: u32,
    },

    /// Free-text line for the game log.
    Message {
        /// Text.
        text: String,
    },
}

/// A game event stamped with the command sequence that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Session sequence number when emitted.
    pub sequence: u64,
    /// Payload.
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(sequence: u64, data: GameEventData) -> Self {
        Self { sequence, data }
    }

    /// Create a free-text message event.
    pub fn message(sequence: u64, text: impl Into<String>) -> Self {
        Self::new(sequence, GameEventData::Message { text: text.into() })
    }

    /// Create a phase-changed event.
    pub fn phase_changed(sequence: u64, from: GamePhase, to: GamePhase) -> Self {
        Self::new(sequence, GameEventData::PhaseChanged { from, to })
    }

    /// Create a score-changed event.
    pub fn score_changed(sequence: u64, away: u32, home: u32) -> Self {
        Self::new(sequence, GameEventData::ScoreChanged { away, home })
    }

    /// Is this the final event of a game?
    pub fn is_game_over(&self) -> bool {
        matches!(self.data, GameEventData::GameOver { .. })
    }
}
