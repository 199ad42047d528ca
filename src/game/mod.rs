//! Rules Engine
//!
//! Everything that decides what happens on the field. 100% deterministic:
//! no I/O, no clocks, every random draw from a seeded RNG or a delivered roll.
//!
//! ## Module Structure
//!
//! - `card`: Player cards, outcome charts, the card pool
//! - `roster`: Sides, lineups, fielding aggregates
//! - `dice`: Validated die values and the dice-source seam
//! - `bases`: Base-running engine
//! - `at_bat`: Defense and offense roll resolution
//! - `optional`: Steals, tag-ups, double plays
//! - `turn`: Who may act in each phase
//! - `state`: The game session aggregate and its snapshot
//! - `command`: Commands, issuers, rejections
//! - `events`: Outbound domain events
//! - `machine`: The game state machine
//! - `cpu`: Computer-controlled side
//! - `transcript`: Recording and replay verification

pub mod card;
pub mod roster;
pub mod dice;
pub mod bases;
pub mod at_bat;
pub mod optional;
pub mod turn;
pub mod state;
pub mod command;
pub mod events;
pub mod machine;
pub mod cpu;
pub mod transcript;

// Re-export key types
pub use card::{AtBatOutcome, BatterCard, CardPool, OutcomeChart, PitcherCard};
pub use roster::{Roster, Side};
pub use bases::{Base, BaseState, Runner};
pub use optional::OptionalActionKind;
pub use turn::{AuthorityMode, TurnContext};
pub use state::{GameConfig, GamePhase, GameSession, SessionSnapshot};
pub use command::{Command, CommandOutcome, Issuer, Rejection};
pub use events::{GameEvent, GameEventData};
pub use machine::{GameMachine, MachineError};
pub use transcript::GameTranscript;
