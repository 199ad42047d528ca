//! # Dugout Server
//!
//! Rules engine and authoritative server for a dice- and card-driven
//! baseball game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DUGOUT SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Rules engine (deterministic)              │
//! │  ├── card.rs     - Player cards and outcome charts           │
//! │  ├── roster.rs   - Sides, lineups, fielding                  │
//! │  ├── bases.rs    - Base-running engine                       │
//! │  ├── at_bat.rs   - Defense and offense resolution            │
//! │  ├── optional.rs - Steals, tag-ups, double plays             │
//! │  ├── turn.rs     - Turn and authority resolver               │
//! │  ├── machine.rs  - Game state machine                        │
//! │  ├── cpu.rs      - Computer-controlled side                  │
//! │  └── transcript.rs - Recording and replay                    │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - Authoritative match sessions              │
//! │  └── replica.rs  - Participant-side view                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from seeded Xorshift128+ or delivered die rolls
//!
//! Given the same seed, card pool and accepted inputs, a game replays to
//! **the identical state hash** on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use crate::game::machine::{GameMachine, MachineError};
pub use crate::game::state::{GameConfig, GamePhase, GameSession, SessionSnapshot};
pub use crate::game::command::{Command, Issuer};
pub use crate::game::card::CardPool;
pub use crate::game::roster::Side;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Faces on every die the rules roll.
pub const DIE_SIDES: u8 = 20;

/// Batters in a lineup.
pub const LINEUP_SIZE: usize = 9;

/// Innings in a regulation game.
pub const SCHEDULED_INNINGS: u32 = 9;

/// Outs that end a half-inning.
pub const OUTS_PER_HALF_INNING: u8 = 3;

/// Margin a roll must clear in every optional-action contest.
pub const OPTIONAL_ACTION_THRESHOLD: i32 = 10;
