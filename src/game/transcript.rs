//! Game Transcript Recording
//!
//! Records every input the machine accepted so a finished game can be
//! replayed from its seed and checked against the final state hash.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::game::card::CardPool;
use crate::game::command::{Command, Issuer};
use crate::game::machine::{GameMachine, MachineError};
use crate::game::roster::LineupError;
use crate::game::state::GameConfig;

/// Current transcript version.
pub const TRANSCRIPT_VERSION: u8 = 1;

/// One accepted input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptEntry {
    /// Command accepted from an issuer.
    Command {
        /// Issuer.
        issuer: Issuer,
        /// Command.
        command: Command,
    },
    /// Roll delivered for a request.
    Roll {
        /// Request answered.
        request_id: u64,
        /// Die value.
        value: u8,
    },
    /// Outstanding roll abandoned.
    Cancel {
        /// Request cancelled.
        request_id: u64,
    },
}

/// Complete record of a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameTranscript {
    /// Version for forward compatibility.
    pub version: u8,
    /// Game identifier.
    pub game_id: [u8; 16],
    /// Seed the session was created with.
    pub rng_seed: u64,
    /// Rules configuration.
    pub config: GameConfig,
    /// Accepted inputs in order.
    pub entries: Vec<TranscriptEntry>,
    /// State hash after the last entry.
    pub final_hash: StateHash,
    /// When the transcript was taken.
    pub recorded_at: DateTime<Utc>,
}

/// Errors that can occur during replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Transcript written by a different version.
    #[error("transcript version {got}, expected {expected}")]
    VersionMismatch {
        /// Supported version.
        expected: u8,
        /// Version found.
        got: u8,
    },

    /// Pool cannot field two teams.
    #[error("card pool: {0}")]
    Pool(#[from] LineupError),

    /// An entry the original game accepted was refused on replay.
    #[error("entry {index} diverged: {source}")]
    Diverged {
        /// Position in the transcript.
        index: usize,
        /// Machine error on replay.
        source: MachineError,
    },

    /// Replay finished with a different state.
    #[error("final hash mismatch: expected {expected}, computed {computed}")]
    FinalStateMismatch {
        /// Hex hash from the transcript.
        expected: String,
        /// Hex hash from replay.
        computed: String,
    },

    /// Binary encoding failed.
    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

impl GameTranscript {
    /// Create a transcript stamped with the current time.
    pub fn new(
        game_id: [u8; 16],
        rng_seed: u64,
        config: GameConfig,
        entries: Vec<TranscriptEntry>,
        final_hash: StateHash,
    ) -> Self {
        Self {
            version: TRANSCRIPT_VERSION,
            game_id,
            rng_seed,
            config,
            entries,
            final_hash,
            recorded_at: Utc::now(),
        }
    }

    /// Serialize to bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bincode.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Hash of the inputs alone, independent of the outcome.
    pub fn input_hash(&self) -> Result<StateHash, bincode::Error> {
        let mut hasher = StateHasher::for_transcript();
        hasher.update_bytes(&self.game_id);
        hasher.update_u64(self.rng_seed);
        hasher.update_bytes(&bincode::serialize(&self.entries)?);
        Ok(hasher.finalize())
    }

    /// Re-run every entry on a fresh machine.
    pub fn replay(&self, pool: Arc<CardPool>) -> Result<GameMachine, ReplayError> {
        if self.version != TRANSCRIPT_VERSION {
            return Err(ReplayError::VersionMismatch { expected: TRANSCRIPT_VERSION, got: self.version });
        }

        let mut machine = GameMachine::new(self.game_id, self.rng_seed, self.config.clone(), pool)?;
        for (index, entry) in self.entries.iter().enumerate() {
            let result = match entry {
                TranscriptEntry::Command { issuer, command } => {
                    machine.handle(*issuer, command.clone()).map(|_| ())
                }
                TranscriptEntry::Roll { request_id, value } => machine.deliver_roll(*request_id, *value),
                TranscriptEntry::Cancel { request_id } => {
                    machine.cancel_roll(*request_id).map_err(MachineError::from)
                }
            };
            result.map_err(|source| ReplayError::Diverged { index, source })?;
            machine.take_events();
        }
        Ok(machine)
    }

    /// Replay and compare the final state hash.
    pub fn verify(&self, pool: Arc<CardPool>) -> Result<(), ReplayError> {
        let machine = self.replay(pool)?;
        let computed = machine.state_hash();
        if computed != self.final_hash {
            return Err(ReplayError::FinalStateMismatch {
                expected: hex::encode(self.final_hash),
                computed: hex::encode(computed),
            });
        }
        Ok(())
    }
}
