//! Dice
//!
//! Validated d20 values and the dice-source seam. The engine never rolls on
//! its own: it asks for a roll, and whoever owns the dice (the authority's
//! seeded RNG, a client's physics dice, a test script) delivers one later.

use std::collections::VecDeque;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use crate::DIE_SIDES;

/// Roll validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RollError {
    /// Value is not a face of the die.
    #[error("roll {value} is outside 1..={sides}")]
    OutOfRange {
        /// Offending value.
        value: u8,
        /// Number of faces on the die.
        sides: u8,
    },
}

/// A d20 result known to be in `1..=20`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DieRoll(u8);

impl DieRoll {
    /// Validate a raw d20 value.
    pub fn new(value: u8) -> Result<Self, RollError> {
        if (1..=DIE_SIDES).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RollError::OutOfRange { value, sides: DIE_SIDES })
        }
    }

    /// The face value.
    #[inline]
    pub fn value(self) -> u8 {
        self.0
    }

    /// The face value widened for rating arithmetic.
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl TryFrom<u8> for DieRoll {
    type Error = RollError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DieRoll> for u8 {
    fn from(roll: DieRoll) -> u8 {
        roll.0
    }
}

/// Anything that can produce a die result on behalf of the authority.
pub trait DiceSource {
    /// Roll a die with `sides` faces. Implementations return a value in
    /// `1..=sides`; the engine still validates whatever comes back.
    fn roll(&mut self, sides: u8) -> u8;
}

impl DiceSource for DeterministicRng {
    fn roll(&mut self, sides: u8) -> u8 {
        self.roll_die(sides)
    }
}

/// Dice that replay a fixed script, then fall back to a seeded RNG.
#[derive(Clone, Debug)]
pub struct ScriptedDice {
    script: VecDeque<u8>,
    fallback: DeterministicRng,
}

impl ScriptedDice {
    /// Create dice that return `script` in order.
    pub fn new(script: impl IntoIterator<Item = u8>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: DeterministicRng::new(0),
        }
    }

    /// Rolls left in the script.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DiceSource for ScriptedDice {
    fn roll(&mut self, sides: u8) -> u8 {
        self.script
            .pop_front()
            .unwrap_or_else(|| self.fallback.roll_die(sides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_die_roll_bounds() {
        assert!(DieRoll::new(1).is_ok());
        assert!(DieRoll::new(20).is_ok());
        assert_eq!(
            DieRoll::new(0),
            Err(RollError::OutOfRange { value: 0, sides: 20 })
        );
        assert!(DieRoll::new(21).is_err());
    }

    #[test]
    fn test_die_roll_deserialize_rejects_out_of_range() {
        let ok: DieRoll = serde_json::from_str("12").unwrap();
        assert_eq!(ok.value(), 12);
        assert!(serde_json::from_str::<DieRoll>("25").is_err());
    }

    #[test]
    fn test_scripted_dice() {
        let mut dice = ScriptedDice::new([4, 17]);
        assert_eq!(dice.roll(20), 4);
        assert_eq!(dice.roll(20), 17);
        assert_eq!(dice.remaining(), 0);

        let fallback = dice.roll(20);
        assert!((1..=20).contains(&fallback));
    }
}
