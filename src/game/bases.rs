//! Base-Running Engine
//!
//! Tracks who occupies first, second and third, and moves runners for each
//! outcome kind. Every operation hands back the runners who crossed the
//! plate; the caller credits them to the batting team.
//!
//! Invariant: at most one runner per base, and a runner is on a base if and
//! only if they have neither scored nor been put out.

use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::game::card::{AtBatOutcome, CardId};

/// A base a runner can stand on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Base {
    /// First base.
    First = 0,
    /// Second base.
    Second = 1,
    /// Third base.
    Third = 2,
}

impl Base {
    /// All bases, first to third.
    pub const ALL: [Base; 3] = [Base::First, Base::Second, Base::Third];

    /// The base ahead, `None` from third (home).
    pub fn next(self) -> Option<Base> {
        match self {
            Base::First => Some(Base::Second),
            Base::Second => Some(Base::Third),
            Base::Third => None,
        }
    }
}

/// A batter who reached base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    /// Card of the runner.
    pub card_id: CardId,
    /// Speed rating at the time they reached.
    pub speed: i32,
    /// Batting-order slot the runner came from.
    pub lineup_slot: usize,
}

/// Runners who scored on a play, in the order they crossed the plate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunsScored {
    runners: Vec<Runner>,
}

impl RunsScored {
    /// No runs.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single runner crossing the plate.
    pub fn from_runner(runner: Runner) -> Self {
        Self { runners: vec![runner] }
    }

    /// Number of runs.
    pub fn count(&self) -> u32 {
        self.runners.len() as u32
    }

    /// Did anyone score?
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// The scoring runners.
    pub fn runners(&self) -> &[Runner] {
        &self.runners
    }

    fn push(&mut self, runner: Option<Runner>) {
        if let Some(r) = runner {
            self.runners.push(r);
        }
    }

    /// Fold another play's runs into this one.
    pub fn extend(&mut self, other: RunsScored) {
        self.runners.extend(other.runners);
    }
}

/// Occupancy of the three bases.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseState {
    bases: [Option<Runner>; 3],
}

impl BaseState {
    /// Bases empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner on a base.
    #[inline]
    pub fn runner(&self, base: Base) -> Option<&Runner> {
        self.bases[base as usize].as_ref()
    }

    /// Is the base occupied?
    #[inline]
    pub fn is_occupied(&self, base: Base) -> bool {
        self.bases[base as usize].is_some()
    }

    /// Nobody on.
    pub fn is_empty(&self) -> bool {
        self.bases.iter().all(Option::is_none)
    }

    /// Runners on first, second and third.
    pub fn is_loaded(&self) -> bool {
        self.bases.iter().all(Option::is_some)
    }

    /// Number of runners on base.
    pub fn occupied_count(&self) -> usize {
        self.bases.iter().filter(|b| b.is_some()).count()
    }

    /// Put a runner on an empty base. Returns the runner back if the base
    /// is already taken.
    pub fn place(&mut self, base: Base, runner: Runner) -> Result<(), Runner> {
        let slot = &mut self.bases[base as usize];
        if slot.is_some() {
            return Err(runner);
        }
        *slot = Some(runner);
        Ok(())
    }

    /// Remove and return the runner on a base.
    pub fn take(&mut self, base: Base) -> Option<Runner> {
        self.bases[base as usize].take()
    }

    /// Empty all three bases.
    pub fn clear_bases(&mut self) {
        self.bases = [None, None, None];
    }

    /// Card ids on first, second, third.
    pub fn occupants(&self) -> [Option<CardId>; 3] {
        self.bases.map(|b| b.map(|r| r.card_id))
    }

    /// Move the runner on `from` up one base, pushing any runner ahead of
    /// them along. A runner forced off third scores.
    pub fn force_advance_from(&mut self, from: Base) -> RunsScored {
        let mut scored = RunsScored::none();
        if !self.is_occupied(from) {
            return scored;
        }
        match from.next() {
            Some(ahead) => {
                if self.is_occupied(ahead) {
                    scored.extend(self.force_advance_from(ahead));
                }
                let runner = self.take(from);
                self.bases[ahead as usize] = runner;
            }
            None => scored.push(self.take(from)),
        }
        scored
    }

    /// Apply a plate-appearance outcome for `batter`.
    pub fn process(&mut self, outcome: AtBatOutcome, batter: Runner) -> RunsScored {
        match outcome {
            AtBatOutcome::Walk => self.process_walk(batter),
            AtBatOutcome::Single => self.process_single(batter),
            AtBatOutcome::Double => self.process_double(batter),
            AtBatOutcome::Triple => self.process_triple(batter),
            AtBatOutcome::HomeRun => self.process_home_run(batter),
            AtBatOutcome::Strikeout
            | AtBatOutcome::Groundout
            | AtBatOutcome::Flyout
            | AtBatOutcome::None => self.process_out(),
        }
    }

    /// Base on balls: only forced runners move, batter to first.
    pub fn process_walk(&mut self, batter: Runner) -> RunsScored {
        let scored = self.force_advance_from(Base::First);
        self.bases[Base::First as usize] = Some(batter);
        scored
    }

    /// Single: third scores, second to third, first to second, batter to first.
    pub fn process_single(&mut self, batter: Runner) -> RunsScored {
        let mut scored = RunsScored::none();
        scored.push(self.take(Base::Third));
        self.bases[Base::Third as usize] = self.take(Base::Second);
        self.bases[Base::Second as usize] = self.take(Base::First);
        self.bases[Base::First as usize] = Some(batter);
        scored
    }

    /// Double: second and third score, first to third, batter to second.
    pub fn process_double(&mut self, batter: Runner) -> RunsScored {
        let mut scored = RunsScored::none();
        scored.push(self.take(Base::Third));
        scored.push(self.take(Base::Second));
        self.bases[Base::Third as usize] = self.take(Base::First);
        self.bases[Base::Second as usize] = Some(batter);
        scored
    }

    /// Triple: everyone on scores, batter to third.
    pub fn process_triple(&mut self, batter: Runner) -> RunsScored {
        let scored = self.clear_all_runners();
        self.bases[Base::Third as usize] = Some(batter);
        scored
    }

    /// Home run: everyone on scores, then the batter.
    pub fn process_home_run(&mut self, batter: Runner) -> RunsScored {
        let mut scored = self.clear_all_runners();
        scored.push(Some(batter));
        scored
    }

    /// Strikeout, groundout, flyout: nobody moves.
    pub fn process_out(&mut self) -> RunsScored {
        RunsScored::none()
    }

    /// Score every runner, lead runner first.
    fn clear_all_runners(&mut self) -> RunsScored {
        let mut scored = RunsScored::none();
        scored.push(self.take(Base::Third));
        scored.push(self.take(Base::Second));
        scored.push(self.take(Base::First));
        scored
    }

    /// Hash base occupancy.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        for base in &self.bases {
            match base {
                Some(r) => {
                    hasher.update_u8(1);
                    hasher.update_u32(r.card_id.0);
                    hasher.update_u32(r.lineup_slot as u32);
                    hasher.update_i32(r.speed);
                }
                None => hasher.update_u8(0),
            }
        }
    }
}
