//! Optional-Action Resolver
//!
//! Steals, tag-ups and double plays: one-roll contests offered after certain
//! outcomes. Each compares a rating plus a d20 against the opposing rating
//! plus [`OPTIONAL_ACTION_THRESHOLD`]; strictly greater wins.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::bases::{Base, BaseState, RunsScored};
use crate::game::card::{AtBatOutcome, CardId};
use crate::game::dice::DieRoll;
use crate::game::roster::FieldingRatings;
use crate::OPTIONAL_ACTION_THRESHOLD;

/// Kind of optional action on offer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OptionalActionKind {
    /// Nothing on offer.
    #[default]
    None = 0,
    /// Runner tries to take the next base after a strikeout.
    StolenBase = 1,
    /// Runner on third tries to score after a flyout.
    TagUp = 2,
    /// Defense tries to turn two after a groundout.
    DoublePlay = 3,
}

impl OptionalActionKind {
    /// Does the batting side decide this action?
    pub fn offense_decides(self) -> bool {
        matches!(self, OptionalActionKind::StolenBase | OptionalActionKind::TagUp)
    }

    /// Human-readable name.
    pub fn label(self) -> &'static str {
        match self {
            OptionalActionKind::None => "none",
            OptionalActionKind::StolenBase => "stolen base",
            OptionalActionKind::TagUp => "tag up",
            OptionalActionKind::DoublePlay => "double play",
        }
    }
}

/// Optional-action errors. Only reachable if eligibility and resolution
/// disagree about the bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OptionalActionError {
    /// No runner where the action needs one.
    #[error("no runner on {0:?}")]
    MissingRunner(Base),

    /// Resolution requested with nothing on offer.
    #[error("no optional action is available")]
    NothingAvailable,
}

/// Result of an optional-action roll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalActionResult {
    /// Action attempted.
    pub kind: OptionalActionKind,
    /// Did the deciding side win the contest?
    pub success: bool,
    /// Runner involved.
    pub runner: CardId,
    /// Outs recorded on top of the at-bat's own out.
    pub extra_outs: u8,
    /// Runners who scored on the play.
    pub runs: RunsScored,
}

/// Base a steal would start from: second if occupied, otherwise first.
pub fn steal_candidate(bases: &BaseState) -> Option<Base> {
    [Base::Second, Base::First].into_iter().find(|b| bases.is_occupied(*b))
}

/// Which optional action, if any, follows `outcome`.
///
/// `outs` is the count before the at-bat's own out is recorded.
pub fn eligible_action(outcome: AtBatOutcome, bases: &BaseState, outs: u8) -> OptionalActionKind {
    match outcome {
        AtBatOutcome::Strikeout if steal_candidate(bases).is_some() => OptionalActionKind::StolenBase,
        AtBatOutcome::Flyout if bases.is_occupied(Base::Third) && outs < 2 => OptionalActionKind::TagUp,
        AtBatOutcome::Groundout if bases.is_occupied(Base::First) && outs < 2 => {
            OptionalActionKind::DoublePlay
        }
        _ => OptionalActionKind::None,
    }
}

/// Resolve whichever action is on offer against the fielding side's ratings.
pub fn resolve(
    kind: OptionalActionKind,
    roll: DieRoll,
    bases: &mut BaseState,
    defense: &FieldingRatings,
) -> Result<OptionalActionResult, OptionalActionError> {
    match kind {
        OptionalActionKind::StolenBase => resolve_stolen_base(roll, bases, defense.catcher),
        OptionalActionKind::TagUp => resolve_tag_up(roll, bases, defense.outfield),
        OptionalActionKind::DoublePlay => resolve_double_play(roll, bases, defense.infield),
        OptionalActionKind::None => Err(OptionalActionError::NothingAvailable),
    }
}

/// Steal: succeeds iff `speed + roll > catcher + 10`. A successful runner
/// moves up one base, forcing any runner ahead of them along (a runner
/// pushed off third scores). A caught runner is out and leaves the bases.
pub fn resolve_stolen_base(
    roll: DieRoll,
    bases: &mut BaseState,
    catcher_defense: i32,
) -> Result<OptionalActionResult, OptionalActionError> {
    let from = steal_candidate(bases).ok_or(OptionalActionError::MissingRunner(Base::First))?;
    let runner = *bases.runner(from).ok_or(OptionalActionError::MissingRunner(from))?;

    let success = runner.speed + roll.as_i32() > catcher_defense + OPTIONAL_ACTION_THRESHOLD;
    let (extra_outs, runs) = if success {
        (0, bases.force_advance_from(from))
    } else {
        bases.take(from);
        (1, RunsScored::none())
    };

    Ok(OptionalActionResult {
        kind: OptionalActionKind::StolenBase,
        success,
        runner: runner.card_id,
        extra_outs,
        runs,
    })
}

/// Tag-up: succeeds iff `speed + roll > outfield + 10`. Success scores the
/// runner from third; failure leaves them there with no extra out.
pub fn resolve_tag_up(
    roll: DieRoll,
    bases: &mut BaseState,
    outfield_defense: i32,
) -> Result<OptionalActionResult, OptionalActionError> {
    let runner = *bases
        .runner(Base::Third)
        .ok_or(OptionalActionError::MissingRunner(Base::Third))?;

    let success = runner.speed + roll.as_i32() > outfield_defense + OPTIONAL_ACTION_THRESHOLD;
    let mut runs = RunsScored::none();
    if success {
        if let Some(scored) = bases.take(Base::Third) {
            runs = RunsScored::from_runner(scored);
        }
    }

    Ok(OptionalActionResult {
        kind: OptionalActionKind::TagUp,
        success,
        runner: runner.card_id,
        extra_outs: 0,
        runs,
    })
}

/// Double play: succeeds iff `infield + roll > speed + 10`. Success retires
/// the runner on first for a second out; failure leaves them safe at second,
/// pushing forced runners ahead of them.
pub fn resolve_double_play(
    roll: DieRoll,
    bases: &mut BaseState,
    infield_defense: i32,
) -> Result<OptionalActionResult, OptionalActionError> {
    let runner = *bases
        .runner(Base::First)
        .ok_or(OptionalActionError::MissingRunner(Base::First))?;

    let success = infield_defense + roll.as_i32() > runner.speed + OPTIONAL_ACTION_THRESHOLD;
    let (extra_outs, runs) = if success {
        bases.take(Base::First);
        (1, RunsScored::none())
    } else {
        (0, bases.force_advance_from(Base::First))
    };

    Ok(OptionalActionResult {
        kind: OptionalActionKind::DoublePlay,
        success,
        runner: runner.card_id,
        extra_outs,
        runs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::bases::Runner;

    fn roll(v: u8) -> DieRoll {
        DieRoll::new(v).unwrap()
    }

    fn runner(id: u32, speed: i32) -> Runner {
        Runner { card_id: CardId(id), speed, lineup_slot: 0 }
    }

    fn bases_with(spots: &[(Base, Runner)]) -> BaseState {
        let mut bases = BaseState::new();
        for (base, r) in spots {
            bases.place(*base, *r).unwrap();
        }
        bases
    }

    #[test]
    fn test_eligibility() {
        let first = bases_with(&[(Base::First, runner(1, 10))]);
        let third = bases_with(&[(Base::Third, runner(3, 10))]);
        let empty = BaseState::new();

        assert_eq!(eligible_action(AtBatOutcome::Strikeout, &first, 0), OptionalActionKind::StolenBase);
        assert_eq!(eligible_action(AtBatOutcome::Strikeout, &empty, 0), OptionalActionKind::None);
        assert_eq!(eligible_action(AtBatOutcome::Flyout, &third, 1), OptionalActionKind::TagUp);
        assert_eq!(eligible_action(AtBatOutcome::Flyout, &first, 1), OptionalActionKind::None);
        // The catch is the third out; nobody tags
        assert_eq!(eligible_action(AtBatOutcome::Flyout, &third, 2), OptionalActionKind::None);
        assert_eq!(eligible_action(AtBatOutcome::Groundout, &first, 1), OptionalActionKind::DoublePlay);
        assert_eq!(eligible_action(AtBatOutcome::Groundout, &first, 2), OptionalActionKind::None);
        assert_eq!(eligible_action(AtBatOutcome::Single, &first, 0), OptionalActionKind::None);

        let second_and_third = bases_with(&[(Base::Second, runner(2, 10)), (Base::Third, runner(3, 10))]);
        let loaded = bases_with(&[
            (Base::First, runner(1, 10)),
            (Base::Second, runner(2, 10)),
            (Base::Third, runner(3, 10)),
        ]);
        assert_eq!(eligible_action(AtBatOutcome::Strikeout, &second_and_third, 0), OptionalActionKind::StolenBase);
        assert_eq!(eligible_action(AtBatOutcome::Strikeout, &loaded, 1), OptionalActionKind::StolenBase);
        assert_eq!(eligible_action(AtBatOutcome::Strikeout, &third, 0), OptionalActionKind::None);
    }

    #[test]
    fn test_steal_candidate() {
        let second = bases_with(&[(Base::First, runner(1, 10)), (Base::Second, runner(2, 10))]);
        assert_eq!(steal_candidate(&second), Some(Base::Second));

        let loaded = bases_with(&[
            (Base::First, runner(1, 10)),
            (Base::Second, runner(2, 10)),
            (Base::Third, runner(3, 10)),
        ]);
        assert_eq!(steal_candidate(&loaded), Some(Base::Second));

        let first_and_third = bases_with(&[(Base::First, runner(1, 10)), (Base::Third, runner(3, 10))]);
        assert_eq!(steal_candidate(&first_and_third), Some(Base::First));

        let third = bases_with(&[(Base::Third, runner(3, 10))]);
        assert_eq!(steal_candidate(&third), None);
    }

    #[test]
    fn test_steal_from_second_pushes_runner_home() {
        let mut bases = bases_with(&[(Base::Second, runner(2, 12)), (Base::Third, runner(3, 10))]);
        let result = resolve_stolen_base(roll(9), &mut bases, 10).unwrap();
        assert!(result.success);
        assert_eq!(result.runner, CardId(2));
        assert_eq!(result.runs.count(), 1);
        assert_eq!(result.runs.runners()[0].card_id, CardId(3));
        assert_eq!(bases.runner(Base::Third).map(|r| r.card_id), Some(CardId(2)));
        assert!(!bases.is_occupied(Base::Second));
    }

    #[test]
    fn test_caught_stealing_with_bases_loaded() {
        let mut bases = bases_with(&[
            (Base::First, runner(1, 10)),
            (Base::Second, runner(2, 10)),
            (Base::Third, runner(3, 10)),
        ]);
        // 10 + 10 = 20, not > 20
        let result = resolve_stolen_base(roll(10), &mut bases, 10).unwrap();
        assert!(!result.success);
        assert_eq!(result.runner, CardId(2));
        assert_eq!(result.extra_outs, 1);
        assert!(result.runs.is_empty());
        assert!(bases.is_occupied(Base::First));
        assert!(!bases.is_occupied(Base::Second));
        assert!(bases.is_occupied(Base::Third));
    }

    #[test]
    fn test_stolen_base_success_and_failure() {
        // 12 + 9 = 21 > 10 + 10
        let mut bases = bases_with(&[(Base::First, runner(1, 12))]);
        let result = resolve_stolen_base(roll(9), &mut bases, 10).unwrap();
        assert!(result.success);
        assert_eq!(result.extra_outs, 0);
        assert!(bases.is_occupied(Base::Second));
        assert!(!bases.is_occupied(Base::First));

        // 12 + 8 = 20, not > 20
        let mut bases = bases_with(&[(Base::First, runner(1, 12))]);
        let result = resolve_stolen_base(roll(8), &mut bases, 10).unwrap();
        assert!(!result.success);
        assert_eq!(result.extra_outs, 1);
        assert!(bases.is_empty());
    }

    #[test]
    fn test_tag_up() {
        let mut bases = bases_with(&[(Base::Third, runner(3, 10))]);
        let result = resolve_tag_up(roll(11), &mut bases, 10).unwrap();
        assert!(result.success);
        assert_eq!(result.runs.count(), 1);
        assert!(bases.is_empty());

        let mut bases = bases_with(&[(Base::Third, runner(3, 10))]);
        let result = resolve_tag_up(roll(10), &mut bases, 10).unwrap();
        assert!(!result.success);
        assert_eq!(result.extra_outs, 0);
        assert!(bases.is_occupied(Base::Third));
    }

    #[test]
    fn test_double_play_turned() {
        // infield 10 + roll 15 = 25 > speed 10 + 10
        let mut bases = bases_with(&[(Base::First, runner(1, 10))]);
        let result = resolve_double_play(roll(15), &mut bases, 10).unwrap();
        assert!(result.success);
        assert_eq!(result.extra_outs, 1);
        assert!(!bases.is_occupied(Base::First));
    }

    #[test]
    fn test_double_play_failed_runner_safe_at_second() {
        let mut bases = bases_with(&[(Base::First, runner(1, 10))]);
        let result = resolve_double_play(roll(5), &mut bases, 10).unwrap();
        assert!(!result.success);
        assert_eq!(result.extra_outs, 0);
        assert_eq!(bases.runner(Base::Second).map(|r| r.card_id), Some(CardId(1)));
    }

    #[test]
    fn test_resolve_nothing_available() {
        let mut bases = BaseState::new();
        let fielding = FieldingRatings::default();
        assert_eq!(
            resolve(OptionalActionKind::None, roll(10), &mut bases, &fielding),
            Err(OptionalActionError::NothingAvailable)
        );
        assert_eq!(
            resolve(OptionalActionKind::TagUp, roll(10), &mut bases, &fielding),
            Err(OptionalActionError::MissingRunner(Base::Third))
        );
    }
}
