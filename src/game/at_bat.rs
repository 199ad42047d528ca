//! At-Bat Resolver
//!
//! Two rolls decide a plate appearance. The defense roll plus the pitcher's
//! control is compared against the batter's on-base rating to pick whose
//! chart governs; the offense roll is then looked up on that chart.

use serde::{Serialize, Deserialize};

use crate::game::card::{AtBatOutcome, BatterCard, ChartError, PitcherCard};
use crate::game::dice::DieRoll;

/// Whose chart governs the at-bat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Advantage {
    /// Batter's chart.
    Batter = 0,
    /// Pitcher's chart.
    Pitcher = 1,
}

/// Decide the advantage. Ties go to the batter.
#[inline]
pub fn resolve_defense(roll: DieRoll, pitcher_control: i32, batter_on_base: i32) -> Advantage {
    if roll.as_i32() + pitcher_control <= batter_on_base {
        Advantage::Batter
    } else {
        Advantage::Pitcher
    }
}

/// Look up the outcome on the governing chart and update both cards'
/// counters.
///
/// The batter is charged an at-bat for every resolved plate appearance.
/// Strikeouts and walks are credited to the pitcher; hits are charged to the
/// pitcher and credited to the batter, and a home run is also counted as one.
pub fn resolve_offense(
    roll: DieRoll,
    advantage: Advantage,
    batter: &mut BatterCard,
    pitcher: &mut PitcherCard,
) -> Result<AtBatOutcome, ChartError> {
    let chart = match advantage {
        Advantage::Batter => &batter.chart,
        Advantage::Pitcher => &pitcher.chart,
    };
    let outcome = chart.resolve(roll)?;

    batter.stats.at_bats += 1;
    match outcome {
        AtBatOutcome::Strikeout => pitcher.stats.strikeouts += 1,
        AtBatOutcome::Walk => {
            pitcher.stats.walks += 1;
            batter.stats.walks += 1;
        }
        AtBatOutcome::Single | AtBatOutcome::Double | AtBatOutcome::Triple => {
            pitcher.stats.hits_allowed += 1;
            batter.stats.hits += 1;
        }
        AtBatOutcome::HomeRun => {
            pitcher.stats.hits_allowed += 1;
            batter.stats.hits += 1;
            batter.stats.home_runs += 1;
        }
        AtBatOutcome::Groundout | AtBatOutcome::Flyout | AtBatOutcome::None => {}
    }

    Ok(outcome)
}
