//! Player Cards and Outcome Charts
//!
//! Every card carries an outcome chart: eight inclusive d20 ranges, one per
//! outcome kind, that together cover 1..=20 exactly once. Charts are
//! validated on construction (and on deserialization), so a lookup on a
//! constructed chart cannot miss.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::StateHasher;
use crate::game::dice::DieRoll;
use crate::DIE_SIDES;

// =============================================================================
// AT-BAT OUTCOME
// =============================================================================

/// Result of a plate appearance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
#[derive(Default)]
pub enum AtBatOutcome {
    /// No plate appearance resolved yet.
    #[default]
    None = 0,
    /// Batter struck out.
    Strikeout = 1,
    /// Batter grounded out.
    Groundout = 2,
    /// Batter flied out.
    Flyout = 3,
    /// Base on balls.
    Walk = 4,
    /// One-base hit.
    Single = 5,
    /// Two-base hit.
    Double = 6,
    /// Three-base hit.
    Triple = 7,
    /// Four-base hit.
    HomeRun = 8,
}

/// Outcomes in chart order.
pub const CHART_OUTCOMES: [AtBatOutcome; 8] = [
    AtBatOutcome::Strikeout,
    AtBatOutcome::Groundout,
    AtBatOutcome::Flyout,
    AtBatOutcome::Walk,
    AtBatOutcome::Single,
    AtBatOutcome::Double,
    AtBatOutcome::Triple,
    AtBatOutcome::HomeRun,
];

impl AtBatOutcome {
    /// Bases the batter is credited with (display only).
    pub fn bases_advanced(self) -> u8 {
        match self {
            AtBatOutcome::Walk | AtBatOutcome::Single => 1,
            AtBatOutcome::Double => 2,
            AtBatOutcome::Triple => 3,
            AtBatOutcome::HomeRun => 4,
            AtBatOutcome::None
            | AtBatOutcome::Strikeout
            | AtBatOutcome::Groundout
            | AtBatOutcome::Flyout => 0,
        }
    }

    /// Strikeout, groundout or flyout.
    #[inline]
    pub fn is_out(self) -> bool {
        matches!(
            self,
            AtBatOutcome::Strikeout | AtBatOutcome::Groundout | AtBatOutcome::Flyout
        )
    }

    /// Single through home run.
    #[inline]
    pub fn is_hit(self) -> bool {
        matches!(
            self,
            AtBatOutcome::Single
                | AtBatOutcome::Double
                | AtBatOutcome::Triple
                | AtBatOutcome::HomeRun
        )
    }

    /// Position in a chart, `None` for [`AtBatOutcome::None`].
    fn chart_index(self) -> Option<usize> {
        CHART_OUTCOMES.iter().position(|o| *o == self)
    }

    /// Human-readable name for game messages.
    pub fn label(self) -> &'static str {
        match self {
            AtBatOutcome::None => "no result",
            AtBatOutcome::Strikeout => "strikeout",
            AtBatOutcome::Groundout => "groundout",
            AtBatOutcome::Flyout => "flyout",
            AtBatOutcome::Walk => "walk",
            AtBatOutcome::Single => "single",
            AtBatOutcome::Double => "double",
            AtBatOutcome::Triple => "triple",
            AtBatOutcome::HomeRun => "home run",
        }
    }
}

// =============================================================================
// OUTCOME CHART
// =============================================================================

/// Inclusive range of d20 faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRange {
    /// Lowest face in the range.
    pub low: u8,
    /// Highest face in the range.
    pub high: u8,
}

impl RollRange {
    /// Create a range.
    pub const fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    /// Does the range contain this face?
    #[inline]
    pub fn contains(self, roll: u8) -> bool {
        self.low <= roll && roll <= self.high
    }

    /// Number of faces covered.
    pub fn width(self) -> u8 {
        self.high.saturating_sub(self.low) + 1
    }
}

/// Chart construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    /// Range with `low > high`.
    #[error("{outcome:?} range {low}..={high} is inverted")]
    InvertedRange {
        /// Outcome owning the range.
        outcome: AtBatOutcome,
        /// Range start.
        low: u8,
        /// Range end.
        high: u8,
    },

    /// Range reaching outside 1..=20.
    #[error("{outcome:?} range {low}..={high} leaves the die")]
    OutOfDomain {
        /// Outcome owning the range.
        outcome: AtBatOutcome,
        /// Range start.
        low: u8,
        /// Range end.
        high: u8,
    },

    /// Face not covered by any range.
    #[error("roll {0} is not covered by any outcome")]
    Uncovered(u8),

    /// Face covered twice.
    #[error("roll {roll} is claimed by both {first:?} and {second:?}")]
    Overlap {
        /// Face covered twice.
        roll: u8,
        /// First claimant.
        first: AtBatOutcome,
        /// Second claimant.
        second: AtBatOutcome,
    },

    /// Widths that do not add up to the die.
    #[error("chart widths sum to {0}, expected 20")]
    BadWidths(u32),
}

/// Per-card outcome table.
///
/// Invariant: the ranges partition 1..=20, every face maps to exactly one
/// outcome. Outcomes a card never produces have no range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChartSpec", into = "ChartSpec")]
pub struct OutcomeChart {
    ranges: [Option<RollRange>; 8],
}

impl OutcomeChart {
    /// Build a chart from ranges in [`CHART_OUTCOMES`] order.
    pub fn new(ranges: [Option<RollRange>; 8]) -> Result<Self, ChartError> {
        validate_ranges(&ranges)?;
        Ok(Self { ranges })
    }

    /// Build a chart from range widths in [`CHART_OUTCOMES`] order, laid out
    /// contiguously from 1. A zero width means the card never produces that
    /// outcome.
    pub fn from_widths(widths: [u8; 8]) -> Result<Self, ChartError> {
        let total: u32 = widths.iter().map(|w| *w as u32).sum();
        if total != DIE_SIDES as u32 {
            return Err(ChartError::BadWidths(total));
        }
        Self::new(layout(widths))
    }

    /// Range assigned to an outcome, if any.
    pub fn range(&self, outcome: AtBatOutcome) -> Option<RollRange> {
        outcome.chart_index().and_then(|i| self.ranges[i])
    }

    /// Outcome whose range contains the roll.
    pub fn lookup(&self, roll: DieRoll) -> Option<AtBatOutcome> {
        let face = roll.value();
        self.ranges
            .iter()
            .zip(CHART_OUTCOMES)
            .find(|(range, _)| range.is_some_and(|r| r.contains(face)))
            .map(|(_, outcome)| outcome)
    }

    /// Resolve a roll against the chart.
    ///
    /// A miss is a construction bug, reported rather than recovered.
    pub fn resolve(&self, roll: DieRoll) -> Result<AtBatOutcome, ChartError> {
        self.lookup(roll)
            .ok_or(ChartError::Uncovered(roll.value()))
    }

    /// Hash the chart layout.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        for range in &self.ranges {
            match range {
                Some(r) => {
                    hasher.update_u8(r.low);
                    hasher.update_u8(r.high);
                }
                None => hasher.update_u8(0),
            }
        }
    }
}

/// Lay widths out contiguously from face 1.
fn layout(widths: [u8; 8]) -> [Option<RollRange>; 8] {
    let mut ranges = [None; 8];
    let mut next = 1u8;
    for (slot, width) in ranges.iter_mut().zip(widths) {
        if width > 0 {
            *slot = Some(RollRange::new(next, next.saturating_add(width - 1)));
            next = next.saturating_add(width);
        }
    }
    ranges
}

fn validate_ranges(ranges: &[Option<RollRange>; 8]) -> Result<(), ChartError> {
    for (range, outcome) in ranges.iter().zip(CHART_OUTCOMES) {
        if let Some(r) = range {
            if r.low > r.high {
                return Err(ChartError::InvertedRange { outcome, low: r.low, high: r.high });
            }
            if r.low < 1 || r.high > DIE_SIDES {
                return Err(ChartError::OutOfDomain { outcome, low: r.low, high: r.high });
            }
        }
    }

    for roll in 1..=DIE_SIDES {
        let mut owners = ranges
            .iter()
            .zip(CHART_OUTCOMES)
            .filter(|(range, _)| range.is_some_and(|r| r.contains(roll)))
            .map(|(_, outcome)| outcome);

        let first = owners.next().ok_or(ChartError::Uncovered(roll))?;
        if let Some(second) = owners.next() {
            return Err(ChartError::Overlap { roll, first, second });
        }
    }

    Ok(())
}

/// Serialized form of a chart: one optional range per outcome.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(default)]
    strikeout: Option<RollRange>,
    #[serde(default)]
    groundout: Option<RollRange>,
    #[serde(default)]
    flyout: Option<RollRange>,
    #[serde(default)]
    walk: Option<RollRange>,
    #[serde(default)]
    single: Option<RollRange>,
    #[serde(default)]
    double: Option<RollRange>,
    #[serde(default)]
    triple: Option<RollRange>,
    #[serde(default)]
    home_run: Option<RollRange>,
}

impl TryFrom<ChartSpec> for OutcomeChart {
    type Error = ChartError;

    fn try_from(spec: ChartSpec) -> Result<Self, Self::Error> {
        OutcomeChart::new([
            spec.strikeout,
            spec.groundout,
            spec.flyout,
            spec.walk,
            spec.single,
            spec.double,
            spec.triple,
            spec.home_run,
        ])
    }
}

impl From<OutcomeChart> for ChartSpec {
    fn from(chart: OutcomeChart) -> Self {
        let [strikeout, groundout, flyout, walk, single, double, triple, home_run] = chart.ranges;
        Self { strikeout, groundout, flyout, walk, single, double, triple, home_run }
    }
}

// =============================================================================
// CARDS
// =============================================================================

/// Card identifier, unique within a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct CardId(pub u32);

/// Fielding classification of a batter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Position {
    /// Behind the plate.
    Catcher = 0,
    /// First, second, third, shortstop.
    Infield = 1,
    /// Left, center, right.
    Outfield = 2,
}

/// Cumulative batting counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatterStats {
    /// Plate appearances resolved against this batter.
    pub at_bats: u32,
    /// Singles, doubles, triples and home runs.
    pub hits: u32,
    /// Bases on balls.
    pub walks: u32,
    /// Home runs.
    pub home_runs: u32,
    /// Runs batted in.
    pub rbis: u32,
    /// Runs scored.
    pub runs: u32,
}

/// Cumulative pitching counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitcherStats {
    /// Strikeouts recorded.
    pub strikeouts: u32,
    /// Walks issued.
    pub walks: u32,
    /// Hits allowed.
    pub hits_allowed: u32,
    /// Runs charged.
    pub earned_runs: u32,
    /// Half-innings pitched to completion.
    pub innings_pitched: u32,
}

/// A hitter's card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatterCard {
    /// Card identifier.
    pub id: CardId,
    /// Display name.
    pub name: String,
    /// On-base rating, compared against defense roll + control.
    pub on_base: i32,
    /// Speed rating, used by steals, tag-ups and double plays.
    pub speed: i32,
    /// Fielding bonus added to the team's positional defense.
    pub position_plus: i32,
    /// Fielding classification.
    pub position: Position,
    /// Outcome chart used when the batter has the advantage.
    pub chart: OutcomeChart,
    /// Counters accumulated during the game.
    #[serde(default)]
    pub stats: BatterStats,
}

impl BatterCard {
    /// Hash identity and mutable counters.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_u32(self.stats.at_bats);
        hasher.update_u32(self.stats.hits);
        hasher.update_u32(self.stats.walks);
        hasher.update_u32(self.stats.home_runs);
        hasher.update_u32(self.stats.rbis);
        hasher.update_u32(self.stats.runs);
    }
}

/// A pitcher's card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitcherCard {
    /// Card identifier.
    pub id: CardId,
    /// Display name.
    pub name: String,
    /// Control rating, added to the defense roll.
    pub control: i32,
    /// Outcome chart used when the pitcher has the advantage.
    pub chart: OutcomeChart,
    /// Counters accumulated during the game.
    #[serde(default)]
    pub stats: PitcherStats,
}

impl PitcherCard {
    /// Hash identity and mutable counters.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_u32(self.stats.strikeouts);
        hasher.update_u32(self.stats.walks);
        hasher.update_u32(self.stats.hits_allowed);
        hasher.update_u32(self.stats.earned_runs);
        hasher.update_u32(self.stats.innings_pitched);
    }
}

// =============================================================================
// CARD POOL
// =============================================================================

/// Card pool loading errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Malformed JSON or an invalid chart.
    #[error("invalid card pool: {0}")]
    Json(#[from] serde_json::Error),

    /// Two cards share an id.
    #[error("duplicate card id {0:?}")]
    DuplicateId(CardId),
}

/// Read-only shared pool of card templates, queried once per game when
/// lineups are drawn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPool {
    /// Hitters available to both teams.
    pub batters: Vec<BatterCard>,
    /// Pitchers available to both teams.
    pub pitchers: Vec<PitcherCard>,
}

impl CardPool {
    /// Load a pool from JSON. Every chart is validated while parsing.
    pub fn from_json(json: &str) -> Result<Self, PoolError> {
        let pool: CardPool = serde_json::from_str(json)?;
        pool.check_ids()?;
        Ok(pool)
    }

    /// Serialize the pool to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn check_ids(&self) -> Result<(), PoolError> {
        let mut ids: Vec<CardId> = self
            .batters
            .iter()
            .map(|b| b.id)
            .chain(self.pitchers.iter().map(|p| p.id))
            .collect();
        ids.sort();
        match ids.windows(2).find(|w| w[0] == w[1]) {
            Some(w) => Err(PoolError::DuplicateId(w[0])),
            None => Ok(()),
        }
    }

    /// The stock 20-batter, 4-pitcher pool shipped with the server.
    pub fn builtin() -> Self {
        let batters = BUILTIN_BATTERS
            .iter()
            .enumerate()
            .map(|(i, (name, position, on_base, speed, plus, widths))| BatterCard {
                id: CardId(i as u32 + 1),
                name: (*name).to_string(),
                on_base: *on_base,
                speed: *speed,
                position_plus: *plus,
                position: *position,
                chart: OutcomeChart { ranges: layout(*widths) },
                stats: BatterStats::default(),
            })
            .collect();

        let pitchers = BUILTIN_PITCHERS
            .iter()
            .enumerate()
            .map(|(i, (name, control, widths))| PitcherCard {
                id: CardId(101 + i as u32),
                name: (*name).to_string(),
                control: *control,
                chart: OutcomeChart { ranges: layout(*widths) },
                stats: PitcherStats::default(),
            })
            .collect();

        Self { batters, pitchers }
    }
}

type BatterRow = (&'static str, Position, i32, i32, i32, [u8; 8]);

// Widths: SO, GO, FO, BB, 1B, 2B, 3B, HR
const BUILTIN_BATTERS: [BatterRow; 20] = [
    ("Abe Castillo", Position::Catcher, 9, 8, 2, [3, 3, 3, 3, 5, 2, 0, 1]),
    ("Ray Okafor", Position::Catcher, 8, 9, 3, [3, 3, 4, 3, 4, 2, 0, 1]),
    ("Dom Petrakis", Position::Infield, 11, 14, 1, [2, 3, 2, 4, 6, 2, 1, 0]),
    ("Luis Navarro", Position::Infield, 10, 16, 2, [2, 3, 3, 3, 6, 2, 1, 0]),
    ("Hank Bellamy", Position::Infield, 12, 10, 0, [3, 2, 2, 4, 4, 2, 0, 3]),
    ("Teddy Marsh", Position::Infield, 9, 12, 3, [2, 4, 3, 3, 5, 2, 0, 1]),
    ("Kenji Arata", Position::Infield, 13, 15, 1, [1, 3, 2, 5, 6, 2, 1, 0]),
    ("Bo Whitaker", Position::Infield, 10, 11, 2, [3, 3, 3, 3, 4, 2, 0, 2]),
    ("Sal Romero", Position::Infield, 11, 9, 1, [3, 2, 3, 4, 4, 2, 0, 2]),
    ("Gus Lindqvist", Position::Infield, 9, 13, 2, [2, 4, 3, 2, 6, 2, 1, 0]),
    ("Otis Grant", Position::Infield, 12, 8, 0, [4, 2, 2, 4, 3, 2, 0, 3]),
    ("Milo Ferreira", Position::Infield, 10, 17, 1, [2, 3, 3, 3, 6, 1, 2, 0]),
    ("Jack Duran", Position::Outfield, 11, 15, 1, [2, 3, 3, 3, 5, 2, 1, 1]),
    ("Wes Calloway", Position::Outfield, 12, 12, 2, [3, 2, 3, 4, 4, 2, 0, 2]),
    ("Nate Oyelaran", Position::Outfield, 13, 18, 1, [2, 2, 3, 4, 5, 2, 2, 0]),
    ("Carl Brandt", Position::Outfield, 10, 10, 0, [4, 2, 2, 3, 4, 2, 0, 3]),
    ("Ike Moreau", Position::Outfield, 11, 14, 2, [2, 3, 3, 3, 5, 3, 1, 0]),
    ("Pete Saldana", Position::Outfield, 9, 11, 1, [3, 3, 3, 3, 5, 2, 0, 1]),
    ("Rollie Haynes", Position::Outfield, 12, 13, 1, [2, 3, 2, 4, 5, 2, 1, 1]),
    ("Zeke Amundsen", Position::Outfield, 10, 9, 2, [3, 3, 3, 3, 4, 2, 0, 2]),
];

const BUILTIN_PITCHERS: [(&str, i32, [u8; 8]); 4] = [
    ("Vic Ostrowski", 5, [6, 5, 4, 2, 2, 1, 0, 0]),
    ("Eli Tanaka", 4, [5, 5, 5, 2, 2, 1, 0, 0]),
    ("Moe Delacroix", 3, [5, 4, 4, 3, 2, 1, 0, 1]),
    ("Lou Brennan", 6, [7, 5, 3, 2, 2, 1, 0, 0]),
];

// =============================================================================
// TESTS
// =============================================================================
