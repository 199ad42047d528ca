//! Rosters and Lineups
//!
//! Each side fields a nine-card batting order and one active pitcher, drawn
//! once per game from the shared card pool with a seeded Fisher-Yates
//! shuffle. Only the counters inside the cards change after that.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::StateHasher;
use crate::core::rng::DeterministicRng;
use crate::game::card::{BatterCard, CardPool, PitcherCard, Position};
use crate::LINEUP_SIZE;

// =============================================================================
// SIDE
// =============================================================================

/// Home or away team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Side {
    /// Bats in the top half of every inning.
    Away = 0,
    /// Bats in the bottom half of every inning.
    Home = 1,
}

impl Side {
    /// Both sides, away first.
    pub const ALL: [Side; 2] = [Side::Away, Side::Home];

    /// The other team.
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Away => Side::Home,
            Side::Home => Side::Away,
        }
    }

    /// Is this the home team?
    #[inline]
    pub fn is_home(self) -> bool {
        self == Side::Home
    }

    /// Side from an "is home" flag.
    #[inline]
    pub fn from_is_home(is_home: bool) -> Side {
        if is_home { Side::Home } else { Side::Away }
    }
}

// =============================================================================
// FIELDING
// =============================================================================

/// Aggregate defensive ratings for a lineup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldingRatings {
    /// Sum of catchers' PositionPlus, used against steals.
    pub catcher: i32,
    /// Sum of infielders' PositionPlus, used to turn double plays.
    pub infield: i32,
    /// Sum of outfielders' PositionPlus, used against tag-ups.
    pub outfield: i32,
}

impl FieldingRatings {
    /// Sum PositionPlus by position across a lineup.
    pub fn from_lineup(lineup: &[BatterCard]) -> Self {
        lineup.iter().fold(Self::default(), |mut acc, card| {
            match card.position {
                Position::Catcher => acc.catcher += card.position_plus,
                Position::Infield => acc.infield += card.position_plus,
                Position::Outfield => acc.outfield += card.position_plus,
            }
            acc
        })
    }
}

// =============================================================================
// ROSTER
// =============================================================================

/// Lineup construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineupError {
    /// Not enough batters for two lineups.
    #[error("card pool has {available} batters, need {needed}")]
    NotEnoughBatters {
        /// Batters in the pool.
        available: usize,
        /// Batters required.
        needed: usize,
    },

    /// Not enough pitchers for two distinct starters.
    #[error("card pool has {0} pitchers, need 2")]
    NotEnoughPitchers(usize),
}

/// One team's batting order, active pitcher and fielding aggregates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Team this roster plays for.
    pub side: Side,
    /// Batting order; always [`LINEUP_SIZE`] cards.
    lineup: Vec<BatterCard>,
    /// Active pitcher.
    pub pitcher: PitcherCard,
    /// Defensive ratings derived from the lineup.
    pub fielding: FieldingRatings,
    /// Slot of the batter currently up (or next up).
    batting_index: usize,
}

impl Roster {
    /// Build a roster; the lineup is truncated/validated to nine cards by the caller.
    fn new(side: Side, lineup: Vec<BatterCard>, pitcher: PitcherCard) -> Self {
        let fielding = FieldingRatings::from_lineup(&lineup);
        Self { side, lineup, pitcher, fielding, batting_index: 0 }
    }

    /// Batting order.
    pub fn lineup(&self) -> &[BatterCard] {
        &self.lineup
    }

    /// Batter in a lineup slot, `None` outside 0..9.
    pub fn batter(&self, slot: usize) -> Option<&BatterCard> {
        self.lineup.get(slot)
    }

    /// Mutable batter in a lineup slot, `None` outside 0..9.
    pub fn batter_mut(&mut self, slot: usize) -> Option<&mut BatterCard> {
        self.lineup.get_mut(slot)
    }

    /// Slot of the active batter.
    pub fn batting_index(&self) -> usize {
        self.batting_index
    }

    /// Active batter.
    pub fn current_batter(&self) -> Option<&BatterCard> {
        self.lineup.get(self.batting_index)
    }

    /// Move to the next batter, wrapping after the ninth. Returns the new slot.
    pub fn advance_batter(&mut self) -> usize {
        self.batting_index = (self.batting_index + 1) % LINEUP_SIZE;
        self.batting_index
    }

    /// Hash the lineup order, counters, fielding and batting position.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.side as u8);
        for card in &self.lineup {
            card.hash_into(hasher);
        }
        self.pitcher.hash_into(hasher);
        hasher.update_i32(self.fielding.catcher);
        hasher.update_i32(self.fielding.infield);
        hasher.update_i32(self.fielding.outfield);
        hasher.update_u32(self.batting_index as u32);
    }
}

/// Draw both lineups and starting pitchers from the pool.
///
/// The pool is shuffled with Fisher-Yates; the first nine batters go to the
/// away side, the next nine to the home side. Pitchers are shuffled the same
/// way and the first two become the (distinct) starters. Cards are copied
/// out of the pool with fresh counters.
pub fn build_lineups(
    pool: &CardPool,
    rng: &mut DeterministicRng,
) -> Result<(Roster, Roster), LineupError> {
    check_pool(pool)?;

    let mut batters: Vec<usize> = (0..pool.batters.len()).collect();
    rng.shuffle(&mut batters);

    let mut pitchers: Vec<usize> = (0..pool.pitchers.len()).collect();
    rng.shuffle(&mut pitchers);

    let fresh_batter = |idx: &usize| {
        let mut card = pool.batters[*idx].clone();
        card.stats = Default::default();
        card
    };
    let fresh_pitcher = |idx: usize| {
        let mut card = pool.pitchers[idx].clone();
        card.stats = Default::default();
        card
    };

    let away_lineup: Vec<BatterCard> = batters[..LINEUP_SIZE].iter().map(fresh_batter).collect();
    let home_lineup: Vec<BatterCard> = batters[LINEUP_SIZE..2 * LINEUP_SIZE]
        .iter()
        .map(fresh_batter)
        .collect();

    let away = Roster::new(Side::Away, away_lineup, fresh_pitcher(pitchers[0]));
    let home = Roster::new(Side::Home, home_lineup, fresh_pitcher(pitchers[1]));

    Ok((away, home))
}

/// Check the pool can supply two lineups and two pitchers.
pub fn check_pool(pool: &CardPool) -> Result<(), LineupError> {
    let needed = 2 * LINEUP_SIZE;
    if pool.batters.len() < needed {
        return Err(LineupError::NotEnoughBatters { available: pool.batters.len(), needed });
    }
    if pool.pitchers.len() < 2 {
        return Err(LineupError::NotEnoughPitchers(pool.pitchers.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::CardId;

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Away.opposite(), Side::Home);
        assert_eq!(Side::Home.opposite(), Side::Away);
        assert!(Side::Home.is_home());
        assert_eq!(Side::from_is_home(false), Side::Away);
    }

    #[test]
    fn test_build_lineups_draws_distinct_cards() {
        let pool = CardPool::builtin();
        let mut rng = DeterministicRng::new(7);
        let (away, home) = build_lineups(&pool, &mut rng).unwrap();

        assert_eq!(away.lineup().len(), LINEUP_SIZE);
        assert_eq!(home.lineup().len(), LINEUP_SIZE);
        assert_eq!(away.side, Side::Away);
        assert_eq!(home.side, Side::Home);
        assert_ne!(away.pitcher.id, home.pitcher.id);

        let mut ids: Vec<CardId> = away
            .lineup()
            .iter()
            .chain(home.lineup())
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 2 * LINEUP_SIZE, "no card may appear twice");
    }

    #[test]
    fn test_build_lineups_is_deterministic() {
        let pool = CardPool::builtin();
        let a = build_lineups(&pool, &mut DeterministicRng::new(99)).unwrap();
        let b = build_lineups(&pool, &mut DeterministicRng::new(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_build_lineups_resets_counters() {
        let mut pool = CardPool::builtin();
        for card in &mut pool.batters {
            card.stats.hits = 50;
        }
        let (away, home) = build_lineups(&pool, &mut DeterministicRng::new(1)).unwrap();
        assert!(away.lineup().iter().chain(home.lineup()).all(|c| c.stats.hits == 0));
    }

    #[test]
    fn test_small_pool_rejected() {
        let mut pool = CardPool::builtin();
        pool.batters.truncate(17);
        assert_eq!(
            build_lineups(&pool, &mut DeterministicRng::new(1)),
            Err(LineupError::NotEnoughBatters { available: 17, needed: 18 })
        );

        let mut pool = CardPool::builtin();
        pool.pitchers.truncate(1);
        assert_eq!(check_pool(&pool), Err(LineupError::NotEnoughPitchers(1)));
    }

    #[test]
    fn test_fielding_ratings_sum_by_position() {
        let pool = CardPool::builtin();
        // Abe Castillo (C, +2), Dom Petrakis (IF, +1), Jack Duran (OF, +1), Ike Moreau (OF, +2)
        let picks = [0usize, 2, 12, 16];
        let lineup: Vec<BatterCard> = picks.iter().map(|i| pool.batters[*i].clone()).collect();

        let ratings = FieldingRatings::from_lineup(&lineup);
        assert_eq!(ratings, FieldingRatings { catcher: 2, infield: 1, outfield: 3 });
    }

    #[test]
    fn test_advance_batter_wraps() {
        let pool = CardPool::builtin();
        let (mut away, _) = build_lineups(&pool, &mut DeterministicRng::new(3)).unwrap();

        assert_eq!(away.batting_index(), 0);
        for expected in 1..LINEUP_SIZE {
            assert_eq!(away.advance_batter(), expected);
        }
        assert_eq!(away.advance_batter(), 0);
        assert!(away.batter(LINEUP_SIZE).is_none());
    }
}
