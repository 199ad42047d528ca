//! Game State Definitions
//!
//! The `GameSession` aggregate root and the types it is made of. Only the
//! state machine writes to a session; everyone else reads a
//! [`SessionSnapshot`].

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::core::rng::DeterministicRng;
use crate::game::at_bat::Advantage;
use crate::game::bases::BaseState;
use crate::game::card::AtBatOutcome;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::optional::OptionalActionKind;
use crate::game::roster::{Roster, Side};
use crate::game::turn::{self, TurnContext};
use crate::SCHEDULED_INNINGS;

// =============================================================================
// GAME PHASE
// =============================================================================

/// Current phase of the game. Exactly one is active; it alone decides which
/// commands are legal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GamePhase {
    /// Waiting for a start command.
    #[default]
    WaitingForPlayers = 0,
    /// Seats roll to decide who is home.
    RollForTeamAssignment = 1,
    /// Lineups are drawn from the card pool.
    SetLineups = 2,
    /// Top of the first is set up.
    StartGame = 3,
    /// Fielding side rolls against the batter.
    DefenseTurn = 4,
    /// Batting side rolls on the governing chart.
    OffenseTurn = 5,
    /// Outcome known; optional-action eligibility is checked.
    AtBatAction = 6,
    /// A steal, tag-up or double play may be attempted.
    OptionalAction = 7,
    /// Runners move and runs are counted.
    UpdateBaseRunners = 8,
    /// The next batter steps in.
    NextBatterUp = 9,
    /// A new half-inning begins.
    NewHalfInning = 10,
    /// Three outs (or a walk-off) closed the half-inning.
    EndHalfInning = 11,
    /// Terminal.
    GameOver = 12,
}

impl GamePhase {
    /// Phases the machine advances through without any command.
    pub fn is_automatic(self) -> bool {
        matches!(
            self,
            GamePhase::SetLineups
                | GamePhase::StartGame
                | GamePhase::AtBatAction
                | GamePhase::UpdateBaseRunners
                | GamePhase::NextBatterUp
                | GamePhase::NewHalfInning
                | GamePhase::EndHalfInning
        )
    }
}

/// Half of an inning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HalfInning {
    /// Away bats.
    #[default]
    Top = 0,
    /// Home bats.
    Bottom = 1,
}

// =============================================================================
// LINE SCORE
// =============================================================================

/// Runs per inning for each side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineScore {
    /// Away runs, one entry per inning started.
    pub away: Vec<u32>,
    /// Home runs, one entry per inning started.
    pub home: Vec<u32>,
}

impl LineScore {
    /// Add runs to a side's column for an inning (1-based).
    pub fn add_runs(&mut self, side: Side, inning: u32, runs: u32) {
        let column = match side {
            Side::Away => &mut self.away,
            Side::Home => &mut self.home,
        };
        let idx = inning.saturating_sub(1) as usize;
        if column.len() <= idx {
            column.resize(idx + 1, 0);
        }
        column[idx] += runs;
    }

    /// Open a side's column for an inning so scoreless frames show as zero.
    pub fn open_inning(&mut self, side: Side, inning: u32) {
        self.add_runs(side, inning, 0);
    }

    /// Runs in one side's column.
    pub fn total(&self, side: Side) -> u32 {
        match side {
            Side::Away => self.away.iter().sum(),
            Side::Home => self.home.iter().sum(),
        }
    }
}

// =============================================================================
// PENDING ROLL
// =============================================================================

/// What an outstanding roll will decide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollPurpose {
    /// Defense roll for the advantage.
    Defense,
    /// Offense roll on the governing chart.
    Offense,
    /// Optional-action contest.
    OptionalAction(OptionalActionKind),
}

impl RollPurpose {
    /// Stable byte for hashing.
    pub fn code(self) -> u8 {
        match self {
            RollPurpose::Defense => 0,
            RollPurpose::Offense => 1,
            RollPurpose::OptionalAction(kind) => 2 + kind as u8,
        }
    }
}

/// A roll requested from the dice source and not yet delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRoll {
    /// Id the result must quote.
    pub request_id: u64,
    /// What the roll decides.
    pub purpose: RollPurpose,
    /// Side that asked for it.
    pub side: Side,
}

// =============================================================================
// CONFIG
// =============================================================================

/// Rules configuration for one game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Innings before the game can end.
    pub scheduled_innings: u32,
    /// Run the team-assignment roll instead of skipping it.
    pub team_roll_contest: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            scheduled_innings: SCHEDULED_INNINGS,
            team_roll_contest: false,
        }
    }
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// Complete state of one game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameSession {
    /// Game identifier.
    pub game_id: [u8; 16],
    /// RNG seed (for verification).
    pub rng_seed: u64,
    /// Rules configuration.
    pub config: GameConfig,

    /// Current phase.
    pub phase: GamePhase,
    /// Inning number, from 1.
    pub inning: u32,
    /// Half of the inning.
    pub half: HalfInning,

    /// Away roster, drawn at SetLineups.
    pub away: Option<Roster>,
    /// Home roster, drawn at SetLineups.
    pub home: Option<Roster>,
    /// Runners on base.
    pub bases: BaseState,

    /// Away runs.
    pub away_score: u32,
    /// Home runs.
    pub home_score: u32,
    /// Outs in the current half-inning, 0..=3.
    pub outs: u8,
    /// Runs by inning.
    pub line_score: LineScore,

    /// Last defense roll.
    pub last_defense_roll: Option<u8>,
    /// Last offense roll.
    pub last_offense_roll: Option<u8>,
    /// Advantage from the last defense roll.
    pub advantage: Option<Advantage>,
    /// Outcome of the current (or last) plate appearance.
    pub last_outcome: AtBatOutcome,
    /// Optional action on offer.
    pub pending_action: OptionalActionKind,

    /// Outstanding roll, if the machine is waiting on the dice.
    pub pending_roll: Option<PendingRoll>,
    /// Next roll request id.
    pub next_request_id: u64,
    /// Team-assignment rolls by seat.
    pub team_rolls: [Option<u8>; 2],

    /// One side is played by the CPU.
    pub vs_cpu: bool,
    /// The CPU plays home.
    pub cpu_is_home: bool,
    /// Side holding decision authority in the current phase.
    pub decision_side: Option<Side>,

    /// Accepted commands and roll deliveries so far.
    pub sequence: u64,

    /// Deterministic RNG (lineup draw).
    #[serde(skip)]
    pub rng: DeterministicRng,

    /// Events not yet drained.
    #[serde(skip)]
    pub pending_events: Vec<GameEvent>,
}

impl GameSession {
    /// Create a session waiting for players.
    pub fn new(game_id: [u8; 16], rng_seed: u64, config: GameConfig) -> Self {
        Self {
            game_id,
            rng_seed,
            config,
            phase: GamePhase::WaitingForPlayers,
            inning: 1,
            half: HalfInning::Top,
            away: None,
            home: None,
            bases: BaseState::new(),
            away_score: 0,
            home_score: 0,
            outs: 0,
            line_score: LineScore::default(),
            last_defense_roll: None,
            last_offense_roll: None,
            advantage: None,
            last_outcome: AtBatOutcome::None,
            pending_action: OptionalActionKind::None,
            pending_roll: None,
            next_request_id: 1,
            team_rolls: [None, None],
            vs_cpu: false,
            cpu_is_home: false,
            decision_side: None,
            sequence: 0,
            rng: DeterministicRng::new(rng_seed),
            pending_events: Vec::new(),
        }
    }

    /// Top half?
    #[inline]
    pub fn is_top_of_inning(&self) -> bool {
        self.half == HalfInning::Top
    }

    /// Side at bat.
    #[inline]
    pub fn batting_side(&self) -> Side {
        turn::batting_side(self.is_top_of_inning())
    }

    /// Side in the field.
    #[inline]
    pub fn fielding_side(&self) -> Side {
        turn::fielding_side(self.is_top_of_inning())
    }

    /// Inputs for the turn resolver.
    pub fn turn_context(&self) -> TurnContext {
        TurnContext {
            phase: self.phase,
            is_top_of_inning: self.is_top_of_inning(),
            pending_action: self.pending_action,
        }
    }

    /// Roster for a side.
    pub fn roster(&self, side: Side) -> Option<&Roster> {
        match side {
            Side::Away => self.away.as_ref(),
            Side::Home => self.home.as_ref(),
        }
    }

    /// Mutable roster for a side.
    pub fn roster_mut(&mut self, side: Side) -> Option<&mut Roster> {
        match side {
            Side::Away => self.away.as_mut(),
            Side::Home => self.home.as_mut(),
        }
    }

    /// Batting and fielding rosters at once.
    pub fn rosters_mut(&mut self, batting: Side) -> Option<(&mut Roster, &mut Roster)> {
        match batting {
            Side::Away => Some((self.away.as_mut()?, self.home.as_mut()?)),
            Side::Home => Some((self.home.as_mut()?, self.away.as_mut()?)),
        }
    }

    /// Runs for a side.
    pub fn score(&self, side: Side) -> u32 {
        match side {
            Side::Away => self.away_score,
            Side::Home => self.home_score,
        }
    }

    /// Add runs to a side's total and the line score.
    pub fn add_runs(&mut self, side: Side, runs: u32) {
        match side {
            Side::Away => self.away_score += runs,
            Side::Home => self.home_score += runs,
        }
        self.line_score.add_runs(side, self.inning, runs);
    }

    /// Side ahead, `None` if level.
    pub fn leader(&self) -> Option<Side> {
        use std::cmp::Ordering;
        match self.away_score.cmp(&self.home_score) {
            Ordering::Greater => Some(Side::Away),
            Ordering::Less => Some(Side::Home),
            Ordering::Equal => None,
        }
    }

    /// Push an event stamped with the current sequence.
    pub fn push_event(&mut self, event: GameEventData) {
        self.pending_events.push(GameEvent::new(self.sequence, event));
    }

    /// Take all pending events.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Compute state hash for verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.sequence, self.rng_seed, |hasher| {
            hasher.update_bytes(&self.game_id);
            hasher.update_u8(self.phase as u8);
            hasher.update_u32(self.inning);
            hasher.update_u8(self.half as u8);
            hasher.update_u32(self.away_score);
            hasher.update_u32(self.home_score);
            hasher.update_u8(self.outs);

            for roster in [&self.away, &self.home] {
                match roster {
                    Some(r) => {
                        hasher.update_u8(1);
                        r.hash_into(hasher);
                    }
                    None => hasher.update_u8(0),
                }
            }
            self.bases.hash_into(hasher);
            hash_line_score(&self.line_score, hasher);

            hasher.update_opt_u8(self.last_defense_roll);
            hasher.update_opt_u8(self.last_offense_roll);
            hasher.update_opt_u8(self.advantage.map(|a| a as u8));
            hasher.update_u8(self.last_outcome as u8);
            hasher.update_u8(self.pending_action as u8);

            match &self.pending_roll {
                Some(roll) => {
                    hasher.update_u8(1);
                    hasher.update_u64(roll.request_id);
                    hasher.update_u8(roll.purpose.code());
                    hasher.update_u8(roll.side as u8);
                }
                None => hasher.update_u8(0),
            }
            hasher.update_u64(self.next_request_id);
            hasher.update_opt_u8(self.team_rolls[0]);
            hasher.update_opt_u8(self.team_rolls[1]);

            hasher.update_bool(self.vs_cpu);
            hasher.update_bool(self.cpu_is_home);
            hasher.update_opt_u8(self.decision_side.map(|s| s as u8));
        })
    }

    /// Read model for observers.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            game_id: hex::encode(self.game_id),
            phase: self.phase,
            inning: self.inning,
            half: self.half,
            away_score: self.away_score,
            home_score: self.home_score,
            outs: self.outs,
            bases: self.bases.clone(),
            line_score: self.line_score.clone(),
            away: self.away.clone(),
            home: self.home.clone(),
            last_defense_roll: self.last_defense_roll,
            last_offense_roll: self.last_offense_roll,
            advantage: self.advantage,
            last_outcome: self.last_outcome,
            pending_action: self.pending_action,
            pending_roll: self.pending_roll,
            decision_side: self.decision_side,
            vs_cpu: self.vs_cpu,
            cpu_is_home: self.cpu_is_home,
            sequence: self.sequence,
            state_hash: hex::encode(self.compute_hash()),
        }
    }
}

fn hash_line_score(line: &LineScore, hasher: &mut StateHasher) {
    for column in [&line.away, &line.home] {
        hasher.update_u32(column.len() as u32);
        for runs in column {
            hasher.update_u32(*runs);
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Serializable view of a session, replicated to non-authoritative
/// participants. Observers render it; they never compute it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Game id (hex).
    pub game_id: String,
    /// Phase.
    pub phase: GamePhase,
    /// Inning number.
    pub inning: u32,
    /// Half.
    pub half: HalfInning,
    /// Away runs.
    pub away_score: u32,
    /// Home runs.
    pub home_score: u32,
    /// Outs.
    pub outs: u8,
    /// Runners.
    pub bases: BaseState,
    /// Runs by inning.
    pub line_score: LineScore,
    /// Away roster with counters.
    pub away: Option<Roster>,
    /// Home roster with counters.
    pub home: Option<Roster>,
    /// Last defense roll.
    pub last_defense_roll: Option<u8>,
    /// Last offense roll.
    pub last_offense_roll: Option<u8>,
    /// Advantage.
    pub advantage: Option<Advantage>,
    /// Last outcome.
    pub last_outcome: AtBatOutcome,
    /// Optional action on offer.
    pub pending_action: OptionalActionKind,
    /// Outstanding roll.
    pub pending_roll: Option<PendingRoll>,
    /// Side holding decision authority.
    pub decision_side: Option<Side>,
    /// CPU game.
    pub vs_cpu: bool,
    /// CPU is home.
    pub cpu_is_home: bool,
    /// Sequence number.
    pub sequence: u64,
    /// State hash (hex).
    pub state_hash: String,
}

impl SessionSnapshot {
    /// Top half?
    pub fn is_top_of_inning(&self) -> bool {
        self.half == HalfInning::Top
    }

    /// Inputs for the turn resolver.
    pub fn turn_context(&self) -> TurnContext {
        TurnContext {
            phase: self.phase,
            is_top_of_inning: self.is_top_of_inning(),
            pending_action: self.pending_action,
        }
    }

    /// Side expected to act.
    pub fn acting_side(&self) -> Option<Side> {
        turn::acting_side(&self.turn_context())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = GameSession::new([1; 16], 42, GameConfig::default());
        assert_eq!(session.phase, GamePhase::WaitingForPlayers);
        assert_eq!(session.inning, 1);
        assert_eq!(session.outs, 0);
        assert!(session.away.is_none());
        assert_eq!(session.config.scheduled_innings, 9);
        assert!(!session.config.team_roll_contest);
    }

    #[test]
    fn test_hash_tracks_state() {
        let a = GameSession::new([1; 16], 42, GameConfig::default());
        let mut b = a.clone();
        assert_eq!(a.compute_hash(), b.compute_hash());

        b.outs = 1;
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_hash_includes_roll_purpose() {
        let mut a = GameSession::new([1; 16], 42, GameConfig::default());
        a.pending_roll = Some(PendingRoll { request_id: 3, purpose: RollPurpose::Defense, side: Side::Home });
        let mut b = a.clone();
        b.pending_roll = Some(PendingRoll { request_id: 3, purpose: RollPurpose::Offense, side: Side::Home });
        let mut c = a.clone();
        c.pending_roll = Some(PendingRoll {
            request_id: 3,
            purpose: RollPurpose::OptionalAction(OptionalActionKind::TagUp),
            side: Side::Home,
        });

        assert_ne!(a.compute_hash(), b.compute_hash());
        assert_ne!(b.compute_hash(), c.compute_hash());
        assert_ne!(a.compute_hash(), c.compute_hash());
    }

    #[test]
    fn test_hash_includes_ratings() {
        let mut a = GameSession::new([1; 16], 42, GameConfig::default());
        let pool = crate::game::card::CardPool::builtin();
        let mut rng = crate::core::rng::DeterministicRng::new(9);
        let (away, home) = crate::game::roster::build_lineups(&pool, &mut rng).unwrap();
        a.away = Some(away);
        a.home = Some(home);

        let mut b = a.clone();
        if let Some(home) = b.home.as_mut() {
            home.fielding.catcher += 1;
        }
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_events_do_not_affect_hash() {
        let mut session = GameSession::new([1; 16], 42, GameConfig::default());
        let before = session.compute_hash();
        session.push_event(GameEventData::Message { text: "hi".into() });
        assert_eq!(session.compute_hash(), before);
        assert_eq!(session.take_events().len(), 1);
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_add_runs_updates_line_score() {
        let mut session = GameSession::new([1; 16], 42, GameConfig::default());
        session.add_runs(Side::Away, 2);
        session.inning = 3;
        session.add_runs(Side::Away, 1);
        session.add_runs(Side::Home, 4);

        assert_eq!(session.line_score.away, vec![2, 0, 1]);
        assert_eq!(session.line_score.home, vec![0, 0, 4]);
        assert_eq!(session.line_score.total(Side::Away), session.away_score);
        assert_eq!(session.leader(), Some(Side::Home));
    }

    #[test]
    fn test_snapshot_json() {
        let session = GameSession::new([7; 16], 1, GameConfig::default());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.game_id, "07".repeat(16));
        assert_eq!(snapshot.state_hash, hex::encode(session.compute_hash()));

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
