//! Game State Machine
//!
//! The single writer of a [`GameSession`]. Commands and roll deliveries are
//! validated against the phase and the turn resolver, applied, and then the
//! machine runs every automatic phase until it needs outside input again.
//!
//! ```text
//! WaitingForPlayers → RollForTeamAssignment → SetLineups → StartGame
//!   → DefenseTurn → OffenseTurn → AtBatAction → (OptionalAction)
//!   → UpdateBaseRunners → NextBatterUp | EndHalfInning
//!   → DefenseTurn | NewHalfInning | GameOver
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::core::hash::StateHash;
use crate::game::at_bat;
use crate::game::bases::{Runner, RunsScored};
use crate::game::card::{BatterCard, CardPool, ChartError};
use crate::game::command::{Command, CommandOutcome, Issuer, Rejection, RollRequest};
use crate::game::dice::DieRoll;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::optional::{self, OptionalActionError, OptionalActionKind};
use crate::game::roster::{build_lineups, check_pool, LineupError, Roster, Side};
use crate::game::state::{
    GameConfig, GamePhase, GameSession, HalfInning, PendingRoll, RollPurpose, SessionSnapshot,
};
use crate::game::transcript::{GameTranscript, TranscriptEntry};
use crate::game::turn;
use crate::{DIE_SIDES, OUTS_PER_HALF_INNING};

// =============================================================================
// ERRORS
// =============================================================================

/// Unreachable-state diagnostics. Correct phase sequencing never produces
/// these; when one does, it is logged and surfaced rather than recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Rosters were not drawn.
    #[error("no roster for {0:?}")]
    MissingRoster(Side),

    /// Lineup slot empty.
    #[error("no batter in slot {slot} for {side:?}")]
    MissingBatter {
        /// Batting side.
        side: Side,
        /// Slot.
        slot: usize,
    },

    /// Offense roll arrived without a defense result.
    #[error("offense roll with no advantage recorded")]
    MissingAdvantage,

    /// Outcome chart miss.
    #[error(transparent)]
    Chart(#[from] ChartError),

    /// Lineup draw failed.
    #[error(transparent)]
    Lineup(#[from] LineupError),

    /// Optional action had no runner to act on.
    #[error(transparent)]
    OptionalAction(#[from] OptionalActionError),
}

/// Error from the machine's public API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    /// Illegal command; the session is unchanged.
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Logic error while applying an accepted command.
    #[error("fatal: {0}")]
    Fatal(#[from] GameError),
}

impl MachineError {
    /// Was the command simply refused?
    pub fn is_rejection(&self) -> bool {
        matches!(self, MachineError::Rejected(_))
    }
}

// =============================================================================
// MACHINE
// =============================================================================

/// Owns a session, the card pool it draws from and the log of everything it
/// accepted.
#[derive(Debug)]
pub struct GameMachine {
    session: GameSession,
    pool: Arc<CardPool>,
    log: Vec<TranscriptEntry>,
}

impl GameMachine {
    /// Create a machine waiting for players. Fails if the pool cannot field
    /// two teams.
    pub fn new(
        game_id: [u8; 16],
        rng_seed: u64,
        config: GameConfig,
        pool: Arc<CardPool>,
    ) -> Result<Self, LineupError> {
        check_pool(&pool)?;
        Ok(Self {
            session: GameSession::new(game_id, rng_seed, config),
            pool,
            log: Vec::new(),
        })
    }

    /// Current session.
    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.session.phase
    }

    /// Card pool.
    pub fn pool(&self) -> &Arc<CardPool> {
        &self.pool
    }

    /// Read model for observers.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Current state hash.
    pub fn state_hash(&self) -> StateHash {
        self.session.compute_hash()
    }

    /// Outstanding roll.
    pub fn pending_roll(&self) -> Option<PendingRoll> {
        self.session.pending_roll
    }

    /// Is the game finished?
    pub fn is_over(&self) -> bool {
        self.session.phase == GamePhase::GameOver
    }

    /// Drain events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        self.session.take_events()
    }

    /// Accepted inputs so far.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.log
    }

    /// Transcript of the game so far.
    pub fn transcript(&self) -> GameTranscript {
        GameTranscript::new(
            self.session.game_id,
            self.session.rng_seed,
            self.session.config.clone(),
            self.log.clone(),
            self.state_hash(),
        )
    }

    /// Start over with a fresh session (rematch). Pending events survive so
    /// observers still see how the last game ended.
    pub fn reset(&mut self, rng_seed: u64) {
        let events = self.session.take_events();
        let from = self.session.phase;
        let game_id = self.session.game_id;
        let config = self.session.config.clone();

        self.session = GameSession::new(game_id, rng_seed, config);
        self.session.pending_events = events;
        self.log.clear();

        self.session.push_event(GameEventData::PhaseChanged { from, to: GamePhase::WaitingForPlayers });
        info!(seed = rng_seed, "Game reset");
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Validate and apply a command.
    #[instrument(level = "debug", skip(self), fields(seq = self.session.sequence))]
    pub fn handle(&mut self, issuer: Issuer, command: Command) -> Result<CommandOutcome, MachineError> {
        if let Err(rejection) = self.validate(issuer, &command) {
            debug!(command = command.name(), ?issuer, %rejection, "Command rejected");
            return Err(rejection.into());
        }

        self.session.sequence += 1;
        self.log.push(TranscriptEntry::Command { issuer, command: command.clone() });

        let outcome = self.apply(command).and_then(|outcome| {
            self.advance()?;
            Ok(outcome)
        });
        outcome.map_err(|err| self.fatal(err))
    }

    /// Deliver the result of an outstanding roll.
    pub fn deliver_roll(&mut self, request_id: u64, value: u8) -> Result<(), MachineError> {
        let pending = self.check_roll(request_id)?;
        let roll = DieRoll::new(value).map_err(Rejection::from)?;

        self.session.sequence += 1;
        self.log.push(TranscriptEntry::Roll { request_id, value });
        self.session.pending_roll = None;

        let result = match pending.purpose {
            RollPurpose::Defense => self.resolve_defense_roll(roll),
            RollPurpose::Offense => self.resolve_offense_roll(roll),
            RollPurpose::OptionalAction(kind) => self.resolve_optional_roll(kind, pending.side, roll),
        };
        result
            .and_then(|()| self.advance())
            .map_err(|err| self.fatal(err))
    }

    /// Abandon an outstanding roll. The acting side may request it again.
    pub fn cancel_roll(&mut self, request_id: u64) -> Result<(), Rejection> {
        let pending = self.check_roll(request_id)?;

        self.session.sequence += 1;
        self.log.push(TranscriptEntry::Cancel { request_id });
        self.session.pending_roll = None;

        self.session.push_event(GameEventData::Message {
            text: format!("{:?} roll cancelled; roll again", pending.side),
        });
        debug!(request_id, "Roll cancelled");
        Ok(())
    }

    fn check_roll(&self, request_id: u64) -> Result<PendingRoll, Rejection> {
        let pending = self.session.pending_roll.ok_or(Rejection::NoPendingRoll)?;
        if pending.request_id != request_id {
            return Err(Rejection::UnknownRollRequest { got: request_id, expected: pending.request_id });
        }
        Ok(pending)
    }

    fn fatal(&self, err: GameError) -> MachineError {
        error!(phase = ?self.session.phase, %err, "Game logic error");
        MachineError::Fatal(err)
    }

    /// Phase and authority checks. Never mutates.
    fn validate(&self, issuer: Issuer, command: &Command) -> Result<(), Rejection> {
        let phase = self.session.phase;
        if phase == GamePhase::GameOver {
            return Err(Rejection::GameOver);
        }
        let wrong_phase = || Rejection::WrongPhase { command: command.name(), phase };

        match command {
            Command::StartGame { .. } => {
                if phase != GamePhase::WaitingForPlayers {
                    return Err(wrong_phase());
                }
                if issuer != Issuer::Host {
                    return Err(Rejection::NotHost("start the game"));
                }
            }
            Command::SubmitTeamRoll { side, roll } => {
                if phase != GamePhase::RollForTeamAssignment {
                    return Err(wrong_phase());
                }
                if let Issuer::Seat(seat) = issuer {
                    if seat != *side {
                        return Err(Rejection::NotYourTurn(seat));
                    }
                }
                DieRoll::new(*roll)?;
                if self.session.team_rolls[*side as usize].is_some() {
                    return Err(Rejection::AlreadyRolled(*side));
                }
            }
            Command::RollRequested => {
                if !matches!(phase, GamePhase::DefenseTurn | GamePhase::OffenseTurn) {
                    return Err(wrong_phase());
                }
                self.check_turn(issuer, command)?;
                self.check_no_pending_roll()?;
            }
            Command::AttemptOptionalAction | Command::DeclineOptionalAction => {
                if phase != GamePhase::OptionalAction {
                    return Err(wrong_phase());
                }
                self.check_turn(issuer, command)?;
                self.check_no_pending_roll()?;
            }
        }
        Ok(())
    }

    fn check_turn(&self, issuer: Issuer, command: &Command) -> Result<Side, Rejection> {
        let acting = turn::acting_side(&self.session.turn_context()).ok_or(Rejection::WrongPhase {
            command: command.name(),
            phase: self.session.phase,
        })?;
        match issuer {
            Issuer::Host => Ok(acting),
            Issuer::Seat(side) if side == acting => Ok(acting),
            Issuer::Seat(side) => Err(Rejection::NotYourTurn(side)),
        }
    }

    fn check_no_pending_roll(&self) -> Result<(), Rejection> {
        match self.session.pending_roll {
            Some(pending) => Err(Rejection::RollPending(pending.request_id)),
            None => Ok(()),
        }
    }

    fn apply(&mut self, command: Command) -> Result<CommandOutcome, GameError> {
        match command {
            Command::StartGame { vs_cpu, cpu_is_home } => {
                self.session.vs_cpu = vs_cpu;
                self.session.cpu_is_home = cpu_is_home;
                info!(vs_cpu, cpu_is_home, "Game starting");
                self.transition(GamePhase::RollForTeamAssignment);
                Ok(CommandOutcome::Applied)
            }
            Command::SubmitTeamRoll { side, roll } => {
                self.session.team_rolls[side as usize] = Some(roll);
                self.settle_team_rolls();
                Ok(CommandOutcome::Applied)
            }
            Command::RollRequested => {
                let purpose = if self.session.phase == GamePhase::DefenseTurn {
                    RollPurpose::Defense
                } else {
                    RollPurpose::Offense
                };
                Ok(CommandOutcome::RollRequested(self.request_roll(purpose)))
            }
            Command::AttemptOptionalAction => {
                let purpose = RollPurpose::OptionalAction(self.session.pending_action);
                Ok(CommandOutcome::RollRequested(self.request_roll(purpose)))
            }
            Command::DeclineOptionalAction => {
                let action = self.session.pending_action;
                self.session.pending_action = OptionalActionKind::None;
                self.session.push_event(GameEventData::Message {
                    text: format!("{} declined", action.label()),
                });
                self.transition(GamePhase::UpdateBaseRunners);
                Ok(CommandOutcome::Applied)
            }
        }
    }

    fn request_roll(&mut self, purpose: RollPurpose) -> RollRequest {
        let side = self.session.decision_side.unwrap_or_else(|| self.session.batting_side());
        let request_id = self.session.next_request_id;
        self.session.next_request_id += 1;
        self.session.pending_roll = Some(PendingRoll { request_id, purpose, side });
        self.session.push_event(GameEventData::RollRequested { request_id, purpose, side });
        RollRequest { request_id, sides: DIE_SIDES, purpose, side }
    }

    fn settle_team_rolls(&mut self) {
        let [Some(away), Some(home)] = self.session.team_rolls else {
            return;
        };
        if away == home {
            self.session.team_rolls = [None, None];
            self.session.push_event(GameEventData::Message {
                text: format!("Both seats rolled {away}; roll again"),
            });
            return;
        }

        // Higher roll bats last.
        let swapped = away > home;
        if swapped && self.session.vs_cpu {
            self.session.cpu_is_home = !self.session.cpu_is_home;
        }
        self.session.push_event(GameEventData::TeamsAssigned { swapped });
        info!(away, home, swapped, "Teams assigned");
        self.transition(GamePhase::SetLineups);
    }

    // =========================================================================
    // ROLL RESOLUTION
    // =========================================================================

    fn resolve_defense_roll(&mut self, roll: DieRoll) -> Result<(), GameError> {
        let batting = self.session.batting_side();
        let fielding = self.session.fielding_side();

        let on_base = self.current_batter(batting)?.on_base;
        let control = self.roster(fielding)?.pitcher.control;
        let advantage = at_bat::resolve_defense(roll, control, on_base);

        self.session.last_defense_roll = Some(roll.value());
        self.session.last_offense_roll = None;
        self.session.advantage = Some(advantage);
        self.session.push_event(GameEventData::DefenseResolved { roll: roll.value(), advantage });
        debug!(roll = roll.value(), control, on_base, ?advantage, "Defense resolved");

        self.transition(GamePhase::OffenseTurn);
        Ok(())
    }

    fn resolve_offense_roll(&mut self, roll: DieRoll) -> Result<(), GameError> {
        let advantage = self.session.advantage.ok_or(GameError::MissingAdvantage)?;
        let batting = self.session.batting_side();

        let (batters, fielders) = self
            .session
            .rosters_mut(batting)
            .ok_or(GameError::MissingRoster(batting))?;
        let slot = batters.batting_index();
        let batter = batters
            .batter_mut(slot)
            .ok_or(GameError::MissingBatter { side: batting, slot })?;
        let outcome = at_bat::resolve_offense(roll, advantage, batter, &mut fielders.pitcher)?;
        let text = format!("{}: {}", batter.name, outcome.label());

        self.session.last_offense_roll = Some(roll.value());
        self.session.last_outcome = outcome;
        self.session.push_event(GameEventData::Message { text });

        self.transition(GamePhase::AtBatAction);
        Ok(())
    }

    fn resolve_optional_roll(
        &mut self,
        kind: OptionalActionKind,
        side: Side,
        roll: DieRoll,
    ) -> Result<(), GameError> {
        let batting = self.session.batting_side();
        let fielding = self.session.fielding_side();
        let defense = self.roster(fielding)?.fielding;

        let result = optional::resolve(kind, roll, &mut self.session.bases, &defense)?;

        if result.extra_outs > 0 {
            self.add_outs(result.extra_outs);
        }
        // Runs don't count on a play whose out ends the half-inning.
        let inning_over = self.session.last_outcome.is_out()
            && self.session.outs + 1 >= OUTS_PER_HALF_INNING;
        let runs = if inning_over { 0 } else { result.runs.count() };
        if !inning_over {
            // A stolen base is not batted in.
            let batted_in = kind != OptionalActionKind::StolenBase;
            self.credit_runs(batting, &result.runs, batted_in)?;
        }

        self.session.push_event(GameEventData::OptionalActionResolved {
            action: kind,
            success: result.success,
            runs,
        });
        info!(action = kind.label(), ?side, roll = roll.value(), success = result.success, "Optional action");

        self.session.pending_action = OptionalActionKind::None;
        self.transition(GamePhase::UpdateBaseRunners);
        Ok(())
    }

    // =========================================================================
    // AUTOMATIC PHASES
    // =========================================================================

    /// Run automatic phases until input is needed.
    fn advance(&mut self) -> Result<(), GameError> {
        loop {
            match self.session.phase {
                GamePhase::RollForTeamAssignment if !self.session.config.team_roll_contest => {
                    self.transition(GamePhase::SetLineups);
                }
                GamePhase::SetLineups => self.set_lineups()?,
                GamePhase::StartGame => self.start_game()?,
                GamePhase::AtBatAction => self.at_bat_action(),
                GamePhase::UpdateBaseRunners => self.update_base_runners()?,
                GamePhase::NextBatterUp => self.next_batter_up()?,
                GamePhase::EndHalfInning => self.end_half_inning()?,
                GamePhase::NewHalfInning => self.new_half_inning()?,
                _ => return Ok(()),
            }
        }
    }

    fn set_lineups(&mut self) -> Result<(), GameError> {
        let (away, home) = build_lineups(&self.pool, &mut self.session.rng)?;
        info!(away_pitcher = %away.pitcher.name, home_pitcher = %home.pitcher.name, "Lineups set");
        self.session.away = Some(away);
        self.session.home = Some(home);
        self.transition(GamePhase::StartGame);
        Ok(())
    }

    fn start_game(&mut self) -> Result<(), GameError> {
        self.session.inning = 1;
        self.session.half = HalfInning::Top;
        self.session.outs = 0;
        self.session.bases.clear_bases();
        self.session.push_event(GameEventData::Message { text: "Play ball!".into() });
        self.announce_half_inning()?;
        self.transition(GamePhase::DefenseTurn);
        Ok(())
    }

    fn at_bat_action(&mut self) {
        let s = &self.session;
        let action = optional::eligible_action(s.last_outcome, &s.bases, s.outs);
        self.session.pending_action = action;

        if action == OptionalActionKind::None {
            self.transition(GamePhase::UpdateBaseRunners);
            return;
        }
        self.transition(GamePhase::OptionalAction);
        if let Some(side) = self.session.decision_side {
            self.session.push_event(GameEventData::OptionalActionAvailable { action, side });
        }
    }

    fn update_base_runners(&mut self) -> Result<(), GameError> {
        let batting = self.session.batting_side();
        let outcome = self.session.last_outcome;

        let slot = self.roster(batting)?.batting_index();
        let card = self.current_batter(batting)?;
        let runner = Runner { card_id: card.id, speed: card.speed, lineup_slot: slot };

        let runs = self.session.bases.process(outcome, runner);
        self.credit_runs(batting, &runs, true)?;
        if outcome.is_out() {
            self.add_outs(1);
        }

        self.session.push_event(GameEventData::AtBatEnded { side: batting, outcome, runs: runs.count() });
        info!(
            inning = self.session.inning,
            ?batting,
            outcome = outcome.label(),
            runs = runs.count(),
            outs = self.session.outs,
            "At-bat complete"
        );

        if self.is_walk_off() {
            self.session.push_event(GameEventData::Message { text: "Walk-off!".into() });
            self.transition(GamePhase::EndHalfInning);
        } else if self.session.outs >= OUTS_PER_HALF_INNING {
            self.transition(GamePhase::EndHalfInning);
        } else {
            self.transition(GamePhase::NextBatterUp);
        }
        Ok(())
    }

    fn next_batter_up(&mut self) -> Result<(), GameError> {
        let batting = self.session.batting_side();
        let slot = self.roster_mut(batting)?.advance_batter();
        self.session.push_event(GameEventData::AtBatStarted { side: batting, batter_index: slot });
        self.transition(GamePhase::DefenseTurn);
        Ok(())
    }

    fn end_half_inning(&mut self) -> Result<(), GameError> {
        let batting = self.session.batting_side();
        let fielding = self.session.fielding_side();

        // Next time up, the order resumes after the last batter.
        self.roster_mut(batting)?.advance_batter();
        self.roster_mut(fielding)?.pitcher.stats.innings_pitched += 1;

        self.session.bases.clear_bases();
        self.session.outs = 0;
        self.session.pending_action = OptionalActionKind::None;
        self.session.push_event(GameEventData::OutsChanged { outs: 0 });
        info!(
            inning = self.session.inning,
            half = ?self.session.half,
            away = self.session.away_score,
            home = self.session.home_score,
            "Half-inning over"
        );

        if self.game_is_decided() {
            self.finish_game();
            return Ok(());
        }

        match self.session.half {
            HalfInning::Top => self.session.half = HalfInning::Bottom,
            HalfInning::Bottom => {
                self.session.half = HalfInning::Top;
                self.session.inning += 1;
            }
        }
        self.transition(GamePhase::NewHalfInning);
        Ok(())
    }

    fn new_half_inning(&mut self) -> Result<(), GameError> {
        self.announce_half_inning()?;
        self.transition(GamePhase::DefenseTurn);
        Ok(())
    }

    fn announce_half_inning(&mut self) -> Result<(), GameError> {
        let batting = self.session.batting_side();
        let inning = self.session.inning;
        let batter_index = self.roster(batting)?.batting_index();

        self.session.line_score.open_inning(batting, inning);
        self.session.push_event(GameEventData::InningChanged { inning, half: self.session.half });
        self.session.push_event(GameEventData::AtBatStarted { side: batting, batter_index });
        Ok(())
    }

    fn finish_game(&mut self) {
        let winner = self.session.leader();
        let (away, home) = (self.session.away_score, self.session.home_score);
        self.transition(GamePhase::GameOver);
        self.session.push_event(GameEventData::GameOver { winner, away, home });
        info!(?winner, away, home, innings = self.session.inning, "Game over");
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Home took the lead in the bottom of a final (or extra) inning.
    fn is_walk_off(&self) -> bool {
        let s = &self.session;
        s.half == HalfInning::Bottom
            && s.inning >= s.config.scheduled_innings
            && s.home_score > s.away_score
    }

    /// Checked at the end of each half-inning.
    fn game_is_decided(&self) -> bool {
        let s = &self.session;
        if s.inning < s.config.scheduled_innings {
            return false;
        }
        match s.half {
            // Home leads; the bottom half is not needed.
            HalfInning::Top => s.home_score > s.away_score,
            HalfInning::Bottom => s.home_score != s.away_score,
        }
    }

    fn add_outs(&mut self, outs: u8) {
        self.session.outs = (self.session.outs + outs).min(OUTS_PER_HALF_INNING);
        self.session.push_event(GameEventData::OutsChanged { outs: self.session.outs });
    }

    /// Credit runners, the batter's RBIs and the pitcher's earned runs, then
    /// the team total.
    fn credit_runs(&mut self, batting: Side, runs: &RunsScored, batted_in: bool) -> Result<(), GameError> {
        let count = runs.count();
        if count == 0 {
            return Ok(());
        }

        let (batters, fielders) = self
            .session
            .rosters_mut(batting)
            .ok_or(GameError::MissingRoster(batting))?;
        for runner in runs.runners() {
            if let Some(card) = batters.batter_mut(runner.lineup_slot) {
                card.stats.runs += 1;
            }
        }
        if batted_in {
            let slot = batters.batting_index();
            if let Some(card) = batters.batter_mut(slot) {
                card.stats.rbis += count;
            }
        }
        fielders.pitcher.stats.earned_runs += count;

        self.session.add_runs(batting, count);
        let (away, home) = (self.session.away_score, self.session.home_score);
        self.session.push_event(GameEventData::ScoreChanged { away, home });
        Ok(())
    }

    fn transition(&mut self, to: GamePhase) {
        let from = self.session.phase;
        self.session.phase = to;
        self.session.decision_side = turn::acting_side(&self.session.turn_context());
        self.session.push_event(GameEventData::PhaseChanged { from, to });
        debug!(?from, ?to, "Phase changed");
    }

    fn roster(&self, side: Side) -> Result<&Roster, GameError> {
        self.session.roster(side).ok_or(GameError::MissingRoster(side))
    }

    fn roster_mut(&mut self, side: Side) -> Result<&mut Roster, GameError> {
        self.session.roster_mut(side).ok_or(GameError::MissingRoster(side))
    }

    fn current_batter(&self, side: Side) -> Result<&BatterCard, GameError> {
        let roster = self.roster(side)?;
        let slot = roster.batting_index();
        roster.batter(slot).ok_or(GameError::MissingBatter { side, slot })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::{AtBatOutcome, CardId, OutcomeChart};
    use crate::game::bases::{Base, Runner};

    /// Pool whose every card produces a single outcome, so tests can steer
    /// at-bats by choosing the advantage.
    fn pool_with(batter_widths: [u8; 8], pitcher_widths: [u8; 8]) -> Arc<CardPool> {
        let mut pool = CardPool::builtin();
        for card in &mut pool.batters {
            card.chart = OutcomeChart::from_widths(batter_widths).unwrap();
            card.on_base = 10;
            card.speed = 10;
        }
        for card in &mut pool.pitchers {
            card.chart = OutcomeChart::from_widths(pitcher_widths).unwrap();
            card.control = 0;
        }
        Arc::new(pool)
    }

    const ALL_SINGLES: [u8; 8] = [0, 0, 0, 0, 20, 0, 0, 0];
    const ALL_STRIKEOUTS: [u8; 8] = [20, 0, 0, 0, 0, 0, 0, 0];
    const ALL_FLYOUTS: [u8; 8] = [0, 0, 20, 0, 0, 0, 0, 0];
    const ALL_GROUNDOUTS: [u8; 8] = [0, 20, 0, 0, 0, 0, 0, 0];
    const ALL_HOMERS: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 20];

    // on_base 10, control 0: a defense roll of 10 or less favors the batter.
    const BATTER_ROLL: u8 = 5;
    const PITCHER_ROLL: u8 = 15;

    fn started(pool: Arc<CardPool>) -> GameMachine {
        let mut machine = GameMachine::new([1; 16], 42, GameConfig::default(), pool).unwrap();
        machine
            .handle(Issuer::Host, Command::StartGame { vs_cpu: false, cpu_is_home: false })
            .unwrap();
        machine
    }

    fn roll(machine: &mut GameMachine, value: u8) {
        let request = match machine.handle(Issuer::Host, Command::RollRequested).unwrap() {
            CommandOutcome::RollRequested(request) => request,
            other => panic!("expected roll request, got {other:?}"),
        };
        machine.deliver_roll(request.request_id, value).unwrap();
    }

    /// Defense roll then offense roll.
    fn at_bat(machine: &mut GameMachine, defense: u8) {
        roll(machine, defense);
        roll(machine, 10);
    }

    #[test]
    fn test_start_reaches_defense_turn() {
        let mut machine = started(Arc::new(CardPool::builtin()));
        let s = machine.session();

        assert_eq!(s.phase, GamePhase::DefenseTurn);
        assert_eq!(s.inning, 1);
        assert_eq!(s.half, HalfInning::Top);
        assert!(s.away.is_some() && s.home.is_some());
        assert_eq!(s.decision_side, Some(Side::Home));

        let phases: Vec<GamePhase> = machine
            .take_events()
            .into_iter()
            .filter_map(|e| match e.data {
                GameEventData::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                GamePhase::RollForTeamAssignment,
                GamePhase::SetLineups,
                GamePhase::StartGame,
                GamePhase::DefenseTurn,
            ]
        );
    }

    #[test]
    fn test_three_outs_end_half_inning() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_FLYOUTS));

        at_bat(&mut machine, PITCHER_ROLL);
        assert_eq!(machine.session().outs, 1);
        assert_eq!(machine.phase(), GamePhase::DefenseTurn);
        at_bat(&mut machine, PITCHER_ROLL);
        assert_eq!(machine.session().outs, 2);
        machine.take_events();

        at_bat(&mut machine, PITCHER_ROLL);
        let events = machine.take_events();
        assert!(events.iter().any(|e| e.data == GameEventData::OutsChanged { outs: 3 }));
        assert!(events.iter().any(|e| matches!(
            e.data,
            GameEventData::PhaseChanged { to: GamePhase::EndHalfInning, .. }
        )));

        let s = machine.session();
        assert_eq!(s.outs, 0);
        assert!(s.bases.is_empty());
        assert_eq!(s.half, HalfInning::Bottom);
        assert_eq!(s.phase, GamePhase::DefenseTurn);
        assert_eq!(s.decision_side, Some(Side::Away));
        // Fourth batter leads off next time
        assert_eq!(s.away.as_ref().unwrap().batting_index(), 3);
        assert_eq!(s.home.as_ref().unwrap().pitcher.stats.innings_pitched, 1);
    }

    #[test]
    fn test_hits_score_runs() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_FLYOUTS));
        for _ in 0..4 {
            at_bat(&mut machine, BATTER_ROLL);
        }

        let s = machine.session();
        assert_eq!(s.away_score, 1);
        assert!(s.bases.is_loaded());
        assert_eq!(s.line_score.away, vec![1]);
        assert_eq!(s.home.as_ref().unwrap().pitcher.stats.earned_runs, 1);
        assert_eq!(s.home.as_ref().unwrap().pitcher.stats.hits_allowed, 4);

        let away = s.away.as_ref().unwrap();
        assert_eq!(away.batter(3).unwrap().stats.rbis, 1);
        assert_eq!(away.batter(0).unwrap().stats.runs, 1);
    }

    #[test]
    fn test_wrong_side_is_rejected_without_change() {
        let mut machine = started(Arc::new(CardPool::builtin()));
        machine.take_events();
        let before = machine.state_hash();

        let err = machine.handle(Issuer::Seat(Side::Away), Command::RollRequested).unwrap_err();
        assert_eq!(err, MachineError::Rejected(Rejection::NotYourTurn(Side::Away)));

        let err = machine.handle(Issuer::Host, Command::DeclineOptionalAction).unwrap_err();
        assert!(err.is_rejection());

        assert_eq!(machine.state_hash(), before);
        assert!(machine.take_events().is_empty());
        assert!(machine.handle(Issuer::Seat(Side::Home), Command::RollRequested).is_ok());
    }

    #[test]
    fn test_second_roll_request_rejected_while_pending() {
        let mut machine = started(Arc::new(CardPool::builtin()));
        let first = machine.handle(Issuer::Host, Command::RollRequested).unwrap();
        let CommandOutcome::RollRequested(request) = first else {
            panic!("expected roll request");
        };

        let err = machine.handle(Issuer::Host, Command::RollRequested).unwrap_err();
        assert_eq!(err, MachineError::Rejected(Rejection::RollPending(request.request_id)));

        let err = machine.deliver_roll(request.request_id + 1, 10).unwrap_err();
        assert!(matches!(err, MachineError::Rejected(Rejection::UnknownRollRequest { .. })));

        let err = machine.deliver_roll(request.request_id, 21).unwrap_err();
        assert!(matches!(err, MachineError::Rejected(Rejection::InvalidRoll(_))));

        machine.deliver_roll(request.request_id, 10).unwrap();
        assert_eq!(machine.phase(), GamePhase::OffenseTurn);
    }

    #[test]
    fn test_cancelled_roll_can_be_reissued() {
        let mut machine = started(Arc::new(CardPool::builtin()));
        let CommandOutcome::RollRequested(request) =
            machine.handle(Issuer::Host, Command::RollRequested).unwrap()
        else {
            panic!("expected roll request");
        };

        machine.cancel_roll(request.request_id).unwrap();
        assert_eq!(machine.phase(), GamePhase::DefenseTurn);
        assert!(machine.pending_roll().is_none());
        assert_eq!(machine.cancel_roll(request.request_id), Err(Rejection::NoPendingRoll));

        let again = machine.handle(Issuer::Host, Command::RollRequested).unwrap();
        assert!(matches!(again, CommandOutcome::RollRequested(r) if r.request_id == request.request_id + 1));
    }

    #[test]
    fn test_decline_twice_is_noop() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_GROUNDOUTS));
        at_bat(&mut machine, BATTER_ROLL);
        at_bat(&mut machine, PITCHER_ROLL);

        assert_eq!(machine.phase(), GamePhase::OptionalAction);
        assert_eq!(machine.session().pending_action, OptionalActionKind::DoublePlay);
        assert_eq!(machine.session().decision_side, Some(Side::Home));

        machine.handle(Issuer::Seat(Side::Home), Command::DeclineOptionalAction).unwrap();
        assert_eq!(machine.phase(), GamePhase::DefenseTurn);
        assert_eq!(machine.session().outs, 1);

        let before = machine.state_hash();
        let err = machine.handle(Issuer::Seat(Side::Home), Command::DeclineOptionalAction).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(machine.state_hash(), before);
    }

    #[test]
    fn test_double_play_turned() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_GROUNDOUTS));
        at_bat(&mut machine, BATTER_ROLL);
        at_bat(&mut machine, PITCHER_ROLL);
        machine.session.home.as_mut().unwrap().fielding.infield = 5;

        let CommandOutcome::RollRequested(request) =
            machine.handle(Issuer::Seat(Side::Home), Command::AttemptOptionalAction).unwrap()
        else {
            panic!("expected roll request");
        };
        // 5 + 15 = 20 is not enough against speed 10 + 10; 5 + 16 is
        machine.deliver_roll(request.request_id, 16).unwrap();

        let s = machine.session();
        assert_eq!(s.outs, 2);
        assert!(!s.bases.is_occupied(Base::First));
        assert_eq!(s.phase, GamePhase::DefenseTurn);
    }

    #[test]
    fn test_tag_up_scores_runner() {
        let mut machine = started(pool_with(ALL_HOMERS, ALL_FLYOUTS));
        // Triple puts a runner on third: use a custom chart for the leadoff man
        machine.session.away.as_mut().unwrap().batter_mut(0).unwrap().chart =
            OutcomeChart::from_widths([0, 0, 0, 0, 0, 0, 20, 0]).unwrap();
        at_bat(&mut machine, BATTER_ROLL);
        assert!(machine.session().bases.is_occupied(Base::Third));

        at_bat(&mut machine, PITCHER_ROLL);
        assert_eq!(machine.session().pending_action, OptionalActionKind::TagUp);
        assert_eq!(machine.session().decision_side, Some(Side::Away));
        machine.session.home.as_mut().unwrap().fielding.outfield = 3;

        let CommandOutcome::RollRequested(request) =
            machine.handle(Issuer::Seat(Side::Away), Command::AttemptOptionalAction).unwrap()
        else {
            panic!("expected roll request");
        };
        // speed 10 + 4 > outfield 3 + 10
        machine.deliver_roll(request.request_id, 4).unwrap();

        let s = machine.session();
        assert_eq!(s.away_score, 1);
        assert_eq!(s.outs, 1);
        assert!(s.bases.is_empty());
        assert_eq!(s.away.as_ref().unwrap().batter(1).unwrap().stats.rbis, 1);
    }

    #[test]
    fn test_strikeout_offers_steal() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_STRIKEOUTS));
        at_bat(&mut machine, BATTER_ROLL);
        at_bat(&mut machine, PITCHER_ROLL);

        assert_eq!(machine.session().last_outcome, AtBatOutcome::Strikeout);
        assert_eq!(machine.session().pending_action, OptionalActionKind::StolenBase);
        assert_eq!(machine.session().decision_side, Some(Side::Away));
    }

    fn put_runner(machine: &mut GameMachine, base: Base, slot: usize) {
        let runner = Runner { card_id: CardId(900 + slot as u32), speed: 10, lineup_slot: slot };
        machine.session.bases.place(base, runner).unwrap();
    }

    fn attempt(machine: &mut GameMachine, side: Side, value: u8) {
        let CommandOutcome::RollRequested(request) =
            machine.handle(Issuer::Seat(side), Command::AttemptOptionalAction).unwrap()
        else {
            panic!("expected roll request");
        };
        machine.deliver_roll(request.request_id, value).unwrap();
    }

    #[test]
    fn test_steal_from_second_scores_runner_on_third() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_STRIKEOUTS));
        put_runner(&mut machine, Base::Second, 5);
        put_runner(&mut machine, Base::Third, 6);
        machine.session.home.as_mut().unwrap().fielding.catcher = 0;

        at_bat(&mut machine, PITCHER_ROLL);
        assert_eq!(machine.session().pending_action, OptionalActionKind::StolenBase);

        // speed 10 + 5 > catcher 0 + 10
        attempt(&mut machine, Side::Away, 5);

        let s = machine.session();
        assert_eq!(s.away_score, 1);
        assert_eq!(s.outs, 1);
        assert_eq!(s.bases.runner(Base::Third).map(|r| r.lineup_slot), Some(5));
        assert!(!s.bases.is_occupied(Base::Second));
        let away = s.away.as_ref().unwrap();
        assert_eq!(away.batter(6).unwrap().stats.runs, 1);
        assert_eq!(away.batter(0).unwrap().stats.rbis, 0);
    }

    #[test]
    fn test_caught_stealing_with_bases_loaded() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_STRIKEOUTS));
        put_runner(&mut machine, Base::First, 4);
        put_runner(&mut machine, Base::Second, 5);
        put_runner(&mut machine, Base::Third, 6);
        machine.session.home.as_mut().unwrap().fielding.catcher = 20;

        at_bat(&mut machine, PITCHER_ROLL);
        assert_eq!(machine.session().pending_action, OptionalActionKind::StolenBase);
        attempt(&mut machine, Side::Away, 1);

        let s = machine.session();
        assert_eq!(s.outs, 2);
        assert_eq!(s.away_score, 0);
        assert!(s.bases.is_occupied(Base::First));
        assert!(!s.bases.is_occupied(Base::Second));
        assert!(s.bases.is_occupied(Base::Third));
    }

    #[test]
    fn test_no_tag_up_on_third_out() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_FLYOUTS));
        put_runner(&mut machine, Base::Third, 6);
        machine.session.outs = 2;

        at_bat(&mut machine, PITCHER_ROLL);

        let s = machine.session();
        assert_eq!(s.away_score, 0);
        assert_eq!(s.half, HalfInning::Bottom);
        assert_eq!(s.phase, GamePhase::DefenseTurn);
        assert!(s.bases.is_empty());
    }

    #[test]
    fn test_steal_run_void_when_strikeout_ends_inning() {
        let mut machine = started(pool_with(ALL_SINGLES, ALL_STRIKEOUTS));
        put_runner(&mut machine, Base::Second, 5);
        put_runner(&mut machine, Base::Third, 6);
        machine.session.outs = 2;
        machine.session.home.as_mut().unwrap().fielding.catcher = 0;

        at_bat(&mut machine, PITCHER_ROLL);
        assert_eq!(machine.session().pending_action, OptionalActionKind::StolenBase);
        machine.take_events();
        attempt(&mut machine, Side::Away, 20);

        let events = machine.take_events();
        assert!(events.iter().any(|e| matches!(
            e.data,
            GameEventData::OptionalActionResolved { success: true, runs: 0, .. }
        )));
        let s = machine.session();
        assert_eq!(s.away_score, 0);
        assert_eq!(s.half, HalfInning::Bottom);
    }

    /// Drive a whole game where every at-bat is an out except the ones
    /// `homer` picks (all-homer batters, all-flyout pitchers).
    fn play_out(machine: &mut GameMachine, mut homer: impl FnMut(&GameSession) -> bool) {
        let mut guard = 0;
        while !machine.is_over() {
            guard += 1;
            assert!(guard < 10_000, "game did not finish");
            match machine.phase() {
                GamePhase::DefenseTurn => {
                    let defense = if homer(machine.session()) { BATTER_ROLL } else { PITCHER_ROLL };
                    roll(machine, defense);
                }
                GamePhase::OffenseTurn => roll(machine, 10),
                GamePhase::OptionalAction => {
                    machine.handle(Issuer::Host, Command::DeclineOptionalAction).unwrap();
                }
                other => panic!("stuck in {other:?}"),
            }
        }
    }

    #[test]
    fn test_scoreless_game_goes_to_extra_innings() {
        let mut machine = started(pool_with(ALL_HOMERS, ALL_FLYOUTS));
        // Nobody scores until the top of the 11th.
        play_out(&mut machine, |s| s.inning == 11 && s.half == HalfInning::Top && s.away_score == 0);

        let s = machine.session();
        assert_eq!(s.inning, 11);
        assert_eq!(s.away_score, 1);
        assert_eq!(s.home_score, 0);
        assert_eq!(s.line_score.away.len(), 11);
        assert_eq!(s.phase, GamePhase::GameOver);
    }

    #[test]
    fn test_home_leading_skips_bottom_of_ninth() {
        let mut machine = started(pool_with(ALL_HOMERS, ALL_FLYOUTS));
        play_out(&mut machine, |s| s.inning == 1 && s.half == HalfInning::Bottom && s.home_score == 0);

        let s = machine.session();
        assert_eq!(s.inning, 9);
        assert_eq!(s.half, HalfInning::Top);
        assert_eq!((s.away_score, s.home_score), (0, 1));

        let err = machine.handle(Issuer::Host, Command::RollRequested).unwrap_err();
        assert_eq!(err, MachineError::Rejected(Rejection::GameOver));
    }

    #[test]
    fn test_walk_off_ends_game_immediately() {
        let mut machine = started(pool_with(ALL_HOMERS, ALL_FLYOUTS));
        play_out(&mut machine, |s| {
            s.inning == 9 && s.half == HalfInning::Bottom && s.outs == 1 && s.home_score == 0
        });

        let s = machine.session();
        assert_eq!((s.away_score, s.home_score), (0, 1));
        assert_eq!(s.half, HalfInning::Bottom);
        assert_eq!(s.inning, 9);
    }

    #[test]
    fn test_team_roll_contest() {
        let config = GameConfig { team_roll_contest: true, ..GameConfig::default() };
        let pool = Arc::new(CardPool::builtin());
        let mut machine = GameMachine::new([2; 16], 9, config, pool).unwrap();
        machine
            .handle(Issuer::Host, Command::StartGame { vs_cpu: true, cpu_is_home: true })
            .unwrap();
        assert_eq!(machine.phase(), GamePhase::RollForTeamAssignment);

        let away = |roll| Command::SubmitTeamRoll { side: Side::Away, roll };
        let home = |roll| Command::SubmitTeamRoll { side: Side::Home, roll };

        // Seat may only roll for itself
        assert!(machine.handle(Issuer::Seat(Side::Home), away(4)).is_err());

        machine.handle(Issuer::Seat(Side::Away), away(12)).unwrap();
        assert_eq!(
            machine.handle(Issuer::Seat(Side::Away), away(3)).unwrap_err(),
            MachineError::Rejected(Rejection::AlreadyRolled(Side::Away))
        );

        // Tie: both re-roll
        machine.handle(Issuer::Seat(Side::Home), home(12)).unwrap();
        assert_eq!(machine.session().team_rolls, [None, None]);
        assert_eq!(machine.phase(), GamePhase::RollForTeamAssignment);

        machine.handle(Issuer::Seat(Side::Away), away(18)).unwrap();
        machine.handle(Issuer::Seat(Side::Home), home(2)).unwrap();
        assert!(machine
            .take_events()
            .iter()
            .any(|e| e.data == GameEventData::TeamsAssigned { swapped: true }));
        assert!(!machine.session().cpu_is_home);
        assert_eq!(machine.phase(), GamePhase::DefenseTurn);
    }

    #[test]
    fn test_start_requires_host_and_waiting_phase() {
        let pool = Arc::new(CardPool::builtin());
        let mut machine = GameMachine::new([3; 16], 1, GameConfig::default(), pool).unwrap();
        let start = Command::StartGame { vs_cpu: false, cpu_is_home: false };

        assert_eq!(
            machine.handle(Issuer::Seat(Side::Away), start.clone()).unwrap_err(),
            MachineError::Rejected(Rejection::NotHost("start the game"))
        );
        machine.handle(Issuer::Host, start.clone()).unwrap();
        assert!(matches!(
            machine.handle(Issuer::Host, start).unwrap_err(),
            MachineError::Rejected(Rejection::WrongPhase { .. })
        ));
    }

    #[test]
    fn test_reset_returns_to_waiting() {
        let mut machine = started(pool_with(ALL_HOMERS, ALL_FLYOUTS));
        play_out(&mut machine, |s| s.inning == 1 && s.half == HalfInning::Top && s.away_score == 0);
        assert!(machine.is_over());

        machine.reset(43);
        assert_eq!(machine.phase(), GamePhase::WaitingForPlayers);
        assert_eq!(machine.session().away_score, 0);
        assert!(machine.entries().is_empty());
        assert!(machine
            .take_events()
            .iter()
            .any(|e| e.data == GameEventData::PhaseChanged {
                from: GamePhase::GameOver,
                to: GamePhase::WaitingForPlayers,
            }));
    }

    #[test]
    fn test_small_pool_rejected() {
        let mut pool = CardPool::builtin();
        pool.pitchers.truncate(1);
        assert!(GameMachine::new([0; 16], 0, GameConfig::default(), Arc::new(pool)).is_err());
    }
}
