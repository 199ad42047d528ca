//! CPU Actor
//!
//! A computer-controlled side. It reads the same snapshot a human client
//! sees and issues the same commands a human would; it never touches the
//! session directly.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::game::bases::Base;
use crate::game::command::{Command, Issuer};
use crate::game::dice::DiceSource;
use crate::game::machine::{GameMachine, MachineError};
use crate::game::optional::{steal_candidate, OptionalActionKind};
use crate::game::roster::Side;
use crate::game::state::{GamePhase, SessionSnapshot};
use crate::{DIE_SIDES, OPTIONAL_ACTION_THRESHOLD};

/// Fixed decision policy for optional actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuPolicy {
    /// Attempt an action when at least this many d20 faces win it.
    pub min_winning_faces: u8,
}

impl Default for CpuPolicy {
    fn default() -> Self {
        Self { min_winning_faces: 10 }
    }
}

/// A CPU-controlled side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuActor {
    /// Side the CPU plays.
    pub side: Side,
    /// Decision policy.
    pub policy: CpuPolicy,
}

impl CpuActor {
    /// CPU with the default policy.
    pub fn new(side: Side) -> Self {
        Self { side, policy: CpuPolicy::default() }
    }

    /// Issuer for this actor's commands.
    pub fn issuer(&self) -> Issuer {
        Issuer::Seat(self.side)
    }

    /// The command this side would issue now, if it is its turn.
    pub fn next_command(&self, snapshot: &SessionSnapshot) -> Option<Command> {
        if snapshot.pending_roll.is_some() || snapshot.acting_side() != Some(self.side) {
            return None;
        }
        match snapshot.phase {
            GamePhase::DefenseTurn | GamePhase::OffenseTurn => Some(Command::RollRequested),
            GamePhase::OptionalAction => {
                let faces = winning_faces(snapshot.pending_action, snapshot);
                if faces >= self.policy.min_winning_faces {
                    Some(Command::AttemptOptionalAction)
                } else {
                    Some(Command::DeclineOptionalAction)
                }
            }
            _ => None,
        }
    }
}

/// Number of d20 faces that win the action on offer for the deciding side.
pub fn winning_faces(kind: OptionalActionKind, snapshot: &SessionSnapshot) -> u8 {
    let fielding = if snapshot.is_top_of_inning() {
        snapshot.home.as_ref()
    } else {
        snapshot.away.as_ref()
    };
    let Some(defense) = fielding.map(|r| r.fielding) else {
        return 0;
    };

    let speed_on = |base: Base| snapshot.bases.runner(base).map(|r| r.speed);

    match kind {
        OptionalActionKind::StolenBase => match steal_candidate(&snapshot.bases).and_then(speed_on) {
            Some(speed) => count_faces(|f| speed + f > defense.catcher + OPTIONAL_ACTION_THRESHOLD),
            None => 0,
        },
        OptionalActionKind::TagUp => match speed_on(Base::Third) {
            Some(speed) => count_faces(|f| speed + f > defense.outfield + OPTIONAL_ACTION_THRESHOLD),
            None => 0,
        },
        OptionalActionKind::DoublePlay => match speed_on(Base::First) {
            Some(speed) => count_faces(|f| defense.infield + f > speed + OPTIONAL_ACTION_THRESHOLD),
            None => 0,
        },
        OptionalActionKind::None => 0,
    }
}

fn count_faces(beats: impl Fn(i32) -> bool) -> u8 {
    (1..=DIE_SIDES as i32).filter(|f| beats(*f)).count() as u8
}

/// Advance a game driven entirely by CPU actors by one input: deliver a
/// pending roll for an actor's side, submit a team-assignment roll, or issue
/// the next actor command.
/// Returns `false` when no actor has anything to do.
pub fn step(
    machine: &mut GameMachine,
    actors: &[CpuActor],
    dice: &mut impl DiceSource,
) -> Result<bool, MachineError> {
    if let Some(pending) = machine.pending_roll() {
        if !actors.iter().any(|a| a.side == pending.side) {
            return Ok(false);
        }
        let value = dice.roll(DIE_SIDES);
        machine.deliver_roll(pending.request_id, value)?;
        return Ok(true);
    }

    if machine.phase() == GamePhase::RollForTeamAssignment {
        for actor in actors {
            if machine.session().team_rolls[actor.side as usize].is_none() {
                let roll = dice.roll(DIE_SIDES);
                machine.handle(actor.issuer(), Command::SubmitTeamRoll { side: actor.side, roll })?;
                return Ok(true);
            }
        }
    }

    let snapshot = machine.snapshot();
    for actor in actors {
        if let Some(command) = actor.next_command(&snapshot) {
            debug!(side = ?actor.side, command = command.name(), "CPU command");
            machine.handle(actor.issuer(), command)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Run [`step`] until the game ends or nobody can move. Returns the number
/// of inputs applied.
pub fn play_out(
    machine: &mut GameMachine,
    actors: &[CpuActor],
    dice: &mut impl DiceSource,
) -> Result<usize, MachineError> {
    let mut steps = 0;
    while !machine.is_over() && step(machine, actors, dice)? {
        steps += 1;
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::rng::DeterministicRng;
    use crate::game::bases::{BaseState, Runner};
    use crate::game::card::{CardId, CardPool};
    use crate::game::state::GameConfig;

    fn new_game(seed: u64) -> GameMachine {
        let pool = Arc::new(CardPool::builtin());
        let mut machine = GameMachine::new([8; 16], seed, GameConfig::default(), pool).unwrap();
        machine
            .handle(Issuer::Host, Command::StartGame { vs_cpu: true, cpu_is_home: true })
            .unwrap();
        machine
    }

    #[test]
    fn test_cpu_acts_only_on_its_turn() {
        let machine = new_game(1);
        let snapshot = machine.snapshot();

        // Top of the first: home pitches
        assert_eq!(CpuActor::new(Side::Home).next_command(&snapshot), Some(Command::RollRequested));
        assert_eq!(CpuActor::new(Side::Away).next_command(&snapshot), None);
    }

    #[test]
    fn test_cpu_waits_for_pending_roll() {
        let mut machine = new_game(1);
        let home = CpuActor::new(Side::Home);
        machine.handle(home.issuer(), Command::RollRequested).unwrap();

        assert_eq!(home.next_command(&machine.snapshot()), None);
    }

    #[test]
    fn test_single_cpu_stops_at_human_turn() {
        let mut machine = new_game(3);
        let mut dice = DeterministicRng::new(3);
        let actors = [CpuActor::new(Side::Home)];

        let steps = play_out(&mut machine, &actors, &mut dice).unwrap();
        // Request and deliver the defense roll, then wait for the away batter
        assert_eq!(steps, 2);
        assert_eq!(machine.phase(), GamePhase::OffenseTurn);
        assert_eq!(machine.session().decision_side, Some(Side::Away));
    }

    #[test]
    fn test_cpu_vs_cpu_game_finishes_and_replays() {
        let mut machine = new_game(2024);
        let mut dice = DeterministicRng::new(2024);
        let actors = [CpuActor::new(Side::Away), CpuActor::new(Side::Home)];

        play_out(&mut machine, &actors, &mut dice).unwrap();

        let s = machine.session();
        assert!(machine.is_over());
        assert_ne!(s.away_score, s.home_score);
        assert!(s.inning >= 9);
        assert_eq!(s.line_score.total(Side::Away), s.away_score);
        assert_eq!(s.line_score.total(Side::Home), s.home_score);

        machine.transcript().verify(Arc::new(CardPool::builtin())).unwrap();
    }

    #[test]
    fn test_cpu_rolls_for_team_assignment() {
        let pool = Arc::new(CardPool::builtin());
        let config = GameConfig { team_roll_contest: true, ..GameConfig::default() };
        let mut machine = GameMachine::new([9; 16], 11, config, pool).unwrap();
        machine
            .handle(Issuer::Host, Command::StartGame { vs_cpu: false, cpu_is_home: false })
            .unwrap();
        assert_eq!(machine.phase(), GamePhase::RollForTeamAssignment);

        // Ties re-roll, so feed a tie first
        let mut dice = crate::game::dice::ScriptedDice::new([7, 7, 15, 4]);
        let actors = [CpuActor::new(Side::Away), CpuActor::new(Side::Home)];
        for _ in 0..4 {
            assert!(step(&mut machine, &actors, &mut dice).unwrap());
        }

        assert_eq!(machine.phase(), GamePhase::DefenseTurn);
        assert_eq!(dice.remaining(), 0);
    }

    #[test]
    fn test_winning_faces() {
        let mut snapshot = new_game(5).snapshot();

        let mut bases = BaseState::new();
        bases
            .place(Base::First, Runner { card_id: CardId(1), speed: 12, lineup_slot: 0 })
            .unwrap();
        snapshot.bases = bases;
        if let Some(home) = snapshot.home.as_mut() {
            home.fielding.catcher = 4;
            home.fielding.infield = 6;
        }

        // 12 + f > 14 for f in 3..=20
        assert_eq!(winning_faces(OptionalActionKind::StolenBase, &snapshot), 18);
        // 6 + f > 22 for f in 17..=20
        assert_eq!(winning_faces(OptionalActionKind::DoublePlay, &snapshot), 4);
        assert_eq!(winning_faces(OptionalActionKind::TagUp, &snapshot), 0);
    }
}
