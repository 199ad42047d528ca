//! Turn/Authority Resolver
//!
//! Decides which side may act in the current phase. Everything here is a
//! pure function of session fields, so the authority, a CPU-assisted local
//! game and a replicated client all reach the same answer.

use serde::{Serialize, Deserialize};

use crate::game::optional::OptionalActionKind;
use crate::game::roster::Side;
use crate::game::state::GamePhase;

/// The session fields turn order depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnContext {
    /// Current phase.
    pub phase: GamePhase,
    /// Top half of the inning (away bats)?
    pub is_top_of_inning: bool,
    /// Action on offer during [`GamePhase::OptionalAction`].
    pub pending_action: OptionalActionKind,
}

/// Side at bat.
#[inline]
pub fn batting_side(is_top_of_inning: bool) -> Side {
    if is_top_of_inning { Side::Away } else { Side::Home }
}

/// Side in the field.
#[inline]
pub fn fielding_side(is_top_of_inning: bool) -> Side {
    batting_side(is_top_of_inning).opposite()
}

/// Side expected to act, or `None` for phases the machine drives itself.
pub fn acting_side(ctx: &TurnContext) -> Option<Side> {
    match ctx.phase {
        GamePhase::DefenseTurn => Some(fielding_side(ctx.is_top_of_inning)),
        GamePhase::OffenseTurn => Some(batting_side(ctx.is_top_of_inning)),
        GamePhase::OptionalAction => match ctx.pending_action {
            OptionalActionKind::StolenBase | OptionalActionKind::TagUp => {
                Some(batting_side(ctx.is_top_of_inning))
            }
            OptionalActionKind::DoublePlay => Some(fielding_side(ctx.is_top_of_inning)),
            OptionalActionKind::None => None,
        },
        _ => None,
    }
}

/// Should the CPU act now?
pub fn cpu_should_act(ctx: &TurnContext, cpu_is_home: bool, is_cpu_game: bool) -> bool {
    is_cpu_game && acting_side(ctx) == Some(Side::from_is_home(cpu_is_home))
}

/// May the local human act now? Outside CPU games the single local player
/// acts for whichever side is up.
pub fn player_may_act(ctx: &TurnContext, cpu_is_home: bool, is_cpu_game: bool) -> bool {
    match acting_side(ctx) {
        Some(side) if is_cpu_game => side != Side::from_is_home(cpu_is_home),
        Some(_) => true,
        None => false,
    }
}

/// Replicated mode: may the participant seated on this side act now?
pub fn may_act(ctx: &TurnContext, local_side_is_home: bool) -> bool {
    acting_side(ctx) == Some(Side::from_is_home(local_side_is_home))
}

/// How a participant's commands reach the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityMode {
    /// This process owns the session and applies commands directly.
    Local {
        /// CPU controls one side.
        vs_cpu: bool,
        /// CPU plays the home side.
        cpu_is_home: bool,
    },
    /// Commands are forwarded to a remote authority; state is observed.
    Replicated {
        /// Side this participant is seated on.
        local_side: Side,
    },
}

impl AuthorityMode {
    /// May the local participant issue a turn command now?
    pub fn local_may_act(&self, ctx: &TurnContext) -> bool {
        match *self {
            AuthorityMode::Local { vs_cpu, cpu_is_home } => player_may_act(ctx, cpu_is_home, vs_cpu),
            AuthorityMode::Replicated { local_side } => may_act(ctx, local_side.is_home()),
        }
    }

    /// Does this participant mutate the session itself?
    pub fn is_authority(&self) -> bool {
        matches!(self, AuthorityMode::Local { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(phase: GamePhase, top: bool) -> TurnContext {
        TurnContext { phase, is_top_of_inning: top, pending_action: OptionalActionKind::None }
    }

    #[test]
    fn test_pitching_and_batting_sides() {
        assert_eq!(acting_side(&ctx(GamePhase::DefenseTurn, true)), Some(Side::Home));
        assert_eq!(acting_side(&ctx(GamePhase::DefenseTurn, false)), Some(Side::Away));
        assert_eq!(acting_side(&ctx(GamePhase::OffenseTurn, true)), Some(Side::Away));
        assert_eq!(acting_side(&ctx(GamePhase::OffenseTurn, false)), Some(Side::Home));
    }

    #[test]
    fn test_cpu_home_top_of_inning() {
        let defense = ctx(GamePhase::DefenseTurn, true);
        let offense = ctx(GamePhase::OffenseTurn, true);

        assert!(cpu_should_act(&defense, true, true));
        assert!(!player_may_act(&defense, true, true));
        assert!(!cpu_should_act(&offense, true, true));
        assert!(player_may_act(&offense, true, true));
    }

    #[test]
    fn test_optional_action_decider() {
        let mut c = ctx(GamePhase::OptionalAction, true);
        c.pending_action = OptionalActionKind::StolenBase;
        assert_eq!(acting_side(&c), Some(Side::Away));
        c.pending_action = OptionalActionKind::TagUp;
        assert_eq!(acting_side(&c), Some(Side::Away));
        c.pending_action = OptionalActionKind::DoublePlay;
        assert_eq!(acting_side(&c), Some(Side::Home));
    }

    #[test]
    fn test_machine_driven_phases_have_no_actor() {
        for phase in [
            GamePhase::WaitingForPlayers,
            GamePhase::SetLineups,
            GamePhase::UpdateBaseRunners,
            GamePhase::EndHalfInning,
            GamePhase::GameOver,
        ] {
            assert_eq!(acting_side(&ctx(phase, true)), None);
            assert!(!player_may_act(&ctx(phase, true), false, false));
            assert!(!cpu_should_act(&ctx(phase, true), false, true));
        }
    }

    #[test]
    fn test_no_cpu_game_never_asks_cpu() {
        assert!(!cpu_should_act(&ctx(GamePhase::DefenseTurn, true), true, false));
        assert!(player_may_act(&ctx(GamePhase::DefenseTurn, true), true, false));
    }

    #[test]
    fn test_authority_modes() {
        let defense = ctx(GamePhase::DefenseTurn, false);

        let away = AuthorityMode::Replicated { local_side: Side::Away };
        let home = AuthorityMode::Replicated { local_side: Side::Home };
        assert!(away.local_may_act(&defense));
        assert!(!home.local_may_act(&defense));
        assert!(!away.is_authority());

        let local = AuthorityMode::Local { vs_cpu: true, cpu_is_home: false };
        assert!(!local.local_may_act(&defense));
        assert!(local.is_authority());
    }
}
