//! Round Resolution
//!
//! Pure functions that turn a pair of submitted hands into the next
//! step of the match. Both clients run these on the same snapshot and
//! must agree, so nothing here reads clocks, randomness or I/O.

use serde::{Serialize, Deserialize};

use crate::game::state::{Hand, Match, PlayerSlot};

/// Result of the initiative draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Initiative {
    /// Equal hands; draw again.
    Draw,
    /// This seat becomes the first attacker.
    Winner(PlayerSlot),
}

/// Plain rock-paper-scissors between `player1` and `player2`.
pub fn decide_initiative(player1: Hand, player2: Hand) -> Initiative {
    if player1 == player2 {
        Initiative::Draw
    } else if player1.beats(player2) {
        Initiative::Winner(PlayerSlot::Player1)
    } else {
        Initiative::Winner(PlayerSlot::Player2)
    }
}

/// Result of one combat exchange once an attacker exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombatResult {
    /// Defender mirrored the attacker. The attacker wins the round.
    MatchEnding {
        /// Round winner (the attacker).
        winner: PlayerSlot,
    },
    /// Attacker's hand beat the defender's; roles stay.
    Retained {
        /// Attacker for the next exchange.
        attacker: PlayerSlot,
    },
    /// Defender's hand beat the attacker's; roles swap.
    Transferred {
        /// Attacker for the next exchange (the former defender).
        attacker: PlayerSlot,
    },
}

/// Resolve one exchange of the combat phase.
///
/// Every one of the nine hand pairs lands in exactly one variant:
/// three mirrors end the round, the six unequal pairs split evenly
/// between retained and transferred.
pub fn resolve_combat_round(
    attacker_choice: Hand,
    defender_choice: Hand,
    current_attacker: PlayerSlot,
) -> CombatResult {
    if attacker_choice == defender_choice {
        CombatResult::MatchEnding { winner: current_attacker }
    } else if attacker_choice.beats(defender_choice) {
        CombatResult::Retained { attacker: current_attacker }
    } else {
        CombatResult::Transferred { attacker: current_attacker.opponent() }
    }
}

/// Both submitted hands of a resolved round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hands {
    /// Host's hand.
    pub player1: Hand,
    /// Guest's hand.
    pub player2: Hand,
}

impl Hands {
    /// Hand played by a seat.
    pub fn of(&self, slot: PlayerSlot) -> Hand {
        match slot {
            PlayerSlot::Player1 => self.player1,
            PlayerSlot::Player2 => self.player2,
        }
    }
}

/// What a round resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Initiative draw with equal hands. Nothing changes.
    Draw {
        /// Hands played.
        hands: Hands,
    },
    /// First attacker established; the round counter moves to 1.
    AttackerDecided {
        /// New attacker.
        attacker: PlayerSlot,
        /// Hands played.
        hands: Hands,
    },
    /// Combat goes on with `attacker` leading; the round counter advances.
    Continue {
        /// Attacker for the next exchange.
        attacker: PlayerSlot,
        /// Roles swapped this exchange.
        transferred: bool,
        /// Hands played.
        hands: Hands,
    },
    /// Defender was mirrored; `winner` takes the round.
    GameOver {
        /// Round winner.
        winner: PlayerSlot,
        /// Hands played.
        hands: Hands,
    },
}

impl RoundOutcome {
    /// Hands that produced this outcome.
    pub fn hands(&self) -> Hands {
        match *self {
            RoundOutcome::Draw { hands }
            | RoundOutcome::AttackerDecided { hands, .. }
            | RoundOutcome::Continue { hands, .. }
            | RoundOutcome::GameOver { hands, .. } => hands,
        }
    }

    /// Short name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            RoundOutcome::Draw { .. } => "draw",
            RoundOutcome::AttackerDecided { .. } => "attacker_decided",
            RoundOutcome::Continue { .. } => "continue",
            RoundOutcome::GameOver { .. } => "game_over",
        }
    }
}

/// How a resolved round looks from one seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// Initiative draw; play again.
    Draw,
    /// Viewer is now attacking (first decision or taken from the opponent).
    GainedInitiative,
    /// Viewer starts the combat phase defending.
    StartsDefending,
    /// Viewer kept the attack.
    KeptInitiative,
    /// Viewer keeps defending.
    StillDefending,
    /// Opponent took the attack.
    LostInitiative,
    /// Viewer won the round.
    Won,
    /// Viewer lost the round.
    Lost,
}

/// A round outcome bound to the seat that resolved it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRound {
    /// Seat the outcome is rendered for.
    pub viewer: PlayerSlot,
    /// `currentRound` of the snapshot that was resolved.
    pub round: u32,
    /// Seat-independent result.
    pub outcome: RoundOutcome,
}

impl ResolvedRound {
    /// Viewer-relative reading of the outcome.
    pub fn perspective(&self) -> Perspective {
        let me = self.viewer;
        match self.outcome {
            RoundOutcome::Draw { .. } => Perspective::Draw,
            RoundOutcome::AttackerDecided { attacker, .. } => {
                if attacker == me {
                    Perspective::GainedInitiative
                } else {
                    Perspective::StartsDefending
                }
            }
            RoundOutcome::Continue { attacker, transferred, .. } => match (attacker == me, transferred) {
                (true, true) => Perspective::GainedInitiative,
                (true, false) => Perspective::KeptInitiative,
                (false, true) => Perspective::LostInitiative,
                (false, false) => Perspective::StillDefending,
            },
            RoundOutcome::GameOver { winner, .. } => {
                if winner == me {
                    Perspective::Won
                } else {
                    Perspective::Lost
                }
            }
        }
    }

    /// Viewer's own hand.
    pub fn my_hand(&self) -> Hand {
        self.outcome.hands().of(self.viewer)
    }

    /// Opponent's hand.
    pub fn opponent_hand(&self) -> Hand {
        self.outcome.hands().of(self.viewer.opponent())
    }
}

/// Resolve the round in `snapshot` as seen from `viewer`.
///
/// Returns `None` while either hand is missing; that is the normal
/// "not ready" state, not an error. A snapshot with `currentRound > 0`
/// but no attacker is treated as still being in the initiative phase.
pub fn resolve_round(snapshot: &Match, viewer: PlayerSlot) -> Option<ResolvedRound> {
    let (player1, player2) = snapshot.choices()?;
    let hands = Hands { player1, player2 };

    let outcome = match snapshot.attacker {
        Some(attacker) if snapshot.current_round > 0 => {
            let defender = attacker.opponent();
            match resolve_combat_round(hands.of(attacker), hands.of(defender), attacker) {
                CombatResult::MatchEnding { winner } => RoundOutcome::GameOver { winner, hands },
                CombatResult::Retained { attacker } => RoundOutcome::Continue {
                    attacker,
                    transferred: false,
                    hands,
                },
                CombatResult::Transferred { attacker } => RoundOutcome::Continue {
                    attacker,
                    transferred: true,
                    hands,
                },
            }
        }
        _ => match decide_initiative(player1, player2) {
            Initiative::Draw => RoundOutcome::Draw { hands },
            Initiative::Winner(attacker) => RoundOutcome::AttackerDecided { attacker, hands },
        },
    };

    Some(ResolvedRound {
        viewer,
        round: snapshot.current_round,
        outcome,
    })
}

/// Match-level winner check for multi-round matches.
///
/// Kept separate from round resolution; only the host calls it after
/// recording a round win.
pub fn check_match_winner(player1_score: u32, player2_score: u32, threshold: u32) -> Option<PlayerSlot> {
    if player1_score >= threshold {
        Some(PlayerSlot::Player1)
    } else if player2_score >= threshold {
        Some(PlayerSlot::Player2)
    } else {
        None
    }
}
