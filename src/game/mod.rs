//! Game Logic Module
//!
//! Match rules and the room document. 100% deterministic, no I/O.
//!
//! ## Module Structure
//!
//! - `state`: Room document, seats, hands
//! - `rules`: Round resolution (initiative, combat, match winner)
//! - `update`: Path-keyed conditional partial updates
//! - `transition`: Host-side next-state planning

pub mod state;
pub mod rules;
pub mod update;
pub mod transition;

// Re-export key types
pub use state::{Match, MatchPhase, PlayerSlot, Hand, Seat, Players, Proposal};
pub use rules::{
    decide_initiative, resolve_combat_round, resolve_round, check_match_winner,
    Initiative, CombatResult, RoundOutcome, ResolvedRound, Perspective, Hands,
};
pub use update::{Comparison, MatchUpdate, Precondition, UpdateError};
