//! Room Document Definitions
//!
//! The replicated match record shared by both clients, plus the small
//! enums it is built from. Field names follow the persisted schema
//! exactly so that any client/store pairing interoperates.

use serde::{Serialize, Deserialize};

use crate::core::code::MatchCode;
use crate::core::hash::{StateHash, StateHasher};

// =============================================================================
// PLAYER SLOT
// =============================================================================

/// One of the two fixed seats in a room.
///
/// `Player1` is the host by convention; it is never elected dynamically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSlot {
    /// Room creator and host.
    Player1,
    /// Second player to join.
    Player2,
}

impl PlayerSlot {
    /// Both slots, host first.
    pub const ALL: [PlayerSlot; 2] = [PlayerSlot::Player1, PlayerSlot::Player2];

    /// The other seat.
    #[inline]
    pub fn opponent(self) -> PlayerSlot {
        match self {
            PlayerSlot::Player1 => PlayerSlot::Player2,
            PlayerSlot::Player2 => PlayerSlot::Player1,
        }
    }

    /// Whether this seat writes state transitions.
    #[inline]
    pub fn is_host(self) -> bool {
        self == PlayerSlot::Player1
    }

    /// Document key for this seat (`players/<key>/...`).
    pub fn key(self) -> &'static str {
        match self {
            PlayerSlot::Player1 => "player1",
            PlayerSlot::Player2 => "player2",
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// HAND
// =============================================================================

/// A submitted gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    /// Beats scissors.
    Rock,
    /// Beats paper.
    Scissors,
    /// Beats rock.
    Paper,
}

impl Hand {
    /// Every hand, in cycle order.
    pub const ALL: [Hand; 3] = [Hand::Rock, Hand::Scissors, Hand::Paper];

    /// The hand this one defeats.
    #[inline]
    pub fn victim(self) -> Hand {
        match self {
            Hand::Rock => Hand::Scissors,
            Hand::Scissors => Hand::Paper,
            Hand::Paper => Hand::Rock,
        }
    }

    /// Check if this hand defeats another.
    #[inline]
    pub fn beats(self, other: Hand) -> bool {
        self.victim() == other
    }

    /// Document value for this hand.
    pub fn key(self) -> &'static str {
        match self {
            Hand::Rock => "rock",
            Hand::Scissors => "scissors",
            Hand::Paper => "paper",
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Lifecycle of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchPhase {
    /// Lobby: waiting for the second player or for the host to start.
    #[default]
    Waiting,
    /// Rounds in progress.
    Playing,
    /// A winner has been recorded.
    Finished,
}

impl MatchPhase {
    /// Document value for this phase.
    pub fn key(self) -> &'static str {
        match self {
            MatchPhase::Waiting => "waiting",
            MatchPhase::Playing => "playing",
            MatchPhase::Finished => "finished",
        }
    }
}

// =============================================================================
// SEATS
// =============================================================================

/// Per-seat state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Seat {
    /// Seat is occupied. Never reverts once set.
    pub joined: bool,
    /// A choice has been submitted for the current round.
    pub ready: bool,
    /// Submitted hand; present only while `ready`.
    pub choice: Option<Hand>,
    /// Round wins in the current match.
    pub score: u32,
}

impl Seat {
    /// A freshly occupied seat.
    pub fn joined() -> Self {
        Self {
            joined: true,
            ..Default::default()
        }
    }
}

/// The two fixed seats.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Players {
    /// Host seat.
    pub player1: Seat,
    /// Guest seat.
    pub player2: Seat,
}

impl Players {
    /// Borrow a seat.
    pub fn seat(&self, slot: PlayerSlot) -> &Seat {
        match slot {
            PlayerSlot::Player1 => &self.player1,
            PlayerSlot::Player2 => &self.player2,
        }
    }

    /// Mutably borrow a seat.
    pub fn seat_mut(&mut self, slot: PlayerSlot) -> &mut Seat {
        match slot {
            PlayerSlot::Player1 => &mut self.player1,
            PlayerSlot::Player2 => &mut self.player2,
        }
    }
}

/// Best-of-3 offer record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Proposal {
    /// Offering seat, if an offer is open.
    pub from: Option<PlayerSlot>,
    /// Response, once given.
    pub accepted: Option<bool>,
}

// =============================================================================
// MATCH
// =============================================================================

/// The room document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Address of this document. Immutable.
    pub code: MatchCode,

    /// Lifecycle phase.
    #[serde(default)]
    pub state: MatchPhase,

    /// Seats.
    #[serde(default)]
    pub players: Players,

    /// 0 while initiative is undecided.
    #[serde(rename = "currentRound", default)]
    pub current_round: u32,

    /// Current attacker; `None` exactly when `current_round == 0`.
    #[serde(default)]
    pub attacker: Option<PlayerSlot>,

    /// Escalated to a two-win match.
    #[serde(rename = "bestOf3", default)]
    pub best_of3: bool,

    /// Set only when `state == Finished`.
    #[serde(default)]
    pub winner: Option<PlayerSlot>,

    /// Best-of-3 negotiation.
    #[serde(default)]
    pub proposal: Proposal,

    /// Creation time (milliseconds since the Unix epoch).
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,

    /// Write counter maintained by the store.
    #[serde(default)]
    pub revision: u64,
}

impl Match {
    /// A new room in `waiting` with the creator seated as `player1`.
    pub fn new(code: MatchCode, created_at: i64) -> Self {
        Self {
            code,
            state: MatchPhase::Waiting,
            players: Players {
                player1: Seat::joined(),
                player2: Seat::default(),
            },
            current_round: 0,
            attacker: None,
            best_of3: false,
            winner: None,
            proposal: Proposal::default(),
            created_at,
            revision: 0,
        }
    }

    /// Borrow a seat.
    #[inline]
    pub fn seat(&self, slot: PlayerSlot) -> &Seat {
        self.players.seat(slot)
    }

    /// Both seats are occupied.
    pub fn both_joined(&self) -> bool {
        self.players.player1.joined && self.players.player2.joined
    }

    /// Both seats have submitted a choice.
    pub fn both_ready(&self) -> bool {
        self.players.player1.ready && self.players.player2.ready
    }

    /// Both submitted hands, `(player1, player2)`, if present.
    pub fn choices(&self) -> Option<(Hand, Hand)> {
        Some((self.players.player1.choice?, self.players.player2.choice?))
    }

    /// Initiative has not been decided yet.
    #[inline]
    pub fn in_initiative_phase(&self) -> bool {
        self.current_round == 0 || self.attacker.is_none()
    }

    /// Round wins needed to finish this match.
    pub fn win_threshold(&self) -> u32 {
        if self.best_of3 {
            crate::BEST_OF3_THRESHOLD
        } else {
            crate::SINGLE_ROUND_THRESHOLD
        }
    }

    /// Fingerprint of everything round resolution reads.
    ///
    /// Two snapshots with equal fingerprints resolve to the same outcome.
    pub fn round_fingerprint(&self) -> StateHash {
        let mut hasher = StateHasher::for_round();
        hasher.update_str(self.code.as_str());
        hasher.update_u8(self.state as u8);
        hasher.update_u32(self.current_round);
        hasher.update_tag(self.attacker.map(PlayerSlot::tag));
        hasher.update_bool(self.best_of3);
        for slot in PlayerSlot::ALL {
            let seat = self.seat(slot);
            hasher.update_bool(seat.ready);
            hasher.update_tag(seat.choice.map(Hand::tag));
            hasher.update_u32(seat.score);
        }
        hasher.finalize()
    }

    /// Fingerprint of everything the negotiator reads.
    pub fn proposal_fingerprint(&self) -> StateHash {
        let mut hasher = StateHasher::for_proposal();
        hasher.update_str(self.code.as_str());
        hasher.update_u8(self.state as u8);
        hasher.update_bool(self.best_of3);
        hasher.update_tag(self.proposal.from.map(PlayerSlot::tag));
        hasher.update_tag(self.proposal.accepted.map(|a| a as u8));
        hasher.finalize()
    }

    /// Check the document invariants.
    ///
    /// Returns a description of the first violated rule.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if (self.attacker.is_none()) != (self.current_round == 0) {
            return Err("attacker must be null exactly when currentRound is 0");
        }

        for slot in PlayerSlot::ALL {
            let seat = self.seat(slot);
            if seat.choice.is_some() && !seat.ready {
                return Err("choice present without ready");
            }
            if seat.score > self.win_threshold() {
                return Err("score above win threshold");
            }
            if seat.score == self.win_threshold() && self.state != MatchPhase::Finished {
                return Err("threshold reached without finishing");
            }
        }

        if self.winner.is_some() != (self.state == MatchPhase::Finished) {
            return Err("winner must be set exactly when finished");
        }

        Ok(())
    }
}
