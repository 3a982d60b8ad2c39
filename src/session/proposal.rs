//! Best-of-3 Negotiation
//!
//! Offer/accept on the `proposal` record of a finished match. Either seat
//! may offer; only the other seat may answer. The host turns an answer
//! into a state change: an accepted offer restarts the match as a
//! best-of-3, a declined one is cleared and the match stays finished.
//!
//! Both host writes are conditional on the answer still being recorded,
//! and both clear it, so re-observing the same snapshot never applies an
//! outcome twice.

use serde_json::Value;

use crate::core::hash::StateHash;
use crate::game::state::{Match, MatchPhase, PlayerSlot};
use crate::game::transition;
use crate::game::update::{paths, MatchUpdate};
use crate::session::events::SessionEvent;

/// Why an offer or answer cannot be made right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// Offers are only made after a match has finished.
    #[error("match is not finished")]
    NotFinished,

    /// The finished match was already a best-of-3.
    #[error("match is already best-of-3")]
    AlreadyBestOf3,

    /// An offer is already open.
    #[error("an offer is already pending")]
    Pending,

    /// There is no opponent offer to answer.
    #[error("no offer to answer")]
    NoOffer,

    /// A seat cannot answer its own offer.
    #[error("cannot answer own offer")]
    OwnOffer,

    /// The offer was already answered.
    #[error("offer already answered")]
    AlreadyAnswered,
}

/// Write that only the host performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    /// Restart as best-of-3 for an accepted offer from this seat.
    BeginBestOf3(PlayerSlot),
    /// Clear a declined offer from this seat.
    ClearDeclined(PlayerSlot),
}

impl HostAction {
    /// Conditional update implementing this action.
    pub fn update(self) -> MatchUpdate {
        match self {
            HostAction::BeginBestOf3(from) => transition::begin_best_of3(from),
            HostAction::ClearDeclined(from) => transition::clear_declined(from),
        }
    }
}

/// Result of observing one snapshot.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NegotiationStep {
    /// Events for the presentation layer.
    pub events: Vec<SessionEvent>,
    /// Host write, if this seat is the host and one is due.
    pub action: Option<HostAction>,
}

/// Build the write that opens an offer from `slot`.
pub fn offer(slot: PlayerSlot, snapshot: &Match) -> Result<MatchUpdate, NegotiationError> {
    if snapshot.state != MatchPhase::Finished {
        return Err(NegotiationError::NotFinished);
    }
    if snapshot.best_of3 {
        return Err(NegotiationError::AlreadyBestOf3);
    }
    if snapshot.proposal.from.is_some() {
        return Err(NegotiationError::Pending);
    }

    Ok(MatchUpdate::new()
        .expect_phase(MatchPhase::Finished)
        .expect(paths::BEST_OF3, Value::Bool(false))
        .expect(paths::PROPOSAL_FROM, Value::Null)
        .set_slot(paths::PROPOSAL_FROM, Some(slot))
        .set(paths::PROPOSAL_ACCEPTED, Value::Null))
}

/// Build the write that answers the opponent's offer.
pub fn answer(slot: PlayerSlot, snapshot: &Match, accepted: bool) -> Result<MatchUpdate, NegotiationError> {
    let from = match snapshot.proposal.from {
        None => return Err(NegotiationError::NoOffer),
        Some(from) if from == slot => return Err(NegotiationError::OwnOffer),
        Some(from) => from,
    };
    if snapshot.proposal.accepted.is_some() {
        return Err(NegotiationError::AlreadyAnswered);
    }

    Ok(MatchUpdate::new()
        .expect_phase(MatchPhase::Finished)
        .expect(paths::PROPOSAL_FROM, Value::from(from.key()))
        .expect(paths::PROPOSAL_ACCEPTED, Value::Null)
        .set(paths::PROPOSAL_ACCEPTED, Value::Bool(accepted)))
}

/// Host write owed by an answered offer on `snapshot`, if any.
pub fn pending_host_action(snapshot: &Match) -> Option<HostAction> {
    if snapshot.state != MatchPhase::Finished {
        return None;
    }
    match (snapshot.proposal.from, snapshot.proposal.accepted) {
        (Some(from), Some(true)) => Some(HostAction::BeginBestOf3(from)),
        (Some(from), Some(false)) => Some(HostAction::ClearDeclined(from)),
        _ => None,
    }
}

/// Per-seat view of the negotiation.
#[derive(Debug)]
pub struct ProposalNegotiator {
    slot: PlayerSlot,
    last_seen: Option<StateHash>,
    was_best_of3: Option<bool>,
}

impl ProposalNegotiator {
    /// Negotiator for `slot`.
    pub fn new(slot: PlayerSlot) -> Self {
        Self {
            slot,
            last_seen: None,
            was_best_of3: None,
        }
    }

    /// React to a snapshot.
    ///
    /// A snapshot whose negotiation fields match the previous one yields
    /// an empty step.
    pub fn observe(&mut self, snapshot: &Match) -> NegotiationStep {
        let mut step = NegotiationStep::default();

        let fingerprint = snapshot.proposal_fingerprint();
        if self.last_seen == Some(fingerprint) {
            return step;
        }
        self.last_seen = Some(fingerprint);

        let escalated = self.was_best_of3 == Some(false)
            && snapshot.best_of3
            && snapshot.state == MatchPhase::Playing;
        self.was_best_of3 = Some(snapshot.best_of3);
        if escalated {
            step.events.push(SessionEvent::BestOf3Started);
        }

        if snapshot.state != MatchPhase::Finished {
            return step;
        }

        match (snapshot.proposal.from, snapshot.proposal.accepted) {
            (Some(from), None) => step.events.push(SessionEvent::ProposalOffered { from }),
            (Some(from), Some(true)) => step.events.push(SessionEvent::ProposalAccepted { from }),
            (Some(from), Some(false)) => step.events.push(SessionEvent::ProposalDeclined { from }),
            (None, _) => {}
        }
        step.action = pending_host_action(snapshot).and_then(|action| self.host_only(action));

        step
    }

    /// Forget the last snapshot so the next one is evaluated again.
    ///
    /// Called after a host write was rejected.
    pub fn forget(&mut self) {
        self.last_seen = None;
    }

    fn host_only(&self, action: HostAction) -> Option<HostAction> {
        self.slot.is_host().then_some(action)
    }
}
