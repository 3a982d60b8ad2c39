//! Session Events
//!
//! What a controller reports to its presentation layer. Events are
//! derived from store snapshots only; nothing here feeds back into
//! state transitions.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;

use crate::game::rules::ResolvedRound;
use crate::game::state::{Match, PlayerSlot};

/// Why a session stopped on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The room document vanished.
    RoomDeleted,
    /// The store ended the subscription.
    StoreClosed,
}

/// Event delivered to the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new document snapshot arrived.
    Snapshot(Box<Match>),

    /// Both hands were in; the round resolved for this seat.
    Round(ResolvedRound),

    /// A best-of-3 offer is open.
    ProposalOffered {
        /// Offering seat.
        from: PlayerSlot,
    },

    /// The offer was accepted; the host is about to escalate.
    ProposalAccepted {
        /// Offering seat.
        from: PlayerSlot,
    },

    /// The offer was declined.
    ProposalDeclined {
        /// Offering seat.
        from: PlayerSlot,
    },

    /// The match restarted as a best-of-3.
    BestOf3Started,

    /// A winner was recorded.
    MatchFinished {
        /// Winning seat.
        winner: PlayerSlot,
        /// This seat won.
        won: bool,
        /// `(player1, player2)` round wins.
        scores: (u32, u32),
    },

    /// A host transition write failed for a reason other than newer
    /// state. The match waits until [`retry_pending`] succeeds.
    ///
    /// [`retry_pending`]: crate::session::SessionController::retry_pending
    HostWriteFailed {
        /// Store error text.
        error: String,
    },

    /// The session stopped; no further events follow.
    Terminated {
        /// Cause.
        reason: TerminationReason,
    },
}

impl SessionEvent {
    /// Last event of a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Terminated { .. })
    }
}

/// Receiving end of a controller's events.
///
/// Yields nothing once the controller has been cleaned up, even if
/// events were already queued.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    closed: Arc<AtomicBool>,
}

impl SessionEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SessionEvent>, closed: Arc<AtomicBool>) -> Self {
        Self { rx, closed }
    }

    /// Next event, or `None` once the session is over.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let event = self.rx.recv().await?;
        (!self.closed.load(Ordering::SeqCst)).then_some(event)
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed.load(Ordering::SeqCst) {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) if !self.closed.load(Ordering::SeqCst) => Poll::Ready(Some(event)),
            Poll::Ready(_) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = SessionEvent::ProposalOffered { from: PlayerSlot::Player2 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "proposal_offered");
        assert_eq!(json["from"], "player2");

        let event = SessionEvent::Terminated { reason: TerminationReason::RoomDeleted };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"], "room_deleted");
        assert!(event.is_terminal());

        let event = SessionEvent::HostWriteFailed { error: "offline".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "host_write_failed");
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn test_closed_events_yield_nothing() {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let mut events = SessionEvents::new(rx, closed.clone());

        tx.send(SessionEvent::BestOf3Started).unwrap();
        tx.send(SessionEvent::BestOf3Started).unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::BestOf3Started));

        closed.store(true, Ordering::SeqCst);
        assert_eq!(events.recv().await, None);
        assert_eq!(events.try_recv(), None);
    }
}
