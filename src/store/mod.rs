//! Room Store
//!
//! Contract for the replicated document store that hosts room documents.
//! The core never talks to a peer directly; everything flows through
//! create/get/update/subscribe on this trait.
//!
//! This layer is **non-deterministic** - all rules run through `game/`.

pub mod memory;

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::code::MatchCode;
use crate::game::state::{Match, PlayerSlot};
use crate::game::update::{MatchUpdate, UpdateError};

pub use memory::MemoryStore;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No document under this code.
    #[error("room {0} not found")]
    NotFound(MatchCode),

    /// A document already exists under this code.
    #[error("room {0} already exists")]
    AlreadyExists(MatchCode),

    /// A conditional update found a different value.
    #[error("precondition failed at {path}")]
    PreconditionFailed {
        /// Path whose value did not match.
        path: String,
    },

    /// Update would produce a document outside the room schema.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Backend refused or could not complete the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<UpdateError> for StoreError {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::PreconditionFailed(path) => StoreError::PreconditionFailed { path },
            other => StoreError::InvalidDocument(other.to_string()),
        }
    }
}

/// One delivery from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomSnapshot {
    /// Full current document.
    Present(Box<Match>),
    /// Document no longer exists.
    Deleted,
}

/// Author of a chat line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatAuthor {
    /// Room notices.
    System,
    /// A seated player.
    #[serde(untagged)]
    Player(PlayerSlot),
}

/// Entry in a room's chat log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Unique entry id.
    pub id: Uuid,
    /// Author.
    pub from: ChatAuthor,
    /// Text.
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ChatEntry {
    /// New entry stamped with the current time.
    pub fn new(from: ChatAuthor, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Replicated document store hosting room documents.
///
/// Implementations must deliver snapshots to each subscriber in the
/// order writes were accepted, including the subscriber's own writes.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Store a new document under `initial.code`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] on a code collision.
    async fn create(&self, initial: &Match) -> Result<MatchCode, StoreError>;

    /// Read the current document.
    async fn get(&self, code: &MatchCode) -> Result<Match, StoreError>;

    /// Check preconditions, then merge every path atomically.
    ///
    /// Returns the document's new revision.
    async fn update(&self, code: &MatchCode, update: &MatchUpdate) -> Result<u64, StoreError>;

    /// Subscribe to every change. The current document is delivered first.
    async fn subscribe(&self, code: &MatchCode) -> Result<Subscription, StoreError>;

    /// Append to the room's chat log. Does not produce a snapshot.
    async fn append(&self, code: &MatchCode, entry: ChatEntry) -> Result<(), StoreError>;
}

/// Cancellable stream of snapshots for one room.
///
/// Cancellation is synchronous: once [`Subscription::cancel`] returns,
/// no further snapshot is yielded, even if one was already queued.
pub struct Subscription {
    code: MatchCode,
    rx: mpsc::UnboundedReceiver<RoomSnapshot>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Wrap a delivery channel.
    pub fn new(code: MatchCode, rx: mpsc::UnboundedReceiver<RoomSnapshot>) -> Self {
        Self {
            code,
            rx,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Room this subscription follows.
    pub fn code(&self) -> &MatchCode {
        &self.code
    }

    /// Next snapshot, or `None` once cancelled or the store hung up.
    pub async fn recv(&mut self) -> Option<RoomSnapshot> {
        if !self.is_active() {
            return None;
        }
        let snapshot = self.rx.recv().await?;
        self.is_active().then_some(snapshot)
    }

    /// Handle that cancels this subscription from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.active.clone())
    }

    /// Stop delivery. Idempotent.
    pub fn cancel(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.rx.close();
    }

    /// Still delivering.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Stream for Subscription {
    type Item = RoomSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.is_active() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(snapshot)) if self.is_active() => Poll::Ready(Some(snapshot)),
            Poll::Ready(_) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cancels a [`Subscription`] owned by another task.
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Stop delivery. Takes effect before the owner's next yield.
    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether delivery has been stopped.
    pub fn is_cancelled(&self) -> bool {
        !self.0.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::code::CODE_LENGTH;
    use futures_util::StreamExt;

    fn code() -> MatchCode {
        MatchCode::parse("HJK234", CODE_LENGTH).unwrap()
    }

    #[tokio::test]
    async fn test_cancel_drops_queued_snapshots() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(code(), rx);

        tx.send(RoomSnapshot::Deleted).unwrap();
        tx.send(RoomSnapshot::Deleted).unwrap();

        assert_eq!(sub.recv().await, Some(RoomSnapshot::Deleted));
        sub.cancel();
        assert_eq!(sub.recv().await, None);
        assert!(tx.send(RoomSnapshot::Deleted).is_err());

        // Idempotent.
        sub.cancel();
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(code(), rx);
        let m = Match::new(code(), 0);

        tx.send(RoomSnapshot::Present(Box::new(m.clone()))).unwrap();
        drop(tx);

        assert_eq!(sub.next().await, Some(RoomSnapshot::Present(Box::new(m))));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_remote_cancel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(code(), rx);
        let handle = sub.cancel_handle();

        tx.send(RoomSnapshot::Deleted).unwrap();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert_eq!(sub.next().await, None);
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_update_error_mapping() {
        let err: StoreError = UpdateError::PreconditionFailed("revision".into()).into();
        assert_eq!(err, StoreError::PreconditionFailed { path: "revision".into() });

        let err: StoreError = UpdateError::InvalidPath("a//b".into()).into();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_chat_author_wire_format() {
        let player = serde_json::to_value(ChatAuthor::Player(PlayerSlot::Player2)).unwrap();
        let system = serde_json::to_value(ChatAuthor::System).unwrap();

        assert_eq!(player, "player2");
        assert_eq!(system, "system");

        let parsed: ChatAuthor = serde_json::from_str("\"player1\"").unwrap();
        assert_eq!(parsed, ChatAuthor::Player(PlayerSlot::Player1));
    }
}
