//! In-Memory Room Store
//!
//! A process-local [`RoomStore`] holding documents as JSON trees, the
//! same shape a hosted replicated store would keep. Used by the demo
//! binary and the session tests, and as the reference for the store
//! contract's ordering and atomicity rules.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, instrument};

use crate::core::code::MatchCode;
use crate::game::state::Match;
use crate::game::update::{paths, MatchUpdate};
use crate::store::{ChatEntry, RoomSnapshot, RoomStore, StoreError, Subscription};

/// One stored room.
struct Room {
    /// Document tree.
    doc: Value,
    /// Chat log, oldest first.
    chat: Vec<ChatEntry>,
    /// Live subscribers.
    subscribers: Vec<mpsc::UnboundedSender<RoomSnapshot>>,
}

impl Room {
    fn snapshot(&self) -> Result<Match, StoreError> {
        serde_json::from_value(self.doc.clone())
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))
    }

    fn revision(&self) -> u64 {
        self.doc.get(paths::REVISION).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Deliver to every subscriber, dropping the ones that hung up.
    fn publish(&mut self, snapshot: RoomSnapshot) {
        self.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

/// Process-local room store.
pub struct MemoryStore {
    rooms: RwLock<BTreeMap<MatchCode, Room>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Remove a room. Subscribers receive [`RoomSnapshot::Deleted`].
    pub async fn delete(&self, code: &MatchCode) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.remove(code) {
            Some(mut room) => {
                debug!(%code, "room deleted");
                room.publish(RoomSnapshot::Deleted);
                true
            }
            None => false,
        }
    }

    /// Chat log of a room, oldest first.
    pub async fn chat(&self, code: &MatchCode) -> Result<Vec<ChatEntry>, StoreError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(code)
            .map(|room| room.chat.clone())
            .ok_or_else(|| StoreError::NotFound(code.clone()))
    }

    /// Number of stored rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Subscribers of a room that have not hung up.
    pub async fn subscriber_count(&self, code: &MatchCode) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(code)
            .map(|room| room.subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    #[instrument(skip_all, fields(code = %initial.code))]
    async fn create(&self, initial: &Match) -> Result<MatchCode, StoreError> {
        let doc = serde_json::to_value(initial)
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))?;

        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&initial.code) {
            return Err(StoreError::AlreadyExists(initial.code.clone()));
        }

        rooms.insert(initial.code.clone(), Room {
            doc,
            chat: Vec::new(),
            subscribers: Vec::new(),
        });
        debug!("room created");

        Ok(initial.code.clone())
    }

    async fn get(&self, code: &MatchCode) -> Result<Match, StoreError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(code)
            .ok_or_else(|| StoreError::NotFound(code.clone()))?
            .snapshot()
    }

    #[instrument(skip(self, update))]
    async fn update(&self, code: &MatchCode, update: &MatchUpdate) -> Result<u64, StoreError> {
        if update.paths().any(|p| p == "code" || p.starts_with("code/")) {
            return Err(StoreError::InvalidDocument("code is immutable".to_string()));
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| StoreError::NotFound(code.clone()))?;

        update.check(&room.doc)?;

        let mut next = room.doc.clone();
        update.merge_into(&mut next)?;

        let revision = room.revision() + 1;
        if let Value::Object(map) = &mut next {
            map.insert(paths::REVISION.to_string(), Value::from(revision));
        }

        // Validate before committing so a bad write leaves the room untouched.
        let snapshot: Match = serde_json::from_value(next.clone())
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))?;

        room.doc = next;
        room.publish(RoomSnapshot::Present(Box::new(snapshot)));
        debug!(revision, "update applied");

        Ok(revision)
    }

    async fn subscribe(&self, code: &MatchCode) -> Result<Subscription, StoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| StoreError::NotFound(code.clone()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let current = room.snapshot()?;
        // Receiver is alive, so the initial send cannot fail.
        let _ = tx.send(RoomSnapshot::Present(Box::new(current)));
        room.subscribers.push(tx);

        Ok(Subscription::new(code.clone(), rx))
    }

    async fn append(&self, code: &MatchCode, entry: ChatEntry) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| StoreError::NotFound(code.clone()))?;
        room.chat.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::code::CODE_LENGTH;
    use crate::game::state::{Hand, MatchPhase, PlayerSlot};
    use crate::store::ChatAuthor;

    fn code() -> MatchCode {
        MatchCode::parse("MNP345", CODE_LENGTH).unwrap()
    }

    async fn store_with_room() -> MemoryStore {
        let store = MemoryStore::new();
        store.create(&Match::new(code(), 0)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store_with_room().await;

        let m = store.get(&code()).await.unwrap();
        assert_eq!(m.code, code());
        assert_eq!(m.state, MatchPhase::Waiting);
        assert_eq!(store.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_collision() {
        let store = store_with_room().await;
        let result = store.create(&Match::new(code(), 1)).await;
        assert_eq!(result, Err(StoreError::AlreadyExists(code())));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.get(&code()).await, Err(StoreError::NotFound(code())));
    }

    #[tokio::test]
    async fn test_update_bumps_revision() {
        let store = store_with_room().await;

        let update = MatchUpdate::new().submit_hand(PlayerSlot::Player1, Hand::Rock);
        assert_eq!(store.update(&code(), &update).await, Ok(1));
        assert_eq!(store.update(&code(), &update).await, Ok(2));

        let m = store.get(&code()).await.unwrap();
        assert_eq!(m.revision, 2);
        assert_eq!(m.players.player1.choice, Some(Hand::Rock));
    }

    #[tokio::test]
    async fn test_failed_precondition_leaves_document() {
        let store = store_with_room().await;
        let before = store.get(&code()).await.unwrap();

        let update = MatchUpdate::new()
            .expect_phase(MatchPhase::Playing)
            .set_score(PlayerSlot::Player1, 1);
        let result = store.update(&code(), &update).await;

        assert_eq!(result, Err(StoreError::PreconditionFailed { path: "state".into() }));
        assert_eq!(store.get(&code()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_schema_violation_rejected() {
        let store = store_with_room().await;

        let update = MatchUpdate::new().set("players/player1/score", json!("lots"));
        assert!(matches!(
            store.update(&code(), &update).await,
            Err(StoreError::InvalidDocument(_))
        ));

        let update = MatchUpdate::new().set("code", json!("OTHER1"));
        assert!(matches!(
            store.update(&code(), &update).await,
            Err(StoreError::InvalidDocument(_))
        ));
        assert_eq!(store.get(&code()).await.unwrap().revision, 0);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_changes() {
        let store = store_with_room().await;
        let mut sub = store.subscribe(&code()).await.unwrap();

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, RoomSnapshot::Present(m) if m.revision == 0));

        store.update(&code(), &MatchUpdate::new().set_score(PlayerSlot::Player2, 0)).await.unwrap();
        store.update(&code(), &MatchUpdate::new().set_score(PlayerSlot::Player2, 0)).await.unwrap();

        for expected in [1, 2] {
            match sub.recv().await.unwrap() {
                RoomSnapshot::Present(m) => assert_eq!(m.revision, expected),
                RoomSnapshot::Deleted => panic!("unexpected delete"),
            }
        }
    }

    #[tokio::test]
    async fn test_delete_notifies() {
        let store = store_with_room().await;
        let mut sub = store.subscribe(&code()).await.unwrap();
        let _ = sub.recv().await;

        assert!(store.delete(&code()).await);
        assert_eq!(sub.recv().await, Some(RoomSnapshot::Deleted));
        assert!(!store.delete(&code()).await);
    }

    #[tokio::test]
    async fn test_chat_does_not_publish() {
        let store = store_with_room().await;
        let mut sub = store.subscribe(&code()).await.unwrap();
        let _ = sub.recv().await;

        store
            .append(&code(), ChatEntry::new(ChatAuthor::Player(PlayerSlot::Player1), "hi"))
            .await
            .unwrap();

        let chat = store.chat(&code()).await.unwrap();
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].message, "hi");

        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_pruned() {
        let store = store_with_room().await;
        let mut sub = store.subscribe(&code()).await.unwrap();
        assert_eq!(store.subscriber_count(&code()).await, 1);

        sub.cancel();
        assert_eq!(store.subscriber_count(&code()).await, 0);

        store.update(&code(), &MatchUpdate::new().set_score(PlayerSlot::Player1, 0)).await.unwrap();
        assert_eq!(sub.recv().await, None);
    }
}
