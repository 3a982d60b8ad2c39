//! Partial Document Updates
//!
//! A [`MatchUpdate`] names leaf paths such as `players/player2/score`
//! and the values to write there, plus optional preconditions that must
//! hold on the stored document before anything is merged. Stores apply
//! the whole update or none of it.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::game::state::{Hand, Match, MatchPhase, PlayerSlot};

/// Document paths written by the session layer.
pub mod paths {
    use crate::game::state::PlayerSlot;

    /// Lifecycle phase.
    pub const STATE: &str = "state";
    /// Round counter.
    pub const CURRENT_ROUND: &str = "currentRound";
    /// Current attacker.
    pub const ATTACKER: &str = "attacker";
    /// Best-of-3 flag.
    pub const BEST_OF3: &str = "bestOf3";
    /// Match winner.
    pub const WINNER: &str = "winner";
    /// Store-maintained write counter.
    pub const REVISION: &str = "revision";
    /// Offering seat.
    pub const PROPOSAL_FROM: &str = "proposal/from";
    /// Offer response.
    pub const PROPOSAL_ACCEPTED: &str = "proposal/accepted";

    /// Whole seat record.
    pub fn seat(slot: PlayerSlot) -> String {
        format!("players/{}", slot.key())
    }

    /// One field of a seat record.
    pub fn seat_field(slot: PlayerSlot, field: &str) -> String {
        format!("players/{}/{}", slot.key(), field)
    }
}

/// How a precondition compares the stored value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Stored value must equal `expected`.
    #[default]
    Equals,
    /// Stored value must differ from `expected`. An absent path differs
    /// from anything but `null`.
    NotEquals,
}

/// A condition checked against the stored document before merging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    /// Leaf path.
    pub path: String,
    /// Reference value; an absent path reads as `null`.
    pub expected: Value,
    /// Comparison applied.
    #[serde(default)]
    pub comparison: Comparison,
}

impl Precondition {
    /// Whether the condition holds on `doc`.
    fn holds(&self, doc: &Value) -> Result<bool, UpdateError> {
        let equal = match lookup(doc, &self.path)? {
            Some(actual) => *actual == self.expected,
            None => self.expected.is_null(),
        };
        Ok(match self.comparison {
            Comparison::Equals => equal,
            Comparison::NotEquals => !equal,
        })
    }
}

/// Errors applying an update to a document.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Path is empty or has an empty segment.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// A precondition did not hold.
    #[error("precondition failed at {0}")]
    PreconditionFailed(String),

    /// Merged document no longer matches the room schema.
    #[error("schema error: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Path-keyed partial update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchUpdate {
    /// Values to write, keyed by leaf path.
    sets: BTreeMap<String, Value>,
    /// Conditions that must all hold first.
    preconditions: Vec<Precondition>,
}

impl MatchUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw value at `path`.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.sets.insert(path.into(), value);
        self
    }

    /// Require `path` to hold `expected` before merging.
    pub fn expect(mut self, path: impl Into<String>, expected: Value) -> Self {
        self.preconditions.push(Precondition {
            path: path.into(),
            expected,
            comparison: Comparison::Equals,
        });
        self
    }

    /// Require `path` to hold anything but `excluded`, absence included.
    pub fn expect_not(mut self, path: impl Into<String>, excluded: Value) -> Self {
        self.preconditions.push(Precondition {
            path: path.into(),
            expected: excluded,
            comparison: Comparison::NotEquals,
        });
        self
    }

    /// Write a seat, or `null`.
    pub fn set_slot(self, path: impl Into<String>, slot: Option<PlayerSlot>) -> Self {
        self.set(path, slot_value(slot))
    }

    /// Write the lifecycle phase.
    pub fn set_phase(self, phase: MatchPhase) -> Self {
        self.set(paths::STATE, Value::from(phase.key()))
    }

    /// Require the lifecycle phase.
    pub fn expect_phase(self, phase: MatchPhase) -> Self {
        self.expect(paths::STATE, Value::from(phase.key()))
    }

    /// Require the store revision observed in `snapshot`.
    pub fn expect_revision(self, snapshot: &Match) -> Self {
        self.expect(paths::REVISION, Value::from(snapshot.revision))
    }

    /// Record a hand for `slot` and mark it ready.
    pub fn submit_hand(self, slot: PlayerSlot, hand: Hand) -> Self {
        self.set(paths::seat_field(slot, "choice"), Value::from(hand.key()))
            .set(paths::seat_field(slot, "ready"), Value::Bool(true))
    }

    /// Clear both seats' hands and ready flags.
    pub fn clear_hands(self) -> Self {
        PlayerSlot::ALL.into_iter().fold(self, |update, slot| {
            update
                .set(paths::seat_field(slot, "choice"), Value::Null)
                .set(paths::seat_field(slot, "ready"), Value::Bool(false))
        })
    }

    /// Write a score.
    pub fn set_score(self, slot: PlayerSlot, score: u32) -> Self {
        self.set(paths::seat_field(slot, "score"), Value::from(score))
    }

    /// Back to the initiative phase.
    pub fn reset_initiative(self) -> Self {
        self.set(paths::CURRENT_ROUND, Value::from(0u32))
            .set(paths::ATTACKER, Value::Null)
    }

    /// Clear the negotiation record.
    pub fn clear_proposal(self) -> Self {
        self.set(paths::PROPOSAL_FROM, Value::Null)
            .set(paths::PROPOSAL_ACCEPTED, Value::Null)
    }

    /// Value that will be written at `path`, if any.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.sets.get(path)
    }

    /// Paths written, in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    /// Preconditions attached to this update.
    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    /// Nothing to write.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Check every precondition against `doc`.
    pub fn check(&self, doc: &Value) -> Result<(), UpdateError> {
        for condition in &self.preconditions {
            if !condition.holds(doc)? {
                return Err(UpdateError::PreconditionFailed(condition.path.clone()));
            }
        }
        Ok(())
    }

    /// Merge the writes into `doc`, creating intermediate objects.
    ///
    /// Preconditions are not checked here; see [`MatchUpdate::check`].
    pub fn merge_into(&self, doc: &mut Value) -> Result<(), UpdateError> {
        for (path, value) in &self.sets {
            let segments = split(path)?;
            let (leaf, parents) = segments
                .split_last()
                .ok_or_else(|| UpdateError::InvalidPath(path.clone()))?;

            let mut node = &mut *doc;
            for segment in parents {
                node = object_entry(node, segment)
                    .ok_or_else(|| UpdateError::InvalidPath(path.clone()))?;
            }
            let slot = object_entry(node, leaf)
                .ok_or_else(|| UpdateError::InvalidPath(path.clone()))?;
            *slot = value.clone();
        }
        Ok(())
    }

    /// Check, merge and re-validate against a typed snapshot.
    ///
    /// The returned match is what a store holding `current` would hold
    /// after accepting this update (the revision is left untouched).
    pub fn apply_to(&self, current: &Match) -> Result<Match, UpdateError> {
        let mut doc = serde_json::to_value(current)?;
        self.check(&doc)?;
        self.merge_into(&mut doc)?;
        Ok(serde_json::from_value(doc)?)
    }
}

fn slot_value(slot: Option<PlayerSlot>) -> Value {
    slot.map(|s| Value::from(s.key())).unwrap_or(Value::Null)
}

fn split(path: &str) -> Result<Vec<&str>, UpdateError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(UpdateError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Result<Option<&'a Value>, UpdateError> {
    let mut node = doc;
    for segment in split(path)? {
        match node.get(segment) {
            Some(next) => node = next,
            None => return Ok(None),
        }
    }
    Ok(Some(node))
}

/// Descend into `key`, replacing non-objects with an empty object.
fn object_entry<'a>(node: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    if !node.is_object() {
        *node = Value::Object(serde_json::Map::new());
    }
    node.as_object_mut()
        .map(|map| map.entry(key.to_string()).or_insert(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::code::{MatchCode, CODE_LENGTH};

    fn fresh() -> Match {
        Match::new(MatchCode::parse("QWE789", CODE_LENGTH).unwrap(), 0)
    }

    #[test]
    fn test_merge_leaf_paths() {
        let mut doc = json!({ "players": { "player1": { "score": 0, "joined": true } } });
        MatchUpdate::new()
            .set("players/player1/score", json!(1))
            .set("players/player2/joined", json!(true))
            .merge_into(&mut doc)
            .unwrap();

        assert_eq!(doc["players"]["player1"]["score"], 1);
        assert_eq!(doc["players"]["player1"]["joined"], true);
        assert_eq!(doc["players"]["player2"]["joined"], true);
    }

    #[test]
    fn test_precondition_absent_reads_null() {
        let doc = json!({ "proposal": {} });

        let ok = MatchUpdate::new().expect(paths::PROPOSAL_FROM, Value::Null);
        assert!(ok.check(&doc).is_ok());

        let fail = MatchUpdate::new().expect(paths::PROPOSAL_FROM, json!("player1"));
        assert!(matches!(fail.check(&doc), Err(UpdateError::PreconditionFailed(p)) if p == "proposal/from"));
    }

    #[test]
    fn test_expect_not_accepts_absent() {
        let update = MatchUpdate::new().expect_not("players/player2/joined", json!(true));

        assert!(update.check(&json!({ "players": { "player1": { "joined": true } } })).is_ok());
        assert!(update.check(&json!({ "players": { "player2": { "joined": false } } })).is_ok());
        assert!(matches!(
            update.check(&json!({ "players": { "player2": { "joined": true } } })),
            Err(UpdateError::PreconditionFailed(p)) if p == "players/player2/joined"
        ));
    }

    #[test]
    fn test_invalid_path() {
        let mut doc = json!({});
        let result = MatchUpdate::new().set("players//score", json!(1)).merge_into(&mut doc);
        assert!(matches!(result, Err(UpdateError::InvalidPath(_))));
    }

    #[test]
    fn test_apply_to_typed_match() {
        let m = fresh();
        let next = MatchUpdate::new()
            .submit_hand(PlayerSlot::Player1, Hand::Scissors)
            .apply_to(&m)
            .unwrap();

        assert!(next.players.player1.ready);
        assert_eq!(next.players.player1.choice, Some(Hand::Scissors));

        let cleared = MatchUpdate::new().clear_hands().apply_to(&next).unwrap();
        assert!(!cleared.players.player1.ready);
        assert_eq!(cleared.players.player1.choice, None);
    }

    #[test]
    fn test_apply_rejects_schema_breakage() {
        let m = fresh();
        let result = MatchUpdate::new().set(paths::STATE, json!("exploded")).apply_to(&m);
        assert!(matches!(result, Err(UpdateError::Schema(_))));
    }

    #[test]
    fn test_revision_precondition() {
        let mut m = fresh();
        m.revision = 4;
        let update = MatchUpdate::new().expect_revision(&m).set_phase(MatchPhase::Playing);

        assert!(update.apply_to(&m).is_ok());

        m.revision = 5;
        assert!(matches!(update.apply_to(&m), Err(UpdateError::PreconditionFailed(_))));
    }
}
