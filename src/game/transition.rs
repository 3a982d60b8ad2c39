//! Host Transitions
//!
//! Builds the writes the host applies after a round resolves, and the
//! lifecycle resets around a match. Every write carries preconditions
//! on the state it was planned from, so a stale plan fails instead of
//! silently overwriting a newer document.

use serde_json::{json, Value};

use crate::game::rules::{check_match_winner, RoundOutcome};
use crate::game::state::{Match, MatchPhase, PlayerSlot};
use crate::game::update::{paths, MatchUpdate};

/// Next state implied by a resolved round.
///
/// Guarded by the snapshot's revision: if anything was written since,
/// the store rejects the update and the host re-plans from the newer
/// snapshot.
pub fn plan_round(snapshot: &Match, outcome: &RoundOutcome) -> MatchUpdate {
    let base = MatchUpdate::new()
        .expect_revision(snapshot)
        .expect_phase(MatchPhase::Playing)
        .clear_hands();

    match *outcome {
        RoundOutcome::Draw { .. } => base,
        RoundOutcome::AttackerDecided { attacker, .. } => base
            .set_slot(paths::ATTACKER, Some(attacker))
            .set(paths::CURRENT_ROUND, Value::from(1u32)),
        RoundOutcome::Continue { attacker, .. } => base
            .set_slot(paths::ATTACKER, Some(attacker))
            .set(
                paths::CURRENT_ROUND,
                Value::from(snapshot.current_round.saturating_add(1)),
            ),
        RoundOutcome::GameOver { winner, .. } => {
            let score = snapshot.seat(winner).score.saturating_add(1);
            let (player1, player2) = match winner {
                PlayerSlot::Player1 => (score, snapshot.players.player2.score),
                PlayerSlot::Player2 => (snapshot.players.player1.score, score),
            };
            let base = base.set_score(winner, score);

            match check_match_winner(player1, player2, snapshot.win_threshold()) {
                Some(match_winner) => base
                    .set_phase(MatchPhase::Finished)
                    .set_slot(paths::WINNER, Some(match_winner)),
                // Best-of-3 continues: back to the initiative draw.
                None => base.reset_initiative(),
            }
        }
    }
}

/// Occupy the guest seat. Fails if somebody else got there first.
///
/// A document without a guest seat at all is joinable.
pub fn join_guest() -> MatchUpdate {
    MatchUpdate::new()
        .expect_not(paths::seat_field(PlayerSlot::Player2, "joined"), Value::Bool(true))
        .set(
            paths::seat(PlayerSlot::Player2),
            json!({ "joined": true, "ready": false, "choice": null, "score": 0 }),
        )
}

/// `waiting -> playing` once both seats are taken.
pub fn start_match() -> MatchUpdate {
    MatchUpdate::new()
        .expect_phase(MatchPhase::Waiting)
        .expect(paths::seat_field(PlayerSlot::Player2, "joined"), Value::Bool(true))
        .set_phase(MatchPhase::Playing)
        .reset_initiative()
        .clear_hands()
        .clear_proposal()
        .set_slot(paths::WINNER, None)
}

/// `finished -> playing` as a fresh single-round match.
pub fn rematch() -> MatchUpdate {
    fresh_scores(MatchUpdate::new().expect_phase(MatchPhase::Finished))
        .set_phase(MatchPhase::Playing)
        .set(paths::BEST_OF3, Value::Bool(false))
}

/// Back to the lobby with everything cleared.
pub fn full_reset() -> MatchUpdate {
    fresh_scores(MatchUpdate::new())
        .set_phase(MatchPhase::Waiting)
        .set(paths::BEST_OF3, Value::Bool(false))
}

/// `finished -> playing` as a best-of-3, applying an accepted offer.
///
/// Conditional on the offer still being recorded as accepted. The write
/// clears the offer, so a second application of the same acceptance
/// fails its precondition and scores are zeroed only once.
pub fn begin_best_of3(from: PlayerSlot) -> MatchUpdate {
    let update = MatchUpdate::new()
        .expect_phase(MatchPhase::Finished)
        .expect(paths::PROPOSAL_FROM, Value::from(from.key()))
        .expect(paths::PROPOSAL_ACCEPTED, Value::Bool(true));

    fresh_scores(update)
        .set_phase(MatchPhase::Playing)
        .set(paths::BEST_OF3, Value::Bool(true))
}

/// Drop a declined offer. The match stays finished.
pub fn clear_declined(from: PlayerSlot) -> MatchUpdate {
    MatchUpdate::new()
        .expect(paths::PROPOSAL_FROM, Value::from(from.key()))
        .expect(paths::PROPOSAL_ACCEPTED, Value::Bool(false))
        .clear_proposal()
}

fn fresh_scores(update: MatchUpdate) -> MatchUpdate {
    PlayerSlot::ALL
        .into_iter()
        .fold(update, |u, slot| u.set_score(slot, 0))
        .reset_initiative()
        .clear_hands()
        .clear_proposal()
        .set_slot(paths::WINNER, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::code::{MatchCode, CODE_LENGTH};
    use crate::game::rules::resolve_round;
    use crate::game::state::{Hand, Proposal};
    use crate::game::update::UpdateError;
    use serde_json::json;

    fn started() -> Match {
        let m = Match::new(MatchCode::parse("ZXC456", CODE_LENGTH).unwrap(), 0);
        let m = join_guest().apply_to(&m).unwrap();
        start_match().apply_to(&m).unwrap()
    }

    /// Submit both hands and apply whatever the host would write.
    fn play(m: &Match, p1: Hand, p2: Hand) -> Match {
        let submitted = MatchUpdate::new()
            .submit_hand(PlayerSlot::Player1, p1)
            .submit_hand(PlayerSlot::Player2, p2)
            .apply_to(m)
            .unwrap();
        let resolved = resolve_round(&submitted, PlayerSlot::Player1).unwrap();
        let next = plan_round(&submitted, &resolved.outcome).apply_to(&submitted).unwrap();
        assert!(next.check_invariants().is_ok(), "{:?}", next.check_invariants());
        next
    }

    #[test]
    fn test_join_and_start() {
        let m = started();
        assert!(m.both_joined());
        assert_eq!(m.state, MatchPhase::Playing);
        assert!(m.check_invariants().is_ok());
    }

    #[test]
    fn test_second_join_rejected() {
        let m = started();
        let result = join_guest().apply_to(&m);
        assert!(matches!(result, Err(UpdateError::PreconditionFailed(_))));
    }

    #[test]
    fn test_join_sparse_document() {
        // Room written without a guest seat.
        let doc = json!({
            "code": "ZXC456",
            "state": "waiting",
            "players": { "player1": { "joined": true, "ready": false, "choice": null, "score": 0 } },
            "currentRound": 0,
            "attacker": null,
            "bestOf3": false,
            "proposal": { "from": null, "accepted": null }
        });
        let update = join_guest();
        assert!(update.check(&doc).is_ok());

        let mut joined = doc.clone();
        update.merge_into(&mut joined).unwrap();
        assert_eq!(joined["players"]["player2"]["joined"], true);
        assert!(matches!(update.check(&joined), Err(UpdateError::PreconditionFailed(_))));
    }

    #[test]
    fn test_score_saturates() {
        let mut m = play(&started(), Hand::Rock, Hand::Scissors);
        m.best_of3 = true;
        m.players.player1.score = u32::MAX;

        let submitted = MatchUpdate::new()
            .submit_hand(PlayerSlot::Player1, Hand::Paper)
            .submit_hand(PlayerSlot::Player2, Hand::Paper)
            .apply_to(&m)
            .unwrap();
        let outcome = resolve_round(&submitted, PlayerSlot::Player1).unwrap().outcome;
        let next = plan_round(&submitted, &outcome).apply_to(&submitted).unwrap();

        assert_eq!(next.players.player1.score, u32::MAX);
        assert_eq!(next.state, MatchPhase::Finished);
        assert_eq!(next.winner, Some(PlayerSlot::Player1));
    }

    #[test]
    fn test_start_requires_guest() {
        let m = Match::new(MatchCode::parse("ZXC456", CODE_LENGTH).unwrap(), 0);
        assert!(start_match().apply_to(&m).is_err());
    }

    #[test]
    fn test_draw_keeps_round_and_attacker() {
        let m = play(&started(), Hand::Rock, Hand::Rock);

        assert_eq!(m.current_round, 0);
        assert_eq!(m.attacker, None);
        assert!(!m.players.player1.ready && !m.players.player2.ready);
    }

    #[test]
    fn test_initiative_then_transfer() {
        let m = play(&started(), Hand::Rock, Hand::Scissors);
        assert_eq!(m.attacker, Some(PlayerSlot::Player1));
        assert_eq!(m.current_round, 1);

        // Attacker rock, defender paper: defender takes over.
        let m = play(&m, Hand::Rock, Hand::Paper);
        assert_eq!(m.attacker, Some(PlayerSlot::Player2));
        assert_eq!(m.current_round, 2);

        // Attacker (player2) scissors beats paper: retained.
        let m = play(&m, Hand::Paper, Hand::Scissors);
        assert_eq!(m.attacker, Some(PlayerSlot::Player2));
        assert_eq!(m.current_round, 3);
    }

    #[test]
    fn test_single_round_mirror_finishes() {
        let m = play(&started(), Hand::Paper, Hand::Rock);
        let m = play(&m, Hand::Paper, Hand::Paper);

        assert_eq!(m.state, MatchPhase::Finished);
        assert_eq!(m.winner, Some(PlayerSlot::Player1));
        assert_eq!(m.players.player1.score, 1);
    }

    #[test]
    fn test_best_of3_reaches_two_nil() {
        let mut m = started();
        m.best_of3 = true;

        // Round one: player2 takes initiative and mirrors.
        let m = play(&m, Hand::Scissors, Hand::Rock);
        let m = play(&m, Hand::Paper, Hand::Paper);
        assert_eq!(m.state, MatchPhase::Playing);
        assert_eq!(m.players.player2.score, 1);
        assert_eq!(m.current_round, 0);
        assert_eq!(m.attacker, None);

        // Round two: same again.
        let m = play(&m, Hand::Paper, Hand::Scissors);
        let m = play(&m, Hand::Rock, Hand::Rock);
        assert_eq!(m.state, MatchPhase::Finished);
        assert_eq!(m.winner, Some(PlayerSlot::Player2));
        assert_eq!((m.players.player1.score, m.players.player2.score), (0, 2));
    }

    #[test]
    fn test_stale_plan_is_rejected() {
        let m = started();
        let submitted = MatchUpdate::new()
            .submit_hand(PlayerSlot::Player1, Hand::Rock)
            .submit_hand(PlayerSlot::Player2, Hand::Paper)
            .apply_to(&m)
            .unwrap();
        let outcome = resolve_round(&submitted, PlayerSlot::Player1).unwrap().outcome;
        let plan = plan_round(&submitted, &outcome);

        let mut newer = submitted.clone();
        newer.revision += 1;
        assert!(matches!(plan.apply_to(&newer), Err(UpdateError::PreconditionFailed(_))));
    }

    #[test]
    fn test_best_of3_applies_once() {
        let mut m = play(&started(), Hand::Paper, Hand::Rock);
        m = play(&m, Hand::Rock, Hand::Rock);
        assert_eq!(m.state, MatchPhase::Finished);

        m.proposal = Proposal { from: Some(PlayerSlot::Player2), accepted: Some(true) };

        let escalated = begin_best_of3(PlayerSlot::Player2).apply_to(&m).unwrap();
        assert!(escalated.best_of3);
        assert_eq!(escalated.state, MatchPhase::Playing);
        assert_eq!((escalated.players.player1.score, escalated.players.player2.score), (0, 0));
        assert_eq!(escalated.proposal, Proposal::default());
        assert!(escalated.check_invariants().is_ok());

        // Re-delivery of the accepted snapshot: the second attempt is refused.
        assert!(matches!(
            begin_best_of3(PlayerSlot::Player2).apply_to(&escalated),
            Err(UpdateError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn test_clear_declined() {
        let mut m = play(&started(), Hand::Paper, Hand::Rock);
        m = play(&m, Hand::Rock, Hand::Rock);
        m.proposal = Proposal { from: Some(PlayerSlot::Player1), accepted: Some(false) };

        let cleared = clear_declined(PlayerSlot::Player1).apply_to(&m).unwrap();
        assert_eq!(cleared.proposal, Proposal::default());
        assert_eq!(cleared.state, MatchPhase::Finished);
        assert_eq!(cleared.players.player1.score, 1);
    }

    #[test]
    fn test_rematch_and_reset() {
        let mut m = play(&started(), Hand::Paper, Hand::Rock);
        m = play(&m, Hand::Rock, Hand::Rock);

        let again = rematch().apply_to(&m).unwrap();
        assert_eq!(again.state, MatchPhase::Playing);
        assert_eq!(again.winner, None);
        assert_eq!(again.players.player1.score, 0);
        assert!(again.check_invariants().is_ok());

        // Rematch is only valid from finished.
        assert!(rematch().apply_to(&again).is_err());

        let lobby = full_reset().apply_to(&again).unwrap();
        assert_eq!(lobby.state, MatchPhase::Waiting);
        assert!(lobby.players.player2.joined);
        assert!(lobby.check_invariants().is_ok());
    }
}
