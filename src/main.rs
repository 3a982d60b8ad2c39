//! Mukjjippa Demo
//!
//! Two sessions play each other through an in-process room store: a
//! single match, then a best-of-3 offered by the guest and accepted by
//! the host.

use std::sync::Arc;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mukjjippa::{
    Hand, MemoryStore, SessionConfig, SessionController, SessionEvent, SessionEvents, VERSION,
};

/// Rounds after which a driver gives up.
const MAX_ROUNDS: u32 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Mukjjippa demo v{}", VERSION);

    let config = SessionConfig::from_env();
    let store = Arc::new(MemoryStore::new());

    let host = SessionController::create(store.clone(), &config).await?;
    info!("Room code: {}", host.code());

    // Guests type codes however they like.
    let typed = host.code().as_str().to_lowercase();
    let guest = SessionController::join(store.clone(), &typed, &config).await?;

    let host_events = host.observe().await?;
    let guest_events = guest.observe().await?;
    host.start_game().await?;

    let host_task = tokio::spawn(drive(host.clone(), host_events, 7));
    let guest_task = tokio::spawn(drive(guest.clone(), guest_events, 11));
    host_task.await??;
    guest_task.await??;

    guest.send_chat("gg").await?;
    for entry in store.chat(host.code()).await? {
        info!("[chat] {:?}: {}", entry.from, entry.message);
    }

    if let Some(m) = host.snapshot().await {
        info!(
            "Final: {:?} wins {}-{} (best-of-3: {})",
            m.winner, m.players.player1.score, m.players.player2.score, m.best_of3
        );
    }

    host.cleanup();
    guest.cleanup();
    Ok(())
}

/// Play one seat until the best-of-3 is decided.
async fn drive(session: SessionController, mut events: SessionEvents, seed: u64) -> anyhow::Result<()> {
    let me = session.slot();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut awaiting_echo = false;
    let mut best_of3 = false;
    let mut rounds = 0u32;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Snapshot(m) => {
                best_of3 = m.best_of3;
                let seat = m.seat(me);
                if seat.ready {
                    awaiting_echo = false;
                    continue;
                }
                if m.state != mukjjippa::MatchPhase::Playing || awaiting_echo {
                    continue;
                }
                if rounds >= MAX_ROUNDS {
                    warn!("{} giving up after {} rounds", me.key(), rounds);
                    return Ok(());
                }

                let hand = Hand::ALL[rng.gen_range(0..Hand::ALL.len())];
                match session.submit_choice(hand).await {
                    Ok(()) => awaiting_echo = true,
                    // A stale snapshot; the next one will tell.
                    Err(mukjjippa::SessionError::Conflict { path }) => debug!("{} submit skipped at {}", me.key(), path),
                    Err(e) => return Err(e.into()),
                }
            }
            SessionEvent::Round(round) => {
                rounds += 1;
                info!(
                    "{} round {}: {} vs {} -> {:?}",
                    me.key(),
                    round.round,
                    round.my_hand().key(),
                    round.opponent_hand().key(),
                    round.perspective()
                );
            }
            SessionEvent::MatchFinished { winner, won, scores } => {
                info!("{} sees {} win {}-{} (won: {})", me.key(), winner.key(), scores.0, scores.1, won);
                if best_of3 {
                    return Ok(());
                }
                if !session.is_host() {
                    session.propose().await?;
                }
            }
            SessionEvent::ProposalOffered { from } if from != me => {
                info!("{} accepts best-of-3 from {}", me.key(), from.key());
                session.respond(true).await?;
            }
            SessionEvent::BestOf3Started => info!("{} starting best-of-3", me.key()),
            SessionEvent::HostWriteFailed { error } => {
                warn!("{} host write failed: {}", me.key(), error);
                session.retry_pending().await?;
            }
            SessionEvent::Terminated { reason } => {
                warn!("{} terminated: {:?}", me.key(), reason);
                return Ok(());
            }
            other => debug!("{} event: {:?}", me.key(), other),
        }
    }

    Ok(())
}
