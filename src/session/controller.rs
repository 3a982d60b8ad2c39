//! Session Controller
//!
//! One player's handle on one room. Turns local intent (a hand, an offer,
//! an answer, a chat line) into store writes, and store snapshots into
//! [`SessionEvent`]s.
//!
//! There is no peer channel: the opponent is only ever seen through the
//! snapshots the store delivers. Both seats resolve every round locally
//! and must agree; only the host (`player1`) writes the resulting state.
//!
//! ```text
//!   RoomStore ──snapshot──▶ observer task ──▶ resolve_round ──▶ SessionEvents
//!       ▲                        │
//!       └──── conditional ◀──────┘ (host only: plan_round / negotiation)
//!             update
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::code::{CodeError, MatchCode};
use crate::core::hash::{short_hex, StateHash};
use crate::game::rules::resolve_round;
use crate::game::state::{Hand, Match, MatchPhase, PlayerSlot};
use crate::game::transition;
use crate::game::update::{paths, MatchUpdate};
use crate::session::config::SessionConfig;
use crate::session::events::{SessionEvent, SessionEvents, TerminationReason};
use crate::session::proposal::{self, NegotiationError, ProposalNegotiator};
use crate::store::{CancelHandle, ChatAuthor, ChatEntry, RoomSnapshot, RoomStore, StoreError};

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Code is malformed.
    #[error("invalid match code: {0}")]
    InvalidCode(#[from] CodeError),

    /// No match under this code.
    #[error("match {0} not found")]
    NotFound(MatchCode),

    /// The guest seat is taken.
    #[error("match {0} is full")]
    Full(MatchCode),

    /// The store refused to create or join the room.
    #[error("could not allocate match: {0}")]
    Allocation(StoreError),

    /// A conditional write found newer state.
    #[error("conflicting write at {path}")]
    Conflict {
        /// Path whose precondition failed.
        path: String,
    },

    /// The session was cleaned up or its room vanished.
    #[error("session terminated")]
    Terminated,

    /// Only the host may do this.
    #[error("only the host can do that")]
    NotHost,

    /// Operation does not fit the current match state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Offer or answer rejected locally.
    #[error("negotiation: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Any other store failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PreconditionFailed { path } => SessionError::Conflict { path },
            StoreError::NotFound(_) => SessionError::Terminated,
            other => SessionError::Store(other),
        }
    }
}

/// Mutable per-session view, touched by one snapshot at a time.
struct View {
    /// Latest snapshot.
    latest: Option<Match>,
    /// Round fingerprint already resolved.
    resolved: Option<StateHash>,
    /// Finished snapshot already reported.
    finished: Option<StateHash>,
    /// Negotiation view.
    negotiator: ProposalNegotiator,
}

struct Inner {
    store: Arc<dyn RoomStore>,
    code: MatchCode,
    slot: PlayerSlot,
    client_id: Uuid,
    view: Mutex<View>,
    /// Set by `cleanup`; stops all delivery.
    closed: Arc<AtomicBool>,
    /// Set when the room vanished; stops all writes.
    terminated: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    events_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    subscription: std::sync::Mutex<Option<CancelHandle>>,
}

/// A seated player's session. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    fn new(store: Arc<dyn RoomStore>, code: MatchCode, slot: PlayerSlot) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let client_id = Uuid::new_v4();
        info!("Session {} seated as {} in match {}", client_id, slot.key(), code);

        Self {
            inner: Arc::new(Inner {
                store,
                code,
                slot,
                client_id,
                view: Mutex::new(View {
                    latest: None,
                    resolved: None,
                    finished: None,
                    negotiator: ProposalNegotiator::new(slot),
                }),
                closed: Arc::new(AtomicBool::new(false)),
                terminated: AtomicBool::new(false),
                shutdown_tx,
                events_tx: std::sync::Mutex::new(None),
                subscription: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Create a room and take the host seat.
    ///
    /// Generates a fresh code for each attempt and retries on collision.
    #[instrument(skip(store, config))]
    pub async fn create(store: Arc<dyn RoomStore>, config: &SessionConfig) -> Result<Self, SessionError> {
        let attempts = config.max_create_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let code = MatchCode::generate(&mut rand::thread_rng(), config.code_length);
            let initial = Match::new(code, chrono::Utc::now().timestamp_millis());

            match store.create(&initial).await {
                Ok(code) => return Ok(Self::new(store, code, PlayerSlot::Player1)),
                Err(StoreError::AlreadyExists(code)) => {
                    warn!("Code {} already taken (attempt {}/{})", code, attempt, attempts);
                    last_error = Some(StoreError::AlreadyExists(code));
                }
                Err(e) => return Err(SessionError::Allocation(e)),
            }
        }

        Err(SessionError::Allocation(last_error.unwrap_or_else(|| {
            StoreError::Unavailable("no code attempts made".to_string())
        })))
    }

    /// Join an existing room as the guest.
    ///
    /// The code is matched case-insensitively.
    #[instrument(skip(store, config))]
    pub async fn join(store: Arc<dyn RoomStore>, input: &str, config: &SessionConfig) -> Result<Self, SessionError> {
        let code = MatchCode::parse(input, config.code_length)?;

        let snapshot = match store.get(&code).await {
            Ok(snapshot) => snapshot,
            Err(StoreError::NotFound(code)) => return Err(SessionError::NotFound(code)),
            Err(e) => return Err(SessionError::Store(e)),
        };
        if snapshot.players.player2.joined {
            return Err(SessionError::Full(code));
        }

        match store.update(&code, &transition::join_guest()).await {
            Ok(_) => Ok(Self::new(store, code, PlayerSlot::Player2)),
            // Somebody else took the seat between the read and the write.
            Err(StoreError::PreconditionFailed { .. }) => Err(SessionError::Full(code)),
            Err(StoreError::NotFound(code)) => Err(SessionError::NotFound(code)),
            Err(e) => Err(SessionError::Allocation(e)),
        }
    }

    /// Room code.
    pub fn code(&self) -> &MatchCode {
        &self.inner.code
    }

    /// This session's seat.
    pub fn slot(&self) -> PlayerSlot {
        self.inner.slot
    }

    /// Whether this session writes state transitions.
    pub fn is_host(&self) -> bool {
        self.inner.slot.is_host()
    }

    /// Random id of this client instance, for log correlation.
    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    /// `cleanup` was called or the room vanished.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Latest observed snapshot, if observing.
    pub async fn snapshot(&self) -> Option<Match> {
        self.inner.view.lock().await.latest.clone()
    }

    /// Submit a hand for the current round.
    pub async fn submit_choice(&self, hand: Hand) -> Result<(), SessionError> {
        let slot = self.inner.slot;
        let update = MatchUpdate::new()
            .expect_phase(MatchPhase::Playing)
            .expect(paths::seat_field(slot, "ready"), serde_json::Value::Bool(false))
            .submit_hand(slot, hand);

        self.inner.write(&update).await?;
        debug!("{} submitted {}", slot.key(), hand.key());
        Ok(())
    }

    /// Offer a best-of-3 after a finished match.
    pub async fn propose(&self) -> Result<(), SessionError> {
        let snapshot = self.inner.fetch().await?;
        let update = proposal::offer(self.inner.slot, &snapshot)?;
        self.inner.write(&update).await?;
        info!("{} offered best-of-3 in {}", self.inner.slot.key(), self.inner.code);
        Ok(())
    }

    /// Answer the opponent's best-of-3 offer.
    pub async fn respond(&self, accepted: bool) -> Result<(), SessionError> {
        let snapshot = self.inner.fetch().await?;
        let update = proposal::answer(self.inner.slot, &snapshot, accepted)?;
        self.inner.write(&update).await?;
        info!("{} answered best-of-3 offer: {}", self.inner.slot.key(), accepted);
        Ok(())
    }

    /// Post a chat line.
    pub async fn send_chat(&self, message: &str) -> Result<(), SessionError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SessionError::InvalidState("empty chat message"));
        }
        self.inner.ensure_open()?;

        let entry = ChatEntry::new(ChatAuthor::Player(self.inner.slot), message);
        let result = self.inner.store.append(&self.inner.code, entry).await;
        self.inner.settle(result)
    }

    /// Host: start the match once both seats are taken.
    pub async fn start_game(&self) -> Result<(), SessionError> {
        self.require_host()?;
        let snapshot = self.inner.fetch().await?;
        if snapshot.state != MatchPhase::Waiting {
            return Err(SessionError::InvalidState("match already started"));
        }
        if !snapshot.both_joined() {
            return Err(SessionError::InvalidState("waiting for the second player"));
        }

        self.inner.write(&transition::start_match()).await?;
        info!("Match {} started", self.inner.code);
        self.inner.notify("Match started").await;
        Ok(())
    }

    /// Host: play a fresh single-round match after one finished.
    pub async fn rematch(&self) -> Result<(), SessionError> {
        self.require_host()?;
        let snapshot = self.inner.fetch().await?;
        if snapshot.state != MatchPhase::Finished {
            return Err(SessionError::InvalidState("match not finished"));
        }

        self.inner.write(&transition::rematch()).await?;
        info!("Match {} restarted", self.inner.code);
        self.inner.notify("Rematch started").await;
        Ok(())
    }

    /// Host: back to the lobby with scores and negotiation cleared.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.require_host()?;
        self.inner.write(&transition::full_reset()).await?;
        info!("Match {} reset", self.inner.code);
        self.inner.notify("Match reset").await;
        Ok(())
    }

    /// Host: write whatever transition the stored state still owes.
    ///
    /// Re-plans from a fresh read, ignoring what was already observed.
    /// Used after [`SessionEvent::HostWriteFailed`]. Returns whether
    /// anything was written.
    pub async fn retry_pending(&self) -> Result<bool, SessionError> {
        self.require_host()?;
        let snapshot = self.inner.fetch().await?;

        let mut writes = Vec::new();
        if snapshot.state == MatchPhase::Playing {
            if let Some(resolved) = resolve_round(&snapshot, self.inner.slot) {
                writes.push(transition::plan_round(&snapshot, &resolved.outcome));
            }
        }
        if let Some(action) = proposal::pending_host_action(&snapshot) {
            writes.push(action.update());
        }

        for update in &writes {
            self.inner.write(update).await?;
        }
        if !writes.is_empty() {
            info!("Match {} caught up {} pending write(s) at r{}", self.inner.code, writes.len(), snapshot.revision);
        }
        Ok(!writes.is_empty())
    }

    /// Start following the room.
    ///
    /// Snapshots are processed one at a time, in delivery order, on a
    /// background task. Only one observer per session.
    pub async fn observe(&self) -> Result<SessionEvents, SessionError> {
        self.inner.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut events_tx = lock(&self.inner.events_tx);
            if events_tx.is_some() {
                return Err(SessionError::InvalidState("already observing"));
            }
            *events_tx = Some(tx);
        }

        let mut subscription = match self.inner.store.subscribe(&self.inner.code).await {
            Ok(subscription) => subscription,
            Err(e) => {
                lock(&self.inner.events_tx).take();
                return Err(e.into());
            }
        };
        *lock(&self.inner.subscription) = Some(subscription.cancel_handle());

        // Subscribe before the closed check so a concurrent cleanup is seen.
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        if self.inner.closed.load(Ordering::SeqCst) {
            subscription.cancel();
            return Err(SessionError::Terminated);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    next = subscription.recv() => match next {
                        Some(snapshot) => {
                            if !inner.process(snapshot).await {
                                break;
                            }
                        }
                        None => {
                            if !inner.closed.load(Ordering::SeqCst) {
                                inner.terminate(TerminationReason::StoreClosed);
                            }
                            break;
                        }
                    }
                }
            }
            subscription.cancel();
            debug!("Observer for {} stopped", inner.code);
        });

        Ok(SessionEvents::new(rx, self.inner.closed.clone()))
    }

    /// Release the subscription. Idempotent.
    ///
    /// No event is delivered after this returns. Writes already in flight
    /// complete, but their results are discarded.
    pub fn cleanup(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.inner.subscription).take() {
            handle.cancel();
        }
        let _ = self.inner.shutdown_tx.send(());
        lock(&self.inner.events_tx).take();
        info!("Session {} left match {}", self.inner.client_id, self.inner.code);
    }

    fn require_host(&self) -> Result<(), SessionError> {
        if self.is_host() {
            Ok(())
        } else {
            Err(SessionError::NotHost)
        }
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) || self.terminated.load(Ordering::SeqCst) {
            Err(SessionError::Terminated)
        } else {
            Ok(())
        }
    }

    fn is_stopped(&self) -> bool {
        self.ensure_open().is_err()
    }

    /// Map a store result. A vanished room terminates the session; any
    /// result is discarded once the session closed.
    fn settle<T>(&self, result: Result<T, StoreError>) -> Result<T, SessionError> {
        self.ensure_open()?;
        match result {
            Err(StoreError::NotFound(_)) => {
                self.terminate(TerminationReason::RoomDeleted);
                Err(SessionError::Terminated)
            }
            other => Ok(other?),
        }
    }

    async fn fetch(&self) -> Result<Match, SessionError> {
        self.ensure_open()?;
        let result = self.store.get(&self.code).await;
        self.settle(result)
    }

    /// Conditional write.
    async fn write(&self, update: &MatchUpdate) -> Result<u64, SessionError> {
        self.ensure_open()?;
        let result = self.store.update(&self.code, update).await;
        self.settle(result)
    }

    /// Post a system line to the room chat. Failures are only logged.
    async fn notify(&self, message: &str) {
        let entry = ChatEntry::new(ChatAuthor::System, message);
        if let Err(e) = self.store.append(&self.code, entry).await {
            warn!("System notice for {} not posted: {}", self.code, e);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = lock(&self.events_tx).as_ref() {
            let _ = tx.send(event);
        }
    }

    fn terminate(&self, reason: TerminationReason) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Match {} terminated: {:?}", self.code, reason);
        self.emit(SessionEvent::Terminated { reason });
        lock(&self.events_tx).take();
    }

    /// Handle one delivery. Returns `false` when observation should stop.
    async fn process(&self, snapshot: RoomSnapshot) -> bool {
        if self.is_stopped() {
            return false;
        }
        let snapshot = match snapshot {
            RoomSnapshot::Present(snapshot) => snapshot,
            RoomSnapshot::Deleted => {
                self.terminate(TerminationReason::RoomDeleted);
                return false;
            }
        };

        let mut writes = Vec::new();
        let mut notices = Vec::new();
        {
            let mut view = self.view.lock().await;

            if let Some(latest) = &view.latest {
                if snapshot.revision < latest.revision {
                    debug!("Dropping stale snapshot r{} (have r{})", snapshot.revision, latest.revision);
                    return true;
                }
            }
            if let Err(rule) = snapshot.check_invariants() {
                warn!("Match {} r{} violates invariant: {}", self.code, snapshot.revision, rule);
            }
            view.latest = Some((*snapshot).clone());
            self.emit(SessionEvent::Snapshot(snapshot.clone()));

            self.observe_round(&mut view, &snapshot, &mut writes);
            if let Some(winner) = self.observe_finish(&mut view, &snapshot) {
                notices.push(format!("{} wins the match", winner.key()));
            }

            let step = view.negotiator.observe(&snapshot);
            for event in step.events {
                if event == SessionEvent::BestOf3Started {
                    notices.push("Best-of-3 started".to_string());
                }
                self.emit(event);
            }
            if let Some(action) = step.action {
                debug!("Host applying {:?}", action);
                writes.push(action.update());
            }
        }

        for update in writes {
            if self.is_stopped() {
                return false;
            }
            let failure = match self.store.update(&self.code, &update).await {
                Ok(revision) => {
                    debug!("Host write accepted at r{}", revision);
                    continue;
                }
                Err(StoreError::PreconditionFailed { path }) => {
                    // Newer state exists; it will be delivered and re-planned.
                    debug!("Host write rejected at {}", path);
                    None
                }
                Err(StoreError::NotFound(_)) => {
                    self.terminate(TerminationReason::RoomDeleted);
                    return false;
                }
                Err(e) => {
                    warn!("Host write failed: {}", e);
                    Some(e.to_string())
                }
            };

            {
                let mut view = self.view.lock().await;
                view.resolved = None;
                view.negotiator.forget();
            }
            if let Some(error) = failure {
                self.emit(SessionEvent::HostWriteFailed { error });
            }
        }

        // Only the host posts notices, so each appears once.
        if self.slot.is_host() {
            for notice in notices {
                if self.is_stopped() {
                    return false;
                }
                self.notify(&notice).await;
            }
        }

        !self.is_stopped()
    }

    fn observe_round(&self, view: &mut View, snapshot: &Match, writes: &mut Vec<MatchUpdate>) {
        let resolved = match snapshot.state {
            MatchPhase::Playing => resolve_round(snapshot, self.slot),
            _ => None,
        };
        let Some(resolved) = resolved else {
            // Hands were cleared; the next pair is a new round even if
            // it repeats the last one exactly.
            view.resolved = None;
            return;
        };

        let fingerprint = snapshot.round_fingerprint();
        if view.resolved == Some(fingerprint) {
            return;
        }
        view.resolved = Some(fingerprint);

        debug!(
            "Round {} [{}] for {}: {} ({} vs {})",
            resolved.round,
            short_hex(&fingerprint),
            self.slot.key(),
            resolved.outcome.label(),
            resolved.my_hand().key(),
            resolved.opponent_hand().key(),
        );
        self.emit(SessionEvent::Round(resolved));

        if self.slot.is_host() {
            writes.push(transition::plan_round(snapshot, &resolved.outcome));
        }
    }

    /// Report a newly finished match. Returns the winner the first time.
    fn observe_finish(&self, view: &mut View, snapshot: &Match) -> Option<PlayerSlot> {
        let winner = match (snapshot.state, snapshot.winner) {
            (MatchPhase::Finished, Some(winner)) => winner,
            _ => {
                view.finished = None;
                return None;
            }
        };

        let fingerprint = snapshot.round_fingerprint();
        if view.finished == Some(fingerprint) {
            return None;
        }
        view.finished = Some(fingerprint);

        let scores = (snapshot.players.player1.score, snapshot.players.player2.score);
        info!("Match {} finished: {} wins {}-{}", self.code, winner.key(), scores.0, scores.1);
        self.emit(SessionEvent::MatchFinished {
            winner,
            won: winner == self.slot,
            scores,
        });
        Some(winner)
    }
}

/// Poison-tolerant lock for the short, non-async critical sections.
fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
