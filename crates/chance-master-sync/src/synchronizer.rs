//! Game-state synchronizer.
//!
//! Seeds the four session entities from the indexer, keeps one live
//! subscription per entity, and republishes a [`LocalProjection`] after
//! every relevant write.
//!
//! ## Flow
//!
//! ```text
//! attach(id)
//!   ├─ seed session / board / clock / claim (concurrently)
//!   ├─ subscribe per entity ──► forwarder task ──┐
//!   └─ publish projection                        │
//!                                                ▼
//!                          inbox (tagged with generation)
//!                                                │
//!                              handle() ◄────────┘
//!                                ├─ replace the snapshot of that channel
//!                                ├─ emit transition events
//!                                └─ recompute + publish projection
//! ```
//!
//! Channels are unordered relative to each other and each one only
//! replaces its own snapshot. Everything that mutates state goes through
//! `&mut self`, so handlers never interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use chance_master_core::{
    is_in_check, parse_position, BoardSnapshot, ClockBase, ClockDisplay, ClockEngine,
    ClockSnapshot, CodecError, EntityId, GameStatus, PlayerAddress, Position, SessionId,
    SessionSnapshot, Side, SystemClock, TimeSource,
};
use chance_master_indexer::{Indexer, ModelUpdate, Subscription};

use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::projection::{compute, LocalProjection, Overlay, OverlayBoard, ProjectionInputs};
use crate::timer::Deferred;

/// Configuration for the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long an optimistic move may stay unconfirmed before it is
    /// reverted.
    pub reconcile_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

/// A message delivered to the synchronizer's inbox.
#[derive(Debug)]
pub struct Inbound {
    generation: u64,
    kind: InboundKind,
}

#[derive(Debug)]
enum InboundKind {
    Updates(Vec<ModelUpdate>),
    ReconcileTimeout(u64),
}

/// Confirmed state of the attached session plus the optimistic overlay.
#[derive(Debug)]
struct SessionState {
    session: SessionSnapshot,
    board: BoardSnapshot,
    clock: ClockSnapshot,
    overlay: Overlay,
}

struct Forwarder {
    entity: EntityId,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Keeps the local projection of one session in step with the indexer.
pub struct Synchronizer<I: Indexer + ?Sized> {
    indexer: Arc<I>,
    config: SyncConfig,
    time: Arc<dyn TimeSource>,

    /// The local player, if known.
    me: Option<PlayerAddress>,

    /// Bumped on every teardown; inbound messages of older generations are
    /// discarded.
    generation: u64,
    state: Option<SessionState>,

    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    forwarders: Vec<Forwarder>,

    events: broadcast::Sender<SyncEvent>,
    seeded: watch::Sender<Option<SessionId>>,

    projection: Option<LocalProjection>,
    last_fingerprint: Option<[u8; 32]>,
    last_position: Option<String>,
    last_codec_error: Option<CodecError>,

    proving: bool,
    reconcile: Deferred,
    clock: ClockEngine,
}

impl<I: Indexer + ?Sized> Synchronizer<I> {
    /// Create a synchronizer reading wall-clock time from the system.
    pub fn new(indexer: Arc<I>, config: SyncConfig) -> Self {
        Self::with_time_source(indexer, config, Arc::new(SystemClock))
    }

    /// Create a synchronizer with an explicit time source.
    pub fn with_time_source(
        indexer: Arc<I>,
        config: SyncConfig,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (seeded, _) = watch::channel(None);
        Self {
            indexer,
            config,
            time,
            me: None,
            generation: 0,
            state: None,
            inbox_tx,
            inbox_rx,
            forwarders: Vec::new(),
            events,
            seeded,
            projection: None,
            last_fingerprint: None,
            last_position: None,
            last_codec_error: None,
            proving: false,
            reconcile: Deferred::new(),
            clock: ClockEngine::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn projection(&self) -> Option<&LocalProjection> {
        self.projection.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.as_ref().map(|s| s.session.id)
    }

    pub fn identity(&self) -> Option<&PlayerAddress> {
        self.me.as_ref()
    }

    /// The currently rendered position.
    pub fn position(&self) -> Result<Position> {
        let projection = self.projection.as_ref().ok_or(SyncError::NotAttached)?;
        Ok(parse_position(&projection.position)?)
    }

    pub fn clock_display(&self) -> ClockDisplay {
        self.clock.display()
    }

    /// Whether `side` has flagged on the current clock base.
    pub fn is_flagged(&self, side: Side) -> bool {
        self.clock.is_flagged(side)
    }

    pub fn is_proving(&self) -> bool {
        self.proving
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<SyncEvent> {
        self.events.clone()
    }

    /// Which session (if any) has finished seeding.
    pub fn seeded(&self) -> watch::Receiver<Option<SessionId>> {
        self.seeded.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach to a session, replacing any previous one.
    ///
    /// Fails with [`SyncError::SessionNotFound`] if any of the four entities
    /// is missing, in which case nothing stays attached.
    pub async fn attach(&mut self, id: SessionId) -> Result<()> {
        self.detach();
        let generation = self.generation;
        debug!(session = %id, generation, "attaching");

        // 1. Seed all four entities concurrently.
        let indexer = self.indexer.clone();
        let (session, board, clock, claim) = tokio::join!(
            indexer.session(id),
            indexer.board(id),
            indexer.clock(id),
            indexer.claim(id),
        );
        let (Some(session), Some(board), Some(clock), Some(claim)) =
            (session?, board?, clock?, claim?)
        else {
            warn!(session = %id, "session seed incomplete");
            return Err(SyncError::SessionNotFound(id));
        };

        // 2. Subscribe to each entity that has a remote identifier.
        let channels = [
            ("session", session.entity_id),
            ("board", board.entity_id),
            ("clock", clock.entity_id),
            ("claim", claim.entity_id),
        ];
        let mut subscriptions = Vec::new();
        for (channel, entity) in channels {
            match entity {
                Some(entity) => subscriptions.push((channel, indexer.subscribe(&entity).await?)),
                None => debug!(session = %id, channel, "no entity id; not subscribing"),
            }
        }
        for (channel, subscription) in subscriptions {
            self.forward(channel, subscription);
        }

        // 3. Install the confirmed state.
        let mut session = session.model;
        session.claim = claim.model.claim;
        self.clock
            .set_base(ClockBase::from_snapshot(&clock.model, session.turn));
        self.state = Some(SessionState {
            session,
            board: board.model,
            clock: clock.model,
            overlay: Overlay::default(),
        });
        self.seeded.send_replace(Some(id));
        info!(session = %id, generation, "session seeded");

        let mut events = Vec::new();
        self.refresh(&mut events);
        self.publish(&events);
        Ok(())
    }

    /// Tear down the attached session: close all subscriptions, cancel
    /// timers and forget all state.
    pub fn detach(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.closed.store(true, Ordering::SeqCst);
            forwarder.task.abort();
            trace!(entity = %forwarder.entity, "subscription closed");
        }
        self.reconcile.cancel();
        if let Some(state) = self.state.take() {
            debug!(session = %state.session.id, generation = self.generation, "detached");
        }
        self.generation += 1;
        self.projection = None;
        self.last_fingerprint = None;
        self.last_position = None;
        self.last_codec_error = None;
        self.proving = false;
        self.clock = ClockEngine::new();
        self.seeded.send_replace(None);
    }

    fn forward(&mut self, channel: &'static str, mut subscription: Subscription) {
        let tx = self.inbox_tx.clone();
        let generation = self.generation;
        let entity = subscription.entity().clone();
        let closed = subscription.closed_flag();
        let task = tokio::spawn(async move {
            while let Some(batch) = subscription.next().await {
                let inbound = Inbound {
                    generation,
                    kind: InboundKind::Updates(batch),
                };
                if tx.send(inbound).is_err() {
                    break;
                }
            }
            trace!(entity = %subscription.entity(), channel, "forwarder finished");
        });
        self.forwarders.push(Forwarder {
            entity,
            closed,
            task,
        });
    }

    /// Set (or clear) the local player.
    pub fn set_identity(&mut self, me: Option<PlayerAddress>) {
        self.me = me;
        let mut events = Vec::new();
        self.refresh(&mut events);
        self.publish(&events);
    }

    /// Mark a proof as in flight. Freezes the clock at its current reading.
    pub fn set_proving(&mut self, proving: bool) {
        if proving && !self.proving {
            let now = self.time.now_ms();
            let flagged = self.clock.tick(now, false);
            let mut events: Vec<SyncEvent> = flagged.into_iter().map(SyncEvent::Flagged).collect();
            self.proving = true;
            self.refresh(&mut events);
            self.publish(&events);
        } else if !proving && self.proving {
            self.proving = false;
            let mut events = Vec::new();
            self.refresh(&mut events);
            self.publish(&events);
        }
    }

    /// Advance the clock display. Returns flag events, at most one per side
    /// per clock base.
    pub fn tick(&mut self) -> Vec<SyncEvent> {
        if self.state.is_none() {
            return Vec::new();
        }
        let now = self.time.now_ms();
        let events: Vec<SyncEvent> = self
            .clock
            .tick(now, self.proving)
            .into_iter()
            .inspect(|side| info!(side = %side, "flagged"))
            .map(SyncEvent::Flagged)
            .collect();
        self.publish(&events);
        events
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbox
    // ─────────────────────────────────────────────────────────────────────────

    /// Wait for the next inbound message and handle it.
    pub async fn pump(&mut self) -> Vec<SyncEvent> {
        match self.inbox_rx.recv().await {
            Some(inbound) => self.handle(inbound),
            None => Vec::new(),
        }
    }

    /// Handle every inbound message already queued.
    pub fn pump_pending(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(inbound) = self.inbox_rx.try_recv() {
            events.extend(self.handle(inbound));
        }
        events
    }

    /// Handle one inbound message and return the events it produced.
    pub fn handle(&mut self, inbound: Inbound) -> Vec<SyncEvent> {
        if inbound.generation != self.generation {
            trace!(
                generation = inbound.generation,
                current = self.generation,
                "discarding stale message"
            );
            return Vec::new();
        }

        let mut events = Vec::new();
        match inbound.kind {
            InboundKind::Updates(batch) => {
                for update in batch {
                    self.apply_update(update, &mut events);
                }
            }
            InboundKind::ReconcileTimeout(token) => {
                if !self.reconcile.accept(token) {
                    return Vec::new();
                }
                self.revert_optimistic(&mut events);
            }
        }
        self.refresh(&mut events);
        self.publish(&events);
        events
    }

    fn apply_update(&mut self, update: ModelUpdate, events: &mut Vec<SyncEvent>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let session_id = state.session.id;
        if update.session_id() != Some(session_id) {
            trace!(session = %session_id, "ignoring update for another session");
            return;
        }

        match update {
            ModelUpdate::Session(mut next) => {
                trace!(session = %session_id, channel = "session", "update");
                next.claim = state.session.claim;
                draw_transitions(&state.session, &next, events);
                if !state.session.result.is_decided() && next.result.is_decided() {
                    info!(session = %session_id, result = ?next.result, "game ended");
                    events.push(SyncEvent::GameEnded(next.result));
                }
                // Only a session that hands the turn over (or ends the game)
                // supersedes an optimistic move.
                let supersedes =
                    next.turn != state.session.turn || next.status != GameStatus::Active;
                state.session = next;
                if supersedes {
                    state.overlay.board = None;
                    state.overlay.dice_cleared = false;
                }
                if state.overlay.clock.is_none() {
                    refresh_clock_base(&mut self.clock, &state.clock, state.session.turn);
                }
            }
            ModelUpdate::Board { board, .. } => {
                trace!(session = %session_id, channel = "board", "update");
                state.board = board;
                state.overlay.board = None;
            }
            ModelUpdate::Clock { clock, .. } => {
                trace!(session = %session_id, channel = "clock", "update");
                state.clock = clock;
                if state.overlay.clock.take().is_some() {
                    self.clock
                        .set_base(ClockBase::from_snapshot(&state.clock, state.session.turn));
                } else {
                    refresh_clock_base(&mut self.clock, &state.clock, state.session.turn);
                }
            }
            ModelUpdate::Claim { claim, .. } => {
                trace!(session = %session_id, channel = "claim", "update");
                if claim.claim != state.session.claim {
                    events.push(SyncEvent::ClaimChanged {
                        from: state.session.claim,
                        to: claim.claim,
                    });
                    state.session.claim = claim.claim;
                }
            }
            ModelUpdate::Player(_) => {}
        }

        if state.overlay.is_empty() && self.reconcile.is_armed() {
            debug!(session = %session_id, "optimistic move reconciled");
            self.reconcile.cancel();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Optimistic overlay
    // ─────────────────────────────────────────────────────────────────────────

    /// Show `post` as the current position ahead of confirmation: dice
    /// cleared, clock rebased with the turn handed over.
    ///
    /// Skipped (returning false) if the confirmed session no longer has
    /// `mover` to move.
    pub fn apply_optimistic(&mut self, post: &Position, mover: Side) -> bool {
        let Some(state) = self.state.as_mut() else {
            return false;
        };
        if state.session.turn != mover || state.session.status != GameStatus::Active {
            debug!(
                session = %state.session.id,
                mover = %mover,
                turn = %state.session.turn,
                "turn moved on while proving; skipping optimistic apply"
            );
            return false;
        }

        let next = post.side_to_move;
        let base = self.clock.rebase_to(self.time.now_ms(), next);
        state.overlay = Overlay {
            board: Some(OverlayBoard {
                position: post.to_position_string(),
                turn: next,
                white_in_check: is_in_check(post, Side::White),
                black_in_check: is_in_check(post, Side::Black),
            }),
            dice_cleared: true,
            clock: Some(base),
        };

        let generation = self.generation;
        self.reconcile.arm(
            self.config.reconcile_timeout,
            self.inbox_tx.clone(),
            move |token| Inbound {
                generation,
                kind: InboundKind::ReconcileTimeout(token),
            },
        );

        let mut events = Vec::new();
        self.refresh(&mut events);
        self.publish(&events);
        true
    }

    fn revert_optimistic(&mut self, events: &mut Vec<SyncEvent>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.overlay.is_empty() {
            return;
        }
        warn!(session = %state.session.id, "optimistic move not confirmed; reverting");
        state.overlay = Overlay::default();
        self.clock
            .set_base(ClockBase::from_snapshot(&state.clock, state.session.turn));
        events.push(SyncEvent::OptimisticReverted);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Projection
    // ─────────────────────────────────────────────────────────────────────────

    fn refresh(&mut self, events: &mut Vec<SyncEvent>) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let clock = self
            .clock
            .base()
            .copied()
            .unwrap_or_else(|| ClockBase::from_snapshot(&state.clock, state.session.turn));
        let (projection, codec_error) = compute(ProjectionInputs {
            session: &state.session,
            board: &state.board,
            overlay: Some(&state.overlay),
            clock,
            me: self.me.as_ref(),
            busy: self.proving,
            last_position: self.last_position.as_deref(),
        });

        match codec_error {
            Some(e) => {
                if self.last_codec_error.as_ref() != Some(&e) {
                    warn!(session = %state.session.id, error = %e, "board codec failed");
                    events.push(SyncEvent::CodecFailed(e.clone()));
                }
                self.last_codec_error = Some(e);
            }
            None => {
                self.last_codec_error = None;
                self.last_position = Some(projection.position.clone());
            }
        }

        let fingerprint = projection.fingerprint();
        if self.last_fingerprint != Some(fingerprint) {
            self.last_fingerprint = Some(fingerprint);
            events.push(SyncEvent::ProjectionChanged(Box::new(projection.clone())));
        }
        self.projection = Some(projection);
    }

    fn publish(&self, events: &[SyncEvent]) {
        for event in events {
            // No receivers is fine.
            let _ = self.events.send(event.clone());
        }
    }
}

impl<I: Indexer + ?Sized> Drop for Synchronizer<I> {
    fn drop(&mut self) {
        for forwarder in self.forwarders.drain(..) {
            forwarder.closed.store(true, Ordering::SeqCst);
            forwarder.task.abort();
        }
    }
}

fn refresh_clock_base(engine: &mut ClockEngine, snapshot: &ClockSnapshot, turn: Side) {
    let base = ClockBase::from_snapshot(snapshot, turn);
    if engine.base() != Some(&base) {
        engine.set_base(base);
    }
}

/// Draw-offer events for one session transition.
///
/// Each side going false→true is an offer. When offers disappear: if none
/// is left the offer is cleared, otherwise each side that dropped its own
/// offer withdrew it.
fn draw_transitions(prev: &SessionSnapshot, next: &SessionSnapshot, events: &mut Vec<SyncEvent>) {
    let sides = [Side::White, Side::Black];
    for side in sides {
        if !prev.draw_offered(side) && next.draw_offered(side) {
            events.push(SyncEvent::DrawOffered(side));
        }
    }

    let dropped: Vec<Side> = sides
        .into_iter()
        .filter(|s| prev.draw_offered(*s) && !next.draw_offered(*s))
        .collect();
    if dropped.is_empty() {
        return;
    }
    if !next.white_draw_offered && !next.black_draw_offered {
        events.push(SyncEvent::DrawOfferCleared);
    } else {
        events.extend(dropped.into_iter().map(SyncEvent::DrawOfferWithdrawn));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chance_master_core::{
        ClaimKind, ClaimSnapshot, DiceTriple, GameResult, GameStatus, ManualClock, PieceType,
        Square, START_POSITION,
    };
    use chance_master_indexer::MemoryIndexer;

    const ID: SessionId = SessionId(42);

    fn white() -> PlayerAddress {
        PlayerAddress::from_bytes([1; 32])
    }

    fn black() -> PlayerAddress {
        PlayerAddress::from_bytes([2; 32])
    }

    fn session() -> SessionSnapshot {
        SessionSnapshot {
            id: ID,
            white: white(),
            black: black(),
            turn: Side::White,
            status: GameStatus::Active,
            result: GameResult::None,
            white_draw_offered: false,
            black_draw_offered: false,
            claim: ClaimKind::None,
            dice: DiceTriple::new([Some(PieceType::Pawn), Some(PieceType::Knight), None]),
        }
    }

    fn clock() -> ClockSnapshot {
        ClockSnapshot {
            white_remaining_secs: 300,
            black_remaining_secs: 300,
            last_updated_secs: 1_000,
        }
    }

    fn seeded_indexer() -> Arc<MemoryIndexer> {
        let indexer = Arc::new(MemoryIndexer::new());
        indexer.insert_session("s", session());
        indexer.insert_board(ID, "b", Position::start().to_board());
        indexer.insert_clock(ID, "c", clock());
        indexer.insert_claim(ID, "k", ClaimSnapshot::default());
        indexer
    }

    fn sync(indexer: Arc<MemoryIndexer>) -> (Synchronizer<MemoryIndexer>, Arc<ManualClock>) {
        let time = Arc::new(ManualClock::new(1_000_000));
        let sync = Synchronizer::with_time_source(indexer, SyncConfig::default(), time.clone());
        (sync, time)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn e2e4() -> Position {
        let pos = Position::start();
        let mv = chance_master_core::resolve_move(
            &pos,
            Square::from_notation("e2").unwrap(),
            Square::from_notation("e4").unwrap(),
            None,
        )
        .unwrap();
        chance_master_core::rules::apply(&pos, &mv)
    }

    #[tokio::test]
    async fn test_attach_seeds_and_publishes() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer.clone());
        let mut events = sync.subscribe_events();
        let seeded = sync.seeded();

        sync.attach(ID).await.unwrap();

        assert_eq!(*seeded.borrow(), Some(ID));
        let projection = sync.projection().unwrap();
        assert_eq!(projection.position, START_POSITION);
        assert_eq!(projection.clock.white_ms, 300_000);
        assert!(matches!(
            events.try_recv().unwrap(),
            SyncEvent::ProjectionChanged(_)
        ));
        for entity in ["s", "b", "c", "k"] {
            assert_eq!(indexer.subscriber_count(&EntityId::new(entity)), 1);
        }
    }

    #[tokio::test]
    async fn test_missing_seed_fails_attach() {
        let indexer = seeded_indexer();
        indexer.remove_board(ID);
        let (mut sync, _) = sync(indexer.clone());

        let err = sync.attach(ID).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionNotFound(id) if id == ID));
        assert!(sync.projection().is_none());
        assert_eq!(indexer.subscriber_count(&EntityId::new("s")), 0);
    }

    #[tokio::test]
    async fn test_unreachable_seed() {
        let indexer = seeded_indexer();
        indexer.set_unreachable(Some("offline"));
        let (mut sync, _) = sync(indexer);
        assert!(matches!(
            sync.attach(ID).await.unwrap_err(),
            SyncError::Unreachable(_)
        ));
    }

    #[tokio::test]
    async fn test_both_draw_offers_in_one_update() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer.clone());
        sync.attach(ID).await.unwrap();

        let mut next = session();
        next.white_draw_offered = true;
        next.black_draw_offered = true;
        indexer.push(&EntityId::new("s"), vec![ModelUpdate::Session(next.clone())]);
        let events = sync.pump().await;
        let draws: Vec<_> = events
            .iter()
            .filter(|e| !matches!(e, SyncEvent::ProjectionChanged(_)))
            .collect();
        assert_eq!(
            draws,
            vec![
                &SyncEvent::DrawOffered(Side::White),
                &SyncEvent::DrawOffered(Side::Black)
            ]
        );

        // Redelivery of the same snapshot produces nothing.
        indexer.push(&EntityId::new("s"), vec![ModelUpdate::Session(next.clone())]);
        assert!(sync.pump().await.is_empty());

        // White withdraws while black still offers.
        next.white_draw_offered = false;
        indexer.push(&EntityId::new("s"), vec![ModelUpdate::Session(next.clone())]);
        let events = sync.pump().await;
        assert!(events.contains(&SyncEvent::DrawOfferWithdrawn(Side::White)));

        next.black_draw_offered = false;
        indexer.push(&EntityId::new("s"), vec![ModelUpdate::Session(next)]);
        let events = sync.pump().await;
        assert!(events.contains(&SyncEvent::DrawOfferCleared));
    }

    #[tokio::test]
    async fn test_claim_and_result_transitions_fire_once() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer.clone());
        sync.attach(ID).await.unwrap();

        let claim = ModelUpdate::Claim {
            session: ID,
            claim: ClaimSnapshot {
                claim: ClaimKind::Checkmate,
            },
        };
        indexer.push(&EntityId::new("k"), vec![claim.clone(), claim]);
        let events = sync.pump().await;
        let claims = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::ClaimChanged { .. }))
            .count();
        assert_eq!(claims, 1);
        assert_eq!(sync.projection().unwrap().claim, ClaimKind::Checkmate);

        let mut ended = session();
        ended.result = GameResult::White;
        ended.status = GameStatus::Ended;
        indexer.push(
            &EntityId::new("s"),
            vec![ModelUpdate::Session(ended.clone()), ModelUpdate::Session(ended)],
        );
        let events = sync.pump().await;
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SyncEvent::GameEnded(GameResult::White)))
                .count(),
            1
        );
        // The claim survives session updates.
        assert_eq!(sync.projection().unwrap().claim, ClaimKind::Checkmate);
    }

    #[tokio::test]
    async fn test_identical_projection_not_republished() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer.clone());
        sync.attach(ID).await.unwrap();

        indexer.push(
            &EntityId::new("b"),
            vec![ModelUpdate::Board {
                session: ID,
                board: Position::start().to_board(),
            }],
        );
        let events = sync.pump().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_late_update_after_teardown_is_discarded() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer.clone());
        sync.attach(ID).await.unwrap();
        let entity = EntityId::new("s");
        let late = indexer.sender_for(&entity).unwrap();

        sync.detach();
        assert_eq!(indexer.subscriber_count(&entity), 0);

        let mut next = session();
        next.white_draw_offered = true;
        assert!(!late.send(vec![ModelUpdate::Session(next)]));
        settle().await;
        assert!(sync.pump_pending().is_empty());
        assert!(sync.projection().is_none());
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer);
        sync.attach(ID).await.unwrap();

        let mut next = session();
        next.black_draw_offered = true;
        let stale = Inbound {
            generation: sync.generation() - 1,
            kind: InboundKind::Updates(vec![ModelUpdate::Session(next)]),
        };
        assert!(sync.handle(stale).is_empty());
        assert!(!sync.projection().unwrap().black_draw_offered);
    }

    #[tokio::test]
    async fn test_optimistic_apply_and_confirmation() {
        let indexer = seeded_indexer();
        let (mut sync, time) = sync(indexer.clone());
        sync.set_identity(Some(white()));
        sync.attach(ID).await.unwrap();

        time.set(1_010_000);
        sync.set_proving(true);
        time.set(1_015_000);
        let post = e2e4();
        assert!(sync.apply_optimistic(&post, Side::White));
        sync.set_proving(false);

        let projection = sync.projection().unwrap().clone();
        assert_eq!(projection.position, post.to_position_string());
        assert_eq!(projection.turn, Side::Black);
        assert!(projection.dice.is_unrolled());
        assert!(projection.optimistic);
        assert_eq!(projection.clock.white_ms, 290_000);
        assert_eq!(projection.clock.epoch_ms, 1_015_000);
        assert_eq!(projection.clock.side_to_move, Side::Black);

        // Confirmation supersedes the overlay part by part.
        let mut confirmed = session();
        confirmed.turn = Side::Black;
        confirmed.dice = DiceTriple::UNROLLED;
        indexer.push(
            &EntityId::new("b"),
            vec![ModelUpdate::Board {
                session: ID,
                board: post.to_board(),
            }],
        );
        indexer.push(&EntityId::new("s"), vec![ModelUpdate::Session(confirmed)]);
        indexer.push(
            &EntityId::new("c"),
            vec![ModelUpdate::Clock {
                session: ID,
                clock: ClockSnapshot {
                    white_remaining_secs: 290,
                    black_remaining_secs: 300,
                    last_updated_secs: 1_015,
                },
            }],
        );
        sync.pump().await;
        sync.pump().await;
        sync.pump().await;

        let projection = sync.projection().unwrap();
        assert!(!projection.optimistic);
        assert_eq!(projection.position, post.to_position_string());
    }

    #[tokio::test]
    async fn test_optimistic_skipped_when_turn_already_handed_over() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer.clone());
        sync.attach(ID).await.unwrap();

        let mut handed_over = session();
        handed_over.turn = Side::Black;
        handed_over.dice = DiceTriple::UNROLLED;
        indexer.push(&EntityId::new("s"), vec![ModelUpdate::Session(handed_over)]);
        sync.pump().await;

        assert!(!sync.apply_optimistic(&e2e4(), Side::White));
        let projection = sync.projection().unwrap();
        assert_eq!(projection.position, START_POSITION);
        assert!(!projection.optimistic);
    }

    #[tokio::test]
    async fn test_unrelated_session_update_keeps_optimistic_move() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer.clone());
        sync.set_identity(Some(white()));
        sync.attach(ID).await.unwrap();
        let post = e2e4();
        assert!(sync.apply_optimistic(&post, Side::White));

        let mut offered = session();
        offered.black_draw_offered = true;
        indexer.push(&EntityId::new("s"), vec![ModelUpdate::Session(offered)]);
        let events = sync.pump().await;
        assert!(events.contains(&SyncEvent::DrawOffered(Side::Black)));

        let projection = sync.projection().unwrap();
        assert!(projection.optimistic);
        assert!(projection.black_draw_offered);
        assert_eq!(projection.position, post.to_position_string());
        assert_eq!(projection.turn, Side::Black);
        assert!(projection.dice.is_unrolled());
        assert!(!projection.me_to_move);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_optimistic_reverts() {
        let indexer = seeded_indexer();
        let (mut sync, _) = sync(indexer);
        sync.attach(ID).await.unwrap();
        assert!(sync.apply_optimistic(&e2e4(), Side::White));

        tokio::time::sleep(Duration::from_secs(31)).await;
        let events = sync.pump().await;
        assert!(events.contains(&SyncEvent::OptimisticReverted));
        let projection = sync.projection().unwrap();
        assert_eq!(projection.position, START_POSITION);
        assert!(!projection.optimistic);
        assert_eq!(projection.clock.white_ms, 300_000);
    }

    #[tokio::test]
    async fn test_flag_fires_once() {
        let indexer = seeded_indexer();
        let (mut sync, time) = sync(indexer);
        sync.attach(ID).await.unwrap();

        time.set(1_000_000 + 299_000);
        assert!(sync.tick().is_empty());
        time.set(1_000_000 + 300_000);
        assert_eq!(sync.tick(), vec![SyncEvent::Flagged(Side::White)]);
        time.set(1_000_000 + 400_000);
        assert!(sync.tick().is_empty());
    }

    #[tokio::test]
    async fn test_clock_frozen_while_proving() {
        let indexer = seeded_indexer();
        let (mut sync, time) = sync(indexer);
        sync.attach(ID).await.unwrap();

        time.set(1_010_000);
        sync.set_proving(true);
        assert!(sync.projection().unwrap().busy);
        time.set(1_500_000);
        assert!(sync.tick().is_empty());
        assert_eq!(sync.clock_display().white_ms, 290_000);
    }
}
