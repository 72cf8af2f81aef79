//! The game client: one object tying routing, live state and move commits
//! together for a single viewer.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use chance_master_core::{
    ClaimKind, ClockDisplay, MoveRejection, PieceType, PlayerAddress, SessionId, Square,
};
use chance_master_indexer::{GraphqlIndexer, Indexer};
use chance_master_sync::{
    fire_and_forget, CommitOutcome, EntryGuard, GuardDecision, HttpProver, Ledger, LedgerCall,
    LiveGuard, LocalProjection, MovePipeline, ProofService, SyncError, SyncEvent, Synchronizer,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// What the client has to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Events from the synchronizer (projection changes, transitions, flags)
    /// and notifications from background ledger submissions.
    Sync(Vec<SyncEvent>),
    /// The viewer must go somewhere else. The session has been detached.
    Navigate(GuardDecision),
}

/// Client for one viewer.
pub struct GameClient<I: Indexer + ?Sized> {
    sync: Synchronizer<I>,
    pipeline: MovePipeline,
    guard: EntryGuard<I>,
    live: Option<LiveGuard>,
    identity: watch::Sender<Option<PlayerAddress>>,
    ticker: Interval,
    /// Ledger submissions report only through the broadcast channel.
    notifications: broadcast::Receiver<SyncEvent>,
}

impl GameClient<GraphqlIndexer> {
    /// Connect to the configured indexer and proof service.
    pub fn connect(config: ClientConfig, ledger: Arc<dyn Ledger>) -> Result<Self> {
        config.validate()?;
        let indexer = Arc::new(GraphqlIndexer::new(&config.indexer_http, &config.indexer_ws)?);
        let prover = Arc::new(HttpProver::new(&config.prover_url)?);
        info!(
            indexer = %config.indexer_http,
            prover = %config.prover_url,
            "client configured"
        );
        Ok(Self::new(indexer, prover, ledger, config))
    }
}

impl<I: Indexer + ?Sized> GameClient<I> {
    /// Create a client from explicit services.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        indexer: Arc<I>,
        prover: Arc<dyn ProofService>,
        ledger: Arc<dyn Ledger>,
        config: ClientConfig,
    ) -> Self {
        let mut ticker = interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (identity, _) = watch::channel(None);
        let sync = Synchronizer::new(indexer.clone(), config.sync.clone());
        let notifications = sync.subscribe_events();
        Self {
            sync,
            pipeline: MovePipeline::new(prover, ledger, config.pipeline.clone()),
            guard: EntryGuard::new(indexer, config.guard.clone()),
            live: None,
            identity,
            ticker,
            notifications,
        }
    }

    /// Replace the synchronizer, e.g. to inject a time source.
    pub fn with_synchronizer(mut self, sync: Synchronizer<I>) -> Self {
        self.notifications = sync.subscribe_events();
        self.sync = sync;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn projection(&self) -> Option<&LocalProjection> {
        self.sync.projection()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.sync.session_id()
    }

    pub fn clock_display(&self) -> ClockDisplay {
        self.sync.clock_display()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe_events()
    }

    pub fn synchronizer(&self) -> &Synchronizer<I> {
        &self.sync
    }

    pub fn synchronizer_mut(&mut self) -> &mut Synchronizer<I> {
        &mut self.sync
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Navigation
    // ─────────────────────────────────────────────────────────────────────────

    /// Set (or clear) the local player.
    pub fn set_identity(&mut self, me: Option<PlayerAddress>) {
        self.identity.send_replace(me);
        self.sync.set_identity(me);
    }

    /// Navigate to `requested` (or to wherever the player belongs).
    ///
    /// On [`GuardDecision::Attach`] the session is attached and watched;
    /// any other decision leaves nothing attached. A session whose seed is
    /// incomplete routes to the lobby.
    pub async fn enter(&mut self, requested: Option<SessionId>) -> Result<GuardDecision> {
        self.leave();
        let mut identity = self.identity.subscribe();
        let admission = self.guard.admit(&mut identity, requested).await;
        let GuardDecision::Attach(session) = admission.decision else {
            return Ok(admission.decision);
        };

        self.live = Some(
            self.guard
                .watch(session, &admission, self.sync.seeded())
                .await,
        );
        match self.sync.attach(session).await {
            Ok(()) => Ok(admission.decision),
            Err(SyncError::SessionNotFound(id)) => {
                self.live = None;
                info!(session = %id, "session not found; going to the lobby");
                Ok(GuardDecision::RedirectLobby)
            }
            Err(e) => {
                self.live = None;
                warn!(session = %session, error = %e, "attach failed");
                Err(e.into())
            }
        }
    }

    /// Detach and stop watching.
    pub fn leave(&mut self) {
        self.live = None;
        if self.sync.session_id().is_some() {
            self.sync.detach();
        }
    }

    /// Wait for the next thing worth reporting: synchronizer events, clock
    /// flags, ledger notifications or a redirect.
    pub async fn next_event(&mut self) -> ClientEvent {
        loop {
            tokio::select! {
                events = self.sync.pump() => {
                    if !events.is_empty() {
                        return ClientEvent::Sync(events);
                    }
                }
                notification = next_notification(&mut self.notifications) => {
                    return ClientEvent::Sync(vec![notification]);
                }
                decision = next_decision(&mut self.live) => {
                    self.leave();
                    return ClientEvent::Navigate(decision);
                }
                _ = self.ticker.tick() => {
                    let events = self.sync.tick();
                    if !events.is_empty() {
                        return ClientEvent::Sync(events);
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Game actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Commit a move.
    pub async fn play(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<PieceType>,
    ) -> Result<CommitOutcome> {
        match self.pipeline.commit(&mut self.sync, from, to, promotion).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                debug!(from = %from, to = %to, error = %e, "move not committed");
                Err(e.into())
            }
        }
    }

    /// Roll the dice. Only offered to the player to move once the previous
    /// roll has been consumed.
    pub fn roll(&self) -> Result<JoinHandle<()>> {
        let projection = self.seated()?;
        if !projection.can_roll {
            if projection.busy {
                return Err(MoveRejection::Busy.into());
            }
            if !projection.me_to_move {
                return Err(MoveRejection::NotYourTurn {
                    to_move: projection.turn,
                }
                .into());
            }
            return Err(ClientError::Unavailable("roll"));
        }
        self.submit(LedgerCall::roll(projection.session), "Roll")
    }

    pub fn resign(&self) -> Result<JoinHandle<()>> {
        let projection = self.playing()?;
        self.submit(LedgerCall::resign(projection.session), "Resign")
    }

    /// Offer a draw, or accept the opponent's offer.
    pub fn offer_draw(&self) -> Result<JoinHandle<()>> {
        let projection = self.playing()?;
        self.submit(LedgerCall::offer_draw(projection.session), "Draw offer")
    }

    pub fn claim(&self, kind: ClaimKind) -> Result<JoinHandle<()>> {
        if kind == ClaimKind::None {
            return Err(ClientError::Unavailable("empty claim"));
        }
        let projection = self.playing()?;
        self.submit(LedgerCall::claim(projection.session, kind), "Claim")
    }

    pub fn accept_claim(&self) -> Result<JoinHandle<()>> {
        let projection = self.pending_claim()?;
        self.submit(LedgerCall::accept_claim(projection.session), "Accept claim")
    }

    pub fn adjudicate_claim(&self) -> Result<JoinHandle<()>> {
        let projection = self.pending_claim()?;
        self.submit(
            LedgerCall::adjudicate_claim(projection.session),
            "Adjudicate claim",
        )
    }

    /// Claim a win on time. Only offered once the opponent's clock has
    /// run out locally.
    pub fn flag_win(&self) -> Result<JoinHandle<()>> {
        let projection = self.playing()?;
        let Some(me) = projection.seat.side() else {
            return Err(MoveRejection::NotSeated.into());
        };
        if !self.sync.is_flagged(me.opponent()) {
            return Err(ClientError::Unavailable("flag win"));
        }
        self.submit(LedgerCall::flag_win(projection.session), "Flag win")
    }

    fn seated(&self) -> Result<&LocalProjection> {
        let projection = self.sync.projection().ok_or(SyncError::NotAttached)?;
        if projection.seat.side().is_none() {
            return Err(MoveRejection::NotSeated.into());
        }
        Ok(projection)
    }

    fn playing(&self) -> Result<&LocalProjection> {
        let projection = self.seated()?;
        if projection.is_over() {
            return Err(MoveRejection::GameOver.into());
        }
        Ok(projection)
    }

    fn pending_claim(&self) -> Result<&LocalProjection> {
        let projection = self.playing()?;
        if projection.claim == ClaimKind::None {
            return Err(ClientError::Unavailable("claim response"));
        }
        Ok(projection)
    }

    fn submit(&self, call: LedgerCall, label: &'static str) -> Result<JoinHandle<()>> {
        debug!(entrypoint = call.entrypoint, "submitting {label}");
        Ok(fire_and_forget(
            self.pipeline.ledger(),
            call,
            self.sync.event_sender(),
            label,
        ))
    }
}

/// Next notification on the broadcast channel. Everything else published
/// there also comes out of `pump`.
async fn next_notification(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    loop {
        match rx.recv().await {
            Ok(event @ SyncEvent::Notification(_)) => return event,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "event receiver lagged"),
            Err(RecvError::Closed) => return pending().await,
        }
    }
}

async fn next_decision(live: &mut Option<LiveGuard>) -> GuardDecision {
    match live {
        Some(live) => live.next_decision().await,
        None => pending().await,
    }
}
