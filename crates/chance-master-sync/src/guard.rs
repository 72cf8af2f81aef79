//! Entry guard: decides whether the local player may view a session, or
//! where to send them instead.
//!
//! ```text
//! AwaitingIdentity ──(grace elapsed)──────────────► RedirectHome
//!        │
//!        ▼
//!     Checking ──(query failed)───────────────────► RedirectLobby
//!        ├──(named session ≠ canonical)───────────► Redirect(canonical)
//!        ├──(nothing named, in game)──────────────► Redirect(canonical)
//!        ├──(nothing named, not in game)──────────► RedirectLobby
//!        └──(named session)───────────────────────► Attach
//! ```
//!
//! After attaching, a [`LiveGuard`] keeps watching: a player who is not in
//! a game is sent to the lobby unless the session seeds before the
//! debounce elapses, and an in-game update naming a different session
//! redirects there at once.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use chance_master_core::{PlayerAddress, PlayerSnapshot, SessionId};
use chance_master_indexer::{Indexer, ModelUpdate, Seeded, Subscription};

use crate::timer::Deferred;

/// Timing of the guard's waits.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// How long to wait for an identity before sending the user home.
    pub identity_grace: Duration,
    /// Debounce before a player who is not in a game is sent to the lobby.
    pub lobby_debounce: Duration,
    /// Shorter debounce applied to live not-in-game updates.
    pub live_debounce: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            identity_grace: Duration::from_millis(2_500),
            lobby_debounce: Duration::from_millis(2_000),
            live_debounce: Duration::from_millis(1_200),
        }
    }
}

/// Where the guard sends the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Stay and attach to this session.
    Attach(SessionId),
    /// Go to the canonical session instead.
    Redirect(SessionId),
    RedirectLobby,
    RedirectHome,
}

/// Result of the entry check.
#[derive(Debug, Clone)]
pub struct Admission {
    pub decision: GuardDecision,
    /// The player record, when the query found one.
    pub player: Option<Seeded<PlayerSnapshot>>,
}

impl Admission {
    fn bare(decision: GuardDecision) -> Self {
        Self {
            decision,
            player: None,
        }
    }

    fn in_game(&self) -> bool {
        self.player.as_ref().map_or(false, |p| p.model.is_in_game)
    }
}

/// Entry check for one navigation.
pub struct EntryGuard<I: Indexer + ?Sized> {
    indexer: Arc<I>,
    config: GuardConfig,
}

impl<I: Indexer + ?Sized> EntryGuard<I> {
    pub fn new(indexer: Arc<I>, config: GuardConfig) -> Self {
        Self { indexer, config }
    }

    /// Decide where the user goes for a navigation to `requested`.
    pub async fn admit(
        &self,
        identity: &mut watch::Receiver<Option<PlayerAddress>>,
        requested: Option<SessionId>,
    ) -> Admission {
        // 1. Wait for an identity, but not forever.
        let me = match tokio::time::timeout(
            self.config.identity_grace,
            identity.wait_for(Option::is_some),
        )
        .await
        {
            Ok(Ok(current)) => *current,
            _ => None,
        };
        let Some(me) = me else {
            info!("no identity within grace window");
            return Admission::bare(GuardDecision::RedirectHome);
        };

        // 2. Ask where the player belongs.
        let player = match self.indexer.player(&me).await {
            Ok(player) => player,
            Err(e) => {
                warn!(player = %me, error = %e, "player query failed");
                return Admission::bare(GuardDecision::RedirectLobby);
            }
        };
        let canonical = player.as_ref().and_then(|p| p.model.last_session);
        let in_game = player.as_ref().map_or(false, |p| p.model.is_in_game);

        // 3. Route.
        let decision = match (requested, canonical) {
            (Some(named), Some(canonical)) if named != canonical => {
                debug!(named = %named, canonical = %canonical, "normalising session");
                GuardDecision::Redirect(canonical)
            }
            (Some(named), _) => GuardDecision::Attach(named),
            (None, Some(canonical)) if in_game => GuardDecision::Redirect(canonical),
            (None, _) => GuardDecision::RedirectLobby,
        };
        debug!(player = %me, in_game, decision = ?decision, "entry decided");
        Admission { decision, player }
    }

    /// Keep watching after an [`GuardDecision::Attach`].
    ///
    /// If the player was not in a game the lobby debounce is armed at once;
    /// it is dropped if `seeded` reports the session meanwhile.
    pub async fn watch(
        &self,
        session: SessionId,
        admission: &Admission,
        seeded: watch::Receiver<Option<SessionId>>,
    ) -> LiveGuard {
        let subscription = match admission.player.as_ref().and_then(|p| p.entity_id.as_ref()) {
            Some(entity) => match self.indexer.subscribe(entity).await {
                Ok(sub) => Some(sub),
                Err(e) => {
                    warn!(entity = %entity, error = %e, "player subscription failed");
                    None
                }
            },
            None => None,
        };

        let mut guard = LiveGuard::new(session, self.config.clone(), subscription, seeded);
        if !admission.in_game() && !guard.is_seeded() {
            guard.arm(self.config.lobby_debounce);
        }
        guard
    }
}

/// Live player-status watcher for an attached session.
pub struct LiveGuard {
    session: SessionId,
    config: GuardConfig,
    subscription: Option<Subscription>,
    seeded: watch::Receiver<Option<SessionId>>,
    seeded_open: bool,
    /// The last live update left the player with some assignment.
    assigned: bool,
    debounce: Deferred,
    fired_tx: mpsc::UnboundedSender<u64>,
    fired_rx: mpsc::UnboundedReceiver<u64>,
}

impl LiveGuard {
    fn new(
        session: SessionId,
        config: GuardConfig,
        subscription: Option<Subscription>,
        seeded: watch::Receiver<Option<SessionId>>,
    ) -> Self {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        Self {
            session,
            config,
            subscription,
            seeded,
            seeded_open: true,
            assigned: false,
            debounce: Deferred::new(),
            fired_tx,
            fired_rx,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_armed(&self) -> bool {
        self.debounce.is_armed()
    }

    fn is_seeded(&self) -> bool {
        *self.seeded.borrow() == Some(self.session)
    }

    fn arm(&mut self, delay: Duration) {
        trace!(session = %self.session, ?delay, "lobby debounce armed");
        self.debounce.arm(delay, self.fired_tx.clone(), |token| token);
    }

    /// Wait for the next redirect. Pends forever if none ever comes.
    pub async fn next_decision(&mut self) -> GuardDecision {
        loop {
            tokio::select! {
                Some(token) = self.fired_rx.recv() => {
                    if !self.debounce.accept(token) {
                        continue;
                    }
                    if self.is_seeded() || self.assigned {
                        trace!(session = %self.session, "debounce elapsed; staying");
                        continue;
                    }
                    info!(session = %self.session, "not in game; redirecting to lobby");
                    return GuardDecision::RedirectLobby;
                }
                batch = next_batch(&mut self.subscription) => match batch {
                    Some(updates) => {
                        for update in updates {
                            if let ModelUpdate::Player(player) = update {
                                if let Some(decision) = self.on_player(&player) {
                                    return decision;
                                }
                            }
                        }
                    }
                    None => {
                        debug!(session = %self.session, "player subscription ended");
                        self.subscription = None;
                    }
                },
                changed = self.seeded.changed(), if self.seeded_open => {
                    if changed.is_err() {
                        self.seeded_open = false;
                    } else if self.is_seeded() && self.debounce.is_armed() {
                        trace!(session = %self.session, "seeded; lobby debounce cancelled");
                        self.debounce.cancel();
                    }
                }
            }
        }
    }

    fn on_player(&mut self, player: &PlayerSnapshot) -> Option<GuardDecision> {
        if let (true, Some(last)) = (player.is_in_game, player.last_session) {
            self.debounce.cancel();
            if last != self.session {
                info!(from = %self.session, to = %last, "player moved to another session");
                return Some(GuardDecision::Redirect(last));
            }
            return None;
        }
        self.assigned = player.is_in_game || player.last_session.is_some();
        self.arm(self.config.live_debounce);
        None
    }
}

async fn next_batch(subscription: &mut Option<Subscription>) -> Option<Vec<ModelUpdate>> {
    match subscription {
        Some(sub) => sub.next().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chance_master_core::EntityId;
    use chance_master_indexer::MemoryIndexer;

    fn me() -> PlayerAddress {
        PlayerAddress::from_bytes([3; 32])
    }

    fn player(in_game: bool, last: Option<u64>) -> PlayerSnapshot {
        PlayerSnapshot {
            address: me(),
            is_enqueued: false,
            is_in_game: in_game,
            last_session: last.map(SessionId),
        }
    }

    fn setup(record: Option<PlayerSnapshot>) -> (Arc<MemoryIndexer>, EntryGuard<MemoryIndexer>) {
        let indexer = Arc::new(MemoryIndexer::new());
        if let Some(record) = record {
            indexer.insert_player("p", record);
        }
        let guard = EntryGuard::new(indexer.clone(), GuardConfig::default());
        (indexer, guard)
    }

    async fn admit(
        guard: &EntryGuard<MemoryIndexer>,
        requested: Option<u64>,
    ) -> Admission {
        let (_tx, mut rx) = watch::channel(Some(me()));
        guard.admit(&mut rx, requested.map(SessionId)).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_identity_goes_home_after_grace() {
        let (_, guard) = setup(None);
        let (_tx, mut rx) = watch::channel(None);
        let start = tokio::time::Instant::now();
        let admission = guard.admit(&mut rx, Some(SessionId(1))).await;
        assert_eq!(admission.decision, GuardDecision::RedirectHome);
        assert!(start.elapsed() >= Duration::from_millis(2_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_arriving_in_grace_cancels_wait() {
        let (_, guard) = setup(Some(player(true, Some(7))));
        let (tx, mut rx) = watch::channel(None);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            let _ = tx.send(Some(me()));
        });
        let start = tokio::time::Instant::now();
        let admission = guard.admit(&mut rx, Some(SessionId(7))).await;
        assert_eq!(admission.decision, GuardDecision::Attach(SessionId(7)));
        assert!(start.elapsed() < Duration::from_millis(2_500));
    }

    #[tokio::test]
    async fn test_routing() {
        let (_, guard) = setup(Some(player(true, Some(7))));
        assert_eq!(
            admit(&guard, Some(3)).await.decision,
            GuardDecision::Redirect(SessionId(7))
        );
        assert_eq!(
            admit(&guard, None).await.decision,
            GuardDecision::Redirect(SessionId(7))
        );

        let (_, guard) = setup(Some(player(false, None)));
        assert_eq!(
            admit(&guard, None).await.decision,
            GuardDecision::RedirectLobby
        );
        assert_eq!(
            admit(&guard, Some(4)).await.decision,
            GuardDecision::Attach(SessionId(4))
        );
    }

    #[tokio::test]
    async fn test_query_failure_goes_to_lobby() {
        let (indexer, guard) = setup(Some(player(true, Some(7))));
        indexer.set_unreachable(Some("down"));
        assert_eq!(
            admit(&guard, Some(7)).await.decision,
            GuardDecision::RedirectLobby
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lobby_debounce_fires_when_never_seeded() {
        let (_, guard) = setup(Some(player(false, Some(4))));
        let admission = admit(&guard, Some(4)).await;
        let (_seeded_tx, seeded_rx) = watch::channel(None);
        let mut live = guard.watch(SessionId(4), &admission, seeded_rx).await;
        assert!(live.is_armed());

        let start = tokio::time::Instant::now();
        assert_eq!(live.next_decision().await, GuardDecision::RedirectLobby);
        assert!(start.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeding_cancels_lobby_debounce() {
        let (_, guard) = setup(Some(player(false, Some(4))));
        let admission = admit(&guard, Some(4)).await;
        let (seeded_tx, seeded_rx) = watch::channel(None);
        let mut live = guard.watch(SessionId(4), &admission, seeded_rx).await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = seeded_tx.send(Some(SessionId(4)));
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let waited = tokio::time::timeout(Duration::from_secs(10), live.next_decision()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_update_to_other_session_redirects() {
        let (indexer, guard) = setup(Some(player(true, Some(4))));
        let admission = admit(&guard, Some(4)).await;
        let (_seeded_tx, seeded_rx) = watch::channel(Some(SessionId(4)));
        let mut live = guard.watch(SessionId(4), &admission, seeded_rx).await;
        assert!(!live.is_armed());

        indexer.push(
            &EntityId::new("p"),
            vec![ModelUpdate::Player(player(true, Some(9)))],
        );
        assert_eq!(
            live.next_decision().await,
            GuardDecision::Redirect(SessionId(9))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_not_in_game_redirects_only_without_assignment() {
        let (indexer, guard) = setup(Some(player(true, Some(4))));
        let admission = admit(&guard, Some(4)).await;
        let (_seeded_tx, seeded_rx) = watch::channel(None);
        let mut live = guard.watch(SessionId(4), &admission, seeded_rx).await;

        // Still assigned a last session: the debounce elapses harmlessly.
        indexer.push(
            &EntityId::new("p"),
            vec![ModelUpdate::Player(player(false, Some(4)))],
        );
        let waited = tokio::time::timeout(Duration::from_secs(3), live.next_decision()).await;
        assert!(waited.is_err());

        indexer.push(
            &EntityId::new("p"),
            vec![ModelUpdate::Player(player(false, None))],
        );
        let start = tokio::time::Instant::now();
        assert_eq!(live.next_decision().await, GuardDecision::RedirectLobby);
        assert!(start.elapsed() >= Duration::from_millis(1_200));
    }
}
