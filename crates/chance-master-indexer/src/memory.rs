//! In-memory implementation of the Indexer trait.
//!
//! This is primarily for testing. Seeds are inserted directly and live
//! updates are pushed by hand, so tests control delivery order exactly.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::trace;

use chance_master_core::{
    BoardSnapshot, ClaimSnapshot, ClockSnapshot, EntityId, PlayerAddress, PlayerSnapshot,
    SessionId, SessionSnapshot,
};

use crate::error::{IndexerError, Result};
use crate::models::ModelUpdate;
use crate::traits::{Indexer, Seeded, Subscription, SubscriptionSender};

/// In-memory indexer.
///
/// Thread-safe via RwLock.
pub struct MemoryIndexer {
    inner: RwLock<MemoryIndexerInner>,
}

#[derive(Default)]
struct MemoryIndexerInner {
    sessions: HashMap<SessionId, Seeded<SessionSnapshot>>,
    boards: HashMap<SessionId, Seeded<BoardSnapshot>>,
    clocks: HashMap<SessionId, Seeded<ClockSnapshot>>,
    claims: HashMap<SessionId, Seeded<ClaimSnapshot>>,
    players: HashMap<PlayerAddress, Seeded<PlayerSnapshot>>,

    /// Live subscribers per entity.
    subscribers: HashMap<EntityId, Vec<SubscriptionSender>>,

    /// When set, every query fails as unreachable.
    unreachable: Option<String>,

    /// Number of seed queries served.
    queries: usize,
}

impl MemoryIndexer {
    /// Create a new empty indexer.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryIndexerInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryIndexerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryIndexerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────────

    pub fn insert_session(&self, entity: impl Into<String>, session: SessionSnapshot) {
        let id = session.id;
        self.write()
            .sessions
            .insert(id, Seeded::new(Some(EntityId::new(entity)), session));
    }

    pub fn insert_board(&self, id: SessionId, entity: impl Into<String>, board: BoardSnapshot) {
        self.write()
            .boards
            .insert(id, Seeded::new(Some(EntityId::new(entity)), board));
    }

    pub fn insert_clock(&self, id: SessionId, entity: impl Into<String>, clock: ClockSnapshot) {
        self.write()
            .clocks
            .insert(id, Seeded::new(Some(EntityId::new(entity)), clock));
    }

    pub fn insert_claim(&self, id: SessionId, entity: impl Into<String>, claim: ClaimSnapshot) {
        self.write()
            .claims
            .insert(id, Seeded::new(Some(EntityId::new(entity)), claim));
    }

    pub fn insert_player(&self, entity: impl Into<String>, player: PlayerSnapshot) {
        let address = player.address;
        self.write()
            .players
            .insert(address, Seeded::new(Some(EntityId::new(entity)), player));
    }

    /// Remove the board seed of a session, leaving the others in place.
    pub fn remove_board(&self, id: SessionId) {
        self.write().boards.remove(&id);
    }

    /// Make every subsequent query fail (or succeed again with `None`).
    pub fn set_unreachable(&self, reason: Option<&str>) {
        self.write().unreachable = reason.map(str::to_string);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Live updates
    // ─────────────────────────────────────────────────────────────────────────

    /// Push a batch to every open subscription on `entity`.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn push(&self, entity: &EntityId, updates: Vec<ModelUpdate>) -> usize {
        let mut inner = self.write();
        let Some(senders) = inner.subscribers.get_mut(entity) else {
            return 0;
        };
        senders.retain(|s| !s.is_closed());
        let delivered = senders
            .iter()
            .filter(|s| s.send(updates.clone()))
            .count();
        trace!(entity = %entity, delivered, "pushed update");
        delivered
    }

    /// The most recent sender registered for `entity`, closed or not.
    ///
    /// Lets tests hold on to a producer across a consumer teardown and
    /// attempt a late delivery.
    pub fn sender_for(&self, entity: &EntityId) -> Option<SubscriptionSender> {
        self.read()
            .subscribers
            .get(entity)
            .and_then(|s| s.last().cloned())
    }

    /// Number of open subscriptions on `entity`.
    pub fn subscriber_count(&self, entity: &EntityId) -> usize {
        self.read()
            .subscribers
            .get(entity)
            .map_or(0, |s| s.iter().filter(|s| !s.is_closed()).count())
    }

    /// Number of seed queries served so far.
    pub fn query_count(&self) -> usize {
        self.read().queries
    }

    fn query<T: Clone>(
        &self,
        pick: impl FnOnce(&MemoryIndexerInner) -> Option<&Seeded<T>>,
    ) -> Result<Option<Seeded<T>>> {
        let mut inner = self.write();
        if let Some(reason) = &inner.unreachable {
            return Err(IndexerError::Unreachable(reason.clone()));
        }
        inner.queries += 1;
        Ok(pick(&*inner).cloned())
    }
}

impl Default for MemoryIndexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Indexer for MemoryIndexer {
    async fn session(&self, id: SessionId) -> Result<Option<Seeded<SessionSnapshot>>> {
        self.query(|i| i.sessions.get(&id))
    }

    async fn board(&self, id: SessionId) -> Result<Option<Seeded<BoardSnapshot>>> {
        self.query(|i| i.boards.get(&id))
    }

    async fn clock(&self, id: SessionId) -> Result<Option<Seeded<ClockSnapshot>>> {
        self.query(|i| i.clocks.get(&id))
    }

    async fn claim(&self, id: SessionId) -> Result<Option<Seeded<ClaimSnapshot>>> {
        self.query(|i| i.claims.get(&id))
    }

    async fn player(&self, address: &PlayerAddress) -> Result<Option<Seeded<PlayerSnapshot>>> {
        self.query(|i| i.players.get(address))
    }

    async fn subscribe(&self, entity: &EntityId) -> Result<Subscription> {
        let mut inner = self.write();
        if let Some(reason) = &inner.unreachable {
            return Err(IndexerError::Unreachable(reason.clone()));
        }
        let (sub, tx) = Subscription::channel(entity.clone());
        inner.subscribers.entry(entity.clone()).or_default().push(tx);
        Ok(sub)
    }
}
