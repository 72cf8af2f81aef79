//! Indexer trait: the abstract interface to the remote state indexer.
//!
//! This trait lets the synchronizer and the entry guard be transport
//! agnostic. Implementations include GraphQL over HTTP/websocket
//! (production) and in-memory (tests).

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::mpsc;

use chance_master_core::{
    BoardSnapshot, ClaimSnapshot, ClockSnapshot, EntityId, PlayerAddress, PlayerSnapshot,
    SessionId, SessionSnapshot,
};

use crate::error::Result;
use crate::models::ModelUpdate;

/// A seeded model together with the remote entity it lives under.
///
/// The entity id is what subscriptions are keyed by. It differs per entity
/// kind even within one session, and may be absent for models the indexer
/// has not yet attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seeded<T> {
    pub entity_id: Option<EntityId>,
    pub model: T,
}

impl<T> Seeded<T> {
    pub fn new(entity_id: Option<EntityId>, model: T) -> Self {
        Self { entity_id, model }
    }
}

/// The Indexer trait: seed queries and live subscriptions.
///
/// # Delivery
///
/// - Seed queries return `Ok(None)` when the model does not exist.
/// - Subscriptions are at-least-once with no ordering guarantee across
///   distinct entities.
#[async_trait]
pub trait Indexer: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Seed queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the session entity.
    async fn session(&self, id: SessionId) -> Result<Option<Seeded<SessionSnapshot>>>;

    /// Fetch the board entity of a session.
    async fn board(&self, id: SessionId) -> Result<Option<Seeded<BoardSnapshot>>>;

    /// Fetch the clock entity of a session.
    async fn clock(&self, id: SessionId) -> Result<Option<Seeded<ClockSnapshot>>>;

    /// Fetch the claim entity of a session.
    async fn claim(&self, id: SessionId) -> Result<Option<Seeded<ClaimSnapshot>>>;

    /// Fetch a player's matchmaking record.
    async fn player(&self, address: &PlayerAddress) -> Result<Option<Seeded<PlayerSnapshot>>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to updates of one remote entity.
    async fn subscribe(&self, entity: &EntityId) -> Result<Subscription>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription handle
// ─────────────────────────────────────────────────────────────────────────────

type OnClose = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription to one entity.
///
/// Once closed (explicitly or by drop) no further update is yielded, even
/// one already buffered in the channel.
pub struct Subscription {
    entity: EntityId,
    receiver: mpsc::UnboundedReceiver<Vec<ModelUpdate>>,
    closed: Arc<AtomicBool>,
    on_close: Option<OnClose>,
}

/// Producer half of a [`Subscription`].
#[derive(Clone)]
pub struct SubscriptionSender {
    tx: mpsc::UnboundedSender<Vec<ModelUpdate>>,
    closed: Arc<AtomicBool>,
}

impl SubscriptionSender {
    /// Deliver a batch. Returns false once the consumer has closed.
    pub fn send(&self, updates: Vec<ModelUpdate>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(updates).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

impl Subscription {
    /// Create a connected subscription/sender pair.
    pub fn channel(entity: EntityId) -> (Self, SubscriptionSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let sub = Self {
            entity,
            receiver: rx,
            closed: closed.clone(),
            on_close: None,
        };
        (sub, SubscriptionSender { tx, closed })
    }

    /// Run `f` once when the subscription closes.
    pub fn with_on_close(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shared closed flag, for consumers that forward updates elsewhere.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Receive the next batch. `None` once closed or when the producer is
    /// gone.
    pub async fn next(&mut self) -> Option<Vec<ModelUpdate>> {
        if self.is_closed() {
            return None;
        }
        let batch = self.receiver.recv().await?;
        if self.is_closed() {
            return None;
        }
        Some(batch)
    }

    /// Close the subscription. Idempotent.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.receiver.close();
        if let Some(f) = self.on_close.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl Stream for Subscription {
    type Item = Vec<ModelUpdate>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_closed() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("entity", &self.entity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chance_master_core::{ClaimKind, ClaimSnapshot};
    use std::sync::atomic::AtomicUsize;

    fn claim_update() -> Vec<ModelUpdate> {
        vec![ModelUpdate::Claim {
            session: SessionId(1),
            claim: ClaimSnapshot {
                claim: ClaimKind::Checkmate,
            },
        }]
    }

    #[tokio::test]
    async fn test_subscription_delivers_until_closed() {
        let (mut sub, tx) = Subscription::channel(EntityId::new("e1"));
        assert!(tx.send(claim_update()));
        assert_eq!(sub.next().await, Some(claim_update()));

        // Buffered but not yet received: discarded once closed.
        assert!(tx.send(claim_update()));
        sub.close();
        assert_eq!(sub.next().await, None);
        assert!(!tx.send(claim_update()));
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_on_close_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (sub, _tx) = Subscription::channel(EntityId::new("e1"));
        let mut sub = sub.with_on_close(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.close();
        sub.close();
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
