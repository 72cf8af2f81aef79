//! Cancelable deferred actions keyed by a monotonic generation.
//!
//! Cancellation is cooperative: aborting the sleeping task is best effort,
//! so a firing that was already in flight may still be delivered. Every
//! firing therefore carries the token it was armed with, and the owner
//! only acts on it if [`Deferred::accept`] confirms the token is still the
//! latest one armed.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A single cancelable deferred action.
#[derive(Debug, Default)]
pub struct Deferred {
    generation: u64,
    armed: Option<(u64, JoinHandle<()>)>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the action: after `delay`, `make(token)` is sent on
    /// `tx`. Any previously armed firing is cancelled.
    pub fn arm<T, F>(&mut self, delay: Duration, tx: mpsc::UnboundedSender<T>, make: F) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        self.cancel();
        let token = self.generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(make(token));
        });
        self.armed = Some((token, handle));
        token
    }

    /// Cancel the armed action, if any. Bumps the generation so an
    /// in-flight firing is rejected by [`accept`](Self::accept).
    pub fn cancel(&mut self) {
        self.generation += 1;
        if let Some((_, handle)) = self.armed.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Whether `token` is the armed firing. Disarms on success.
    pub fn accept(&mut self, token: u64) -> bool {
        match &self.armed {
            Some((armed, _)) if *armed == token => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.armed.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut deferred = Deferred::new();
        let token = deferred.arm(Duration::from_secs(2), tx, |t| t);

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, token);
        assert!(deferred.accept(fired));
        assert!(!deferred.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_rejects_stale_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut deferred = Deferred::new();
        let first = deferred.arm(Duration::from_secs(1), tx.clone(), |t| t);
        let second = deferred.arm(Duration::from_secs(3), tx, |t| t);
        assert_ne!(first, second);

        // A stale firing that slipped through is not accepted.
        assert!(!deferred.accept(first));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(rx.recv().await, Some(second));
        assert!(deferred.accept(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut deferred = Deferred::new();
        let token = deferred.arm(Duration::from_secs(1), tx, |t| t);
        deferred.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert!(!deferred.accept(token));
    }
}
