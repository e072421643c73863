//! Cancellation token and job generation counter.
//!
//! Every job gets a fresh generation number and a fresh token. The token
//! signals the stream read loop to stop; the generation lets the reducer
//! discard events from a stream that keeps draining after its job was
//! cancelled or superseded.
//!
//! Cancellation is wakeable, not just pollable: the read loop selects on
//! [`CancelToken::cancelled`] against the next chunk, so a cancel issued
//! while the transport is stalled takes effect immediately instead of at
//! the next chunk arrival.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Monotonic source of job generation numbers, starting at 1.
#[derive(Debug, Default)]
pub struct GenerationCounter(AtomicU64);

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Default)]
struct Shared {
    flag: AtomicBool,
    notify: Notify,
}

/// Cancellation signal for one job generation. Cloning shares the flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    generation: u64,
    shared: Arc<Shared>,
}

impl CancelToken {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.shared.flag.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled. Returns immediately when it
    /// already is.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a cancel landing
            // between the check and the await still wakes this waiter.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_generations_increase() {
        let counter = GenerationCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.next(), 3);
    }

    #[test]
    fn test_cancel_visible_through_clones() {
        let token = CancelToken::new(1);
        let shared = token.clone();
        assert!(!shared.is_cancelled());

        token.cancel();
        assert!(shared.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancelToken::new(1);
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("already-cancelled token resolves at once");
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_waiter() {
        let token = CancelToken::new(1);
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter woken by cancel")
            .expect("waiter task completes");
    }
}
