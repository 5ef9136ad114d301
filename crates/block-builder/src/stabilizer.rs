//! Tx-Pool Stabilization Synchronizer
//!
//! After sealing a block the builder waits until the execution engine's pool
//! reports it has absorbed that block. The expected head is compared and
//! cleared under one lock, so a stale or repeated event never releases a
//! waiter.

use crate::error::{Result, VmError};
use parking_lot::Mutex;
use shared_types::{Hash, Id};
use tokio::sync::{watch, Notify};
use tracing::trace;

/// Expected stabilized head plus a single-slot "stabilized" signal
#[derive(Default)]
pub struct PoolStabilizer {
    expected_head: Mutex<Option<Hash>>,
    stabilized: Notify,
}

impl PoolStabilizer {
    /// Create with no expected head
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the hash of a block sealed locally
    pub fn expect(&self, hash: Hash) {
        *self.expected_head.lock() = Some(hash);
    }

    /// Currently expected head
    pub fn expected(&self) -> Option<Hash> {
        *self.expected_head.lock()
    }

    /// Handle a mined-block event; returns true if it released the waiter
    pub fn on_mined(&self, hash: &Hash) -> bool {
        let mut expected = self.expected_head.lock();
        if expected.as_ref() != Some(hash) {
            return false;
        }
        *expected = None;
        self.stabilized.notify_one();
        trace!("[evm] Tx pool stabilized on {}", Id(*hash));
        true
    }

    /// Wait for the stabilized signal or shutdown
    pub async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        if *shutdown.borrow() {
            return Err(VmError::Shutdown);
        }
        tokio::select! {
            _ = self.stabilized.notified() => Ok(()),
            _ = shutdown.changed() => Err(VmError::Shutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_matching_event_releases_one_wait() {
        let stabilizer = PoolStabilizer::new();
        let (_tx, mut shutdown) = watch::channel(false);
        stabilizer.expect([1; 32]);

        assert!(stabilizer.on_mined(&[1; 32]));
        assert_eq!(stabilizer.expected(), None);
        stabilizer.wait(&mut shutdown).await.unwrap();

        // Second event for the same head is a no-op
        assert!(!stabilizer.on_mined(&[1; 32]));
        let again = tokio::time::timeout(Duration::from_millis(20), stabilizer.wait(&mut shutdown)).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_other_hash_leaves_wait_pending() {
        let stabilizer = Arc::new(PoolStabilizer::new());
        let (_tx, mut shutdown) = watch::channel(false);
        stabilizer.expect([1; 32]);

        assert!(!stabilizer.on_mined(&[2; 32]));
        assert_eq!(stabilizer.expected(), Some([1; 32]));
        let pending = tokio::time::timeout(Duration::from_millis(20), stabilizer.wait(&mut shutdown)).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_waiter_released_by_later_event() {
        let stabilizer = Arc::new(PoolStabilizer::new());
        let (_tx, mut shutdown) = watch::channel(false);
        stabilizer.expect([3; 32]);

        let waiter = {
            let stabilizer = Arc::clone(&stabilizer);
            tokio::spawn(async move { stabilizer.wait(&mut shutdown).await })
        };
        tokio::task::yield_now().await;
        stabilizer.on_mined(&[3; 32]);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiter() {
        let stabilizer = PoolStabilizer::new();
        let (tx, mut shutdown) = watch::channel(false);
        stabilizer.expect([1; 32]);
        tx.send(true).unwrap();
        assert!(matches!(stabilizer.wait(&mut shutdown).await, Err(VmError::Shutdown)));
    }
}
