//! Exclusive broadcast locks per wallet, network and asset

use crate::chain::Network;

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Identifies the account whose nonce/UTXO set a broadcast touches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub wallet_id: String,
    pub network: Network,
    pub asset: String,
}

/// Serializes transaction broadcasts that share a `LockKey`
#[derive(Default)]
pub struct ActionLocks {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl ActionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` while holding the lock; the guard drops on every exit path
    pub async fn with_lock<F, Fut, T>(
        &self,
        network: Network,
        wallet_id: &str,
        asset: &str,
        action: F,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = LockKey {
            wallet_id: wallet_id.to_string(),
            network,
            asset: asset.to_string(),
        };
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock_owned().await;
        debug!("Acquired {} lock for wallet {} on {}", asset, wallet_id, network);
        action().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn critical_section(active: &AtomicUsize, peak: &AtomicUsize) {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        active.fetch_sub(1, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = ActionLocks::new();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        futures::future::join(
            locks.with_lock(Network::Mainnet, "w1", "ETH", || critical_section(&active, &peak)),
            locks.with_lock(Network::Mainnet, "w1", "ETH", || critical_section(&active, &peak)),
        )
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn different_assets_run_concurrently() {
        let locks = ActionLocks::new();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        futures::future::join(
            locks.with_lock(Network::Mainnet, "w1", "ETH", || critical_section(&active, &peak)),
            locks.with_lock(Network::Mainnet, "w1", "BTC", || critical_section(&active, &peak)),
        )
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lock_released_after_error() {
        let locks = ActionLocks::new();
        let failed: Result<(), &str> = locks
            .with_lock(Network::Testnet, "w1", "BTC", || async { Err("broadcast failed") })
            .await;
        assert!(failed.is_err());

        let ok = tokio::time::timeout(
            Duration::from_secs(1),
            locks.with_lock(Network::Testnet, "w1", "BTC", || async { 7 }),
        )
        .await
        .unwrap();
        assert_eq!(ok, 7);
    }
}
