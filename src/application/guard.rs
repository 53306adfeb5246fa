use crate::domain::ports::{InFlightMarker, InFlightStoreBox};
use crate::domain::wallet::WalletId;
use crate::error::{LedgerError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Exclusive access to one wallet; released on drop.
pub struct WalletLock {
    _guard: OwnedMutexGuard<()>,
}

/// Per-wallet serialization of balance-mutating operations.
///
/// Each wallet gets its own async mutex, so different wallets never contend.
/// Work run under the lock is bracketed by a durable in-flight marker: a
/// marker that outlives its operation means the process died (or the store
/// failed) half way, and the next holder of the lock must roll the wallet
/// forward before doing anything else.
pub struct ConcurrencyGuard {
    locks: Mutex<HashMap<WalletId, Arc<AsyncMutex<()>>>>,
    markers: InFlightStoreBox,
    lock_timeout: Duration,
    lock_attempts: u32,
}

impl ConcurrencyGuard {
    pub fn new(markers: InFlightStoreBox, lock_timeout: Duration, lock_attempts: u32) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            markers,
            lock_timeout,
            lock_attempts: lock_attempts.max(1),
        }
    }

    fn lock_for(&self, wallet_id: &WalletId) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| LedgerError::Storage("wallet lock table poisoned".into()))?;
        Ok(locks.entry(wallet_id.clone()).or_default().clone())
    }

    /// Takes the wallet's lock, retrying up to the configured number of attempts.
    pub async fn acquire(&self, wallet_id: &WalletId) -> Result<WalletLock> {
        let lock = self.lock_for(wallet_id)?;
        for attempt in 1..=self.lock_attempts {
            match tokio::time::timeout(self.lock_timeout, lock.clone().lock_owned()).await {
                Ok(guard) => return Ok(WalletLock { _guard: guard }),
                Err(_) => warn!(
                    wallet_id = %wallet_id,
                    attempt,
                    max_attempts = self.lock_attempts,
                    "wallet lock contended"
                ),
            }
        }
        Err(LedgerError::ConcurrencyConflict(wallet_id.clone()))
    }

    /// Marker left behind by an operation that did not finish.
    ///
    /// Only meaningful while holding the wallet's lock.
    pub async fn stale_marker(&self, wallet_id: &WalletId) -> Result<Option<InFlightMarker>> {
        Ok(self
            .markers
            .all()
            .await?
            .into_iter()
            .find(|m| &m.wallet_id == wallet_id))
    }

    pub async fn markers(&self) -> Result<Vec<InFlightMarker>> {
        self.markers.all().await
    }

    pub async fn clear_marker(&self, wallet_id: &WalletId) -> Result<()> {
        self.markers.remove(wallet_id).await
    }

    /// Runs `work` between writing and clearing the wallet's in-flight marker.
    ///
    /// The caller must hold the wallet's lock. The marker is kept when `work`
    /// fails in a way that may have left partial writes behind.
    pub async fn run_marked<T>(
        &self,
        wallet_id: &WalletId,
        operation: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.markers
            .put(InFlightMarker {
                wallet_id: wallet_id.clone(),
                operation: operation.to_string(),
                started_at: Utc::now(),
            })
            .await?;

        let result = work.await;
        match &result {
            Ok(_) => self.markers.remove(wallet_id).await?,
            Err(e) if e.is_rejection() => self.markers.remove(wallet_id).await?,
            Err(e) => warn!(
                wallet_id = %wallet_id,
                operation,
                error = %e,
                "operation failed part way, in-flight marker kept for recovery"
            ),
        }
        debug!(wallet_id = %wallet_id, operation, ok = result.is_ok(), "wallet operation finished");
        result
    }

    /// Serializes `work` with every other mutation of the same wallet.
    pub async fn with_wallet_lock<T>(
        &self,
        wallet_id: &WalletId,
        operation: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let _lock = self.acquire(wallet_id).await?;
        self.run_marked(wallet_id, operation, work).await
    }
}
