//! In-process serialization primitives.
//!
//! [`AssetLocks`] linearizes trades and token creation per asset within one
//! process. The store's conditional inventory update remains the backstop
//! across processes. [`TreasuryThrottle`] bounds concurrent calls signed by
//! the shared treasury key.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use rwa_core::{AssetId, LedgerFailure, LedgerFailureKind, RwaError};

/// One async mutex per asset, created on first use.
///
/// Entries are never evicted: the table holds one mutex for every asset
/// touched since the process started, so it grows with the asset count and
/// not with traffic.
#[derive(Debug, Default)]
pub struct AssetLocks {
    locks: DashMap<AssetId, Arc<Mutex<()>>>,
}

impl AssetLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `asset_id`.
    pub async fn acquire(&self, asset_id: AssetId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the DashMap shard lock is released before awaiting.
        let lock = self
            .locks
            .entry(asset_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Assets that have a mutex in the table.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

/// Bounds concurrent treasury-signed ledger calls.
#[derive(Debug, Clone)]
pub struct TreasuryThrottle {
    permits: Arc<Semaphore>,
}

impl TreasuryThrottle {
    /// Allow at most `limit` concurrent calls.
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Wait for a permit.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, RwaError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| RwaError::Ledger(LedgerFailure::new(LedgerFailureKind::Transient, e.to_string())))
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
