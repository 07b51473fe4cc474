//! Collaborators shared by every service of the core.

use std::sync::Arc;

use rwa_core::{AssetId, RwaError, UserId};
use rwa_ledger::{LedgerClient, SignerKey};
use rwa_state::{Asset, Identity, LifecycleError};

use crate::config::EngineConfig;
use crate::locks::{AssetLocks, TreasuryThrottle};
use crate::notify::{self, NotificationDispatcher, NotificationEvent};
use crate::store::{ReconciliationTask, SettlementStore, StoreError};

/// Retries of a read-transition-write cycle after a version conflict.
const MAX_STALE_RETRIES: u32 = 3;

pub(crate) struct Context {
    pub(crate) store: Arc<dyn SettlementStore>,
    pub(crate) ledger: Arc<dyn LedgerClient>,
    pub(crate) treasury_key: SignerKey,
    pub(crate) dispatcher: Arc<dyn NotificationDispatcher>,
    pub(crate) locks: AssetLocks,
    pub(crate) throttle: TreasuryThrottle,
    pub(crate) config: EngineConfig,
}

impl Context {
    pub(crate) async fn load_identity(&self, user_id: UserId) -> Result<Identity, RwaError> {
        self.store
            .get_identity(user_id)
            .await?
            .ok_or_else(|| RwaError::not_found("identity", user_id))
    }

    pub(crate) async fn load_asset(&self, asset_id: AssetId) -> Result<Asset, RwaError> {
        self.store
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| RwaError::not_found("asset", asset_id))
    }

    /// Load an identity, apply `transition`, and write it back, re-reading on
    /// version conflicts. A refused transition writes nothing.
    pub(crate) async fn mutate_identity<T>(
        &self,
        user_id: UserId,
        mut transition: impl FnMut(&mut Identity) -> Result<T, LifecycleError>,
    ) -> Result<(Identity, T), RwaError> {
        let mut attempt = 0;
        loop {
            let mut identity = self.load_identity(user_id).await?;
            let out = transition(&mut identity)?;
            match self.store.update_identity(&identity).await {
                Ok(stored) => return Ok((stored, out)),
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_STALE_RETRIES => {
                    attempt += 1;
                    tracing::warn!(user_id = %user_id, attempt, "identity changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// As [`mutate_identity`](Self::mutate_identity), for assets.
    pub(crate) async fn mutate_asset<T>(
        &self,
        asset_id: AssetId,
        mut transition: impl FnMut(&mut Asset) -> Result<T, LifecycleError>,
    ) -> Result<(Asset, T), RwaError> {
        let mut attempt = 0;
        loop {
            let mut asset = self.load_asset(asset_id).await?;
            let out = transition(&mut asset)?;
            match self.store.update_asset(&asset).await {
                Ok(stored) => return Ok((stored, out)),
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_STALE_RETRIES => {
                    attempt += 1;
                    tracing::warn!(asset_id = %asset_id, attempt, "asset changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Persist a reconciliation task. If the store refuses it too, the task
    /// is logged in full so an operator can re-drive it by hand.
    pub(crate) async fn queue_reconciliation(&self, task: ReconciliationTask) {
        tracing::error!(
            task_id = %task.id,
            tx_ref = %task.ledger_tx_ref,
            detail = task.last_error.as_deref().unwrap_or_default(),
            "ledger effect not reflected locally, queueing reconciliation"
        );
        if let Err(e) = self.store.enqueue_reconciliation(&task).await {
            let payload = serde_json::to_string(&task).unwrap_or_else(|se| format!("{task:?} ({se})"));
            tracing::error!(
                task_id = %task.id,
                tx_ref = %task.ledger_tx_ref,
                error = %e,
                task = %payload,
                "failed to persist reconciliation task"
            );
        }
    }

    pub(crate) fn notify(&self, event: NotificationEvent) {
        notify::emit(self.dispatcher.as_ref(), event);
    }
}
