//! # Verification State Machine
//!
//! Drives identities through KYC and assets through review. Each operation
//! loads the record, runs the transition from `rwa-state`, and writes it
//! back conditional on the version it read; a concurrent write is retried
//! against the fresh record a bounded number of times.
//!
//! Approving an asset mints its token first (see
//! [`TokenizationCoordinator`]) and installs the ledger reference in the
//! same write that flips the status. If that write fails after the mint, a
//! reconciliation task re-drives the approval from the stored issuance
//! record without a second mint.

use std::sync::Arc;

use rwa_core::{
    AssetCategory, AssetId, ConflictReason, LedgerAccountId, LedgerTxRef, RwaError, UserId,
};
use rwa_state::{Asset, Identity, TokenizationDraft, TokenizationOverrides, VerificationStatus};

use crate::context::Context;
use crate::notify::{NotificationEvent, NotificationKind};
use crate::store::{check_asset_invariants, ReconciliationKind, ReconciliationTask};
use crate::tokenization::TokenizationCoordinator;

/// An approval that did not complete.
enum ApprovalFailure {
    /// Nothing reached the ledger, or the mint itself failed.
    Refused(RwaError),
    /// The token exists but the approved asset was not written.
    WriteFailed {
        issuance_tx_ref: LedgerTxRef,
        error: RwaError,
    },
}

impl ApprovalFailure {
    fn into_error(self) -> RwaError {
        match self {
            Self::Refused(e) | Self::WriteFailed { error: e, .. } => e,
        }
    }
}

impl From<RwaError> for ApprovalFailure {
    fn from(err: RwaError) -> Self {
        Self::Refused(err)
    }
}

/// KYC and asset review.
#[derive(Clone)]
pub struct VerificationService {
    ctx: Arc<Context>,
    tokenization: TokenizationCoordinator,
}

impl VerificationService {
    pub(crate) fn new(ctx: Arc<Context>, tokenization: TokenizationCoordinator) -> Self {
        Self { ctx, tokenization }
    }

    // -- identities ---------------------------------------------------------

    /// Create an identity in `NOT_SUBMITTED`.
    pub async fn register_identity(&self, user_id: UserId) -> Result<Identity, RwaError> {
        let identity = Identity::register(user_id);
        self.ctx.store.insert_identity(&identity).await?;
        tracing::info!(user_id = %user_id, "identity registered");
        Ok(identity)
    }

    /// Fetch an identity.
    pub async fn identity(&self, user_id: UserId) -> Result<Identity, RwaError> {
        self.ctx.load_identity(user_id).await
    }

    /// Whether the user may trade: KYC approved and a wallet linked.
    pub async fn is_verified(&self, user_id: UserId) -> Result<bool, RwaError> {
        Ok(self.ctx.load_identity(user_id).await?.is_verified())
    }

    /// `NOT_SUBMITTED → PENDING`.
    pub async fn submit_kyc(&self, user_id: UserId) -> Result<Identity, RwaError> {
        let (identity, ()) = self
            .ctx
            .mutate_identity(user_id, |identity| identity.submit_kyc())
            .await?;
        tracing::info!(user_id = %user_id, "kyc submitted");
        Ok(identity)
    }

    /// `PENDING → APPROVED`.
    pub async fn approve_identity(&self, user_id: UserId) -> Result<Identity, RwaError> {
        let (identity, ()) = self
            .ctx
            .mutate_identity(user_id, |identity| identity.approve())
            .await?;
        tracing::info!(user_id = %user_id, verified = identity.is_verified(), "kyc approved");
        self.ctx
            .notify(NotificationEvent::new(user_id, NotificationKind::KycApproved));
        Ok(identity)
    }

    /// `PENDING → REJECTED`. Requires a non-empty reason.
    pub async fn reject_identity(&self, user_id: UserId, reason: &str) -> Result<Identity, RwaError> {
        let (identity, ()) = self
            .ctx
            .mutate_identity(user_id, |identity| identity.reject(reason))
            .await?;
        tracing::info!(user_id = %user_id, "kyc rejected");
        self.ctx.notify(NotificationEvent::new(
            user_id,
            NotificationKind::KycRejected {
                reason: reason.trim().to_string(),
            },
        ));
        Ok(identity)
    }

    /// Link a ledger wallet, replacing any previous link.
    ///
    /// The treasury account cannot be linked: it already holds every
    /// unsold fraction.
    pub async fn link_wallet(
        &self,
        user_id: UserId,
        account: LedgerAccountId,
    ) -> Result<Identity, RwaError> {
        if &account == self.ctx.ledger.treasury_account() {
            return Err(RwaError::Validation(format!(
                "{account} is the treasury account and cannot be linked to a user"
            )));
        }
        let (identity, ()) = self
            .ctx
            .mutate_identity(user_id, |identity| {
                identity.link_wallet(account.clone());
                Ok(())
            })
            .await?;
        tracing::info!(user_id = %user_id, account = %account, "wallet linked");
        Ok(identity)
    }

    /// Remove the wallet link.
    pub async fn unlink_wallet(&self, user_id: UserId) -> Result<Identity, RwaError> {
        let (identity, previous) = self
            .ctx
            .mutate_identity(user_id, |identity| identity.unlink_wallet())
            .await?;
        tracing::info!(user_id = %user_id, account = %previous, "wallet unlinked");
        Ok(identity)
    }

    // -- assets -------------------------------------------------------------

    /// Submit an asset for review. The owner must be registered but need
    /// not be verified.
    pub async fn submit_asset(
        &self,
        owner: UserId,
        name: &str,
        description: &str,
        category: AssetCategory,
        draft: &TokenizationDraft,
    ) -> Result<Asset, RwaError> {
        self.ctx.load_identity(owner).await?;
        let asset = Asset::submit(owner, name, description, category, draft)?;
        self.ctx.store.insert_asset(&asset).await?;
        tracing::info!(asset_id = %asset.id, owner = %owner, category = asset.category.name(), "asset submitted");
        Ok(asset)
    }

    /// Fetch an asset.
    pub async fn asset(&self, asset_id: AssetId) -> Result<Asset, RwaError> {
        self.ctx.load_asset(asset_id).await
    }

    /// `PENDING → APPROVED`: mint the token, then install the final
    /// tokenization and ledger reference and list the asset.
    ///
    /// Returns `ReconciliationRequired` if the token was minted but the
    /// approval could not be written; the approval is then completed by
    /// [`Reconciler::run_once`](crate::Reconciler::run_once).
    pub async fn approve_asset(
        &self,
        asset_id: AssetId,
        overrides: &TokenizationOverrides,
    ) -> Result<Asset, RwaError> {
        match self.try_approve(asset_id, overrides).await {
            Ok(asset) => Ok(asset),
            Err(ApprovalFailure::Refused(e)) => Err(e),
            Err(ApprovalFailure::WriteFailed {
                issuance_tx_ref,
                error,
            }) => {
                let detail = error.to_string();
                self.ctx
                    .queue_reconciliation(ReconciliationTask::new(
                        ReconciliationKind::ApproveAsset { asset_id },
                        issuance_tx_ref.clone(),
                        &detail,
                    ))
                    .await;
                Err(RwaError::ReconciliationRequired {
                    ledger_tx_ref: issuance_tx_ref,
                    detail,
                })
            }
        }
    }

    /// Complete an approval whose write failed earlier. Does not queue.
    pub(crate) async fn redrive_approval(&self, asset_id: AssetId) -> Result<Asset, RwaError> {
        self.try_approve(asset_id, &TokenizationOverrides::default())
            .await
            .map_err(ApprovalFailure::into_error)
    }

    async fn try_approve(
        &self,
        asset_id: AssetId,
        overrides: &TokenizationOverrides,
    ) -> Result<Asset, ApprovalFailure> {
        let _guard = self.ctx.locks.acquire(asset_id).await;
        let mut asset = self.ctx.load_asset(asset_id).await?;
        if asset.verification_status != VerificationStatus::Pending {
            return Err(RwaError::InvalidTransition {
                from: asset.verification_status.to_string(),
                to: VerificationStatus::Approved.to_string(),
            }
            .into());
        }

        let issued = self.tokenization.issue(&asset, overrides).await?;
        let issuance_tx_ref = issued.ledger_ref.issuance_tx_ref.clone();
        let token_id = issued.ledger_ref.token_id.clone();
        asset
            .approve(issued.tokenization, issued.ledger_ref)
            .map_err(|e| ApprovalFailure::WriteFailed {
                issuance_tx_ref: issuance_tx_ref.clone(),
                error: e.into(),
            })?;

        let stored = self
            .ctx
            .store
            .update_asset(&asset)
            .await
            .map_err(|e| ApprovalFailure::WriteFailed {
                issuance_tx_ref,
                error: e.into(),
            })?;
        check_asset_invariants(&stored);

        tracing::info!(
            asset_id = %asset_id,
            token_id = %token_id,
            available = stored.tokenization.available_tokens,
            "asset approved and listed"
        );
        self.ctx.notify(NotificationEvent::new(
            stored.owner,
            NotificationKind::AssetApproved { asset_id, token_id },
        ));
        Ok(stored)
    }

    /// `PENDING → REJECTED`. Requires a non-empty reason.
    ///
    /// An asset whose token was already minted by an interrupted approval
    /// cannot be rejected; the conflict names the token, and the approval is
    /// completed by reconciliation.
    pub async fn reject_asset(&self, asset_id: AssetId, reason: &str) -> Result<Asset, RwaError> {
        let _guard = self.ctx.locks.acquire(asset_id).await;
        let current = self.ctx.load_asset(asset_id).await?;
        if current.verification_status == VerificationStatus::Pending {
            if let Some(token_id) = self.tokenization.issued_token(asset_id).await? {
                tracing::warn!(asset_id = %asset_id, token_id = %token_id, "rejection refused, token already issued");
                return Err(RwaError::Conflict(ConflictReason::TokenIssued(token_id)));
            }
        }
        let (asset, ()) = self
            .ctx
            .mutate_asset(asset_id, |asset| asset.reject(reason))
            .await?;
        tracing::info!(asset_id = %asset_id, "asset rejected");
        self.ctx.notify(NotificationEvent::new(
            asset.owner,
            NotificationKind::AssetRejected {
                asset_id,
                reason: reason.trim().to_string(),
            },
        ));
        Ok(asset)
    }

    /// Withdraw an approved asset from sale.
    pub async fn delist_asset(&self, asset_id: AssetId) -> Result<Asset, RwaError> {
        let _guard = self.ctx.locks.acquire(asset_id).await;
        let (asset, ()) = self.ctx.mutate_asset(asset_id, Asset::delist).await?;
        tracing::info!(asset_id = %asset_id, "asset delisted");
        Ok(asset)
    }

    /// Return a delisted asset to sale.
    pub async fn relist_asset(&self, asset_id: AssetId) -> Result<Asset, RwaError> {
        let _guard = self.ctx.locks.acquire(asset_id).await;
        let (asset, ()) = self.ctx.mutate_asset(asset_id, Asset::relist).await?;
        tracing::info!(asset_id = %asset_id, "asset relisted");
        Ok(asset)
    }
}
