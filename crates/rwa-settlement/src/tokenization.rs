//! # Tokenization Coordinator
//!
//! Issues the ledger token for an asset exactly once.
//!
//! Before the mint is submitted, an [`IssuanceRecord`] fixing the mint
//! reference, the admin and supply keys, and the tokenization parameters is
//! persisted. Every later attempt for the same asset reuses that record:
//!
//! 1. the asset already carries a ledger reference: return it;
//! 2. the record holds a confirmed issuance: return it without a ledger call;
//! 3. the record has no confirmed issuance: resubmit under the same
//!    reference. A duplicate-reference rejection or a timeout is resolved
//!    through the transaction status, never by minting under a new reference.
//!
//! Token creation for one asset is serialized by the per-asset lock; the
//! mint itself runs under the treasury throttle.

use std::sync::Arc;

use rwa_core::{AssetId, LedgerFailure, LedgerFailureKind, RwaError, Timestamp, TokenId};
use rwa_ledger::{CreateTokenRequest, LedgerTxKind, SignerKey, TokenIssuance};
use rwa_state::{Asset, LedgerRef, Tokenization, TokenizationOverrides, VerificationStatus};

use crate::confirm::{self, Confirmation};
use crate::context::Context;
use crate::store::IssuanceRecord;

/// Tokens are whole fractions.
const TOKEN_DECIMALS: u32 = 0;

/// A token issued (or previously issued) for an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Where the token lives on the ledger.
    pub ledger_ref: LedgerRef,
    /// Parameters the token was minted with.
    pub tokenization: Tokenization,
}

/// Creates ledger tokens for pending assets.
#[derive(Clone)]
pub struct TokenizationCoordinator {
    ctx: Arc<Context>,
}

impl TokenizationCoordinator {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Issue the token for `asset_id`, or return the one already issued.
    ///
    /// Does not approve the asset; see
    /// [`VerificationService::approve_asset`](crate::VerificationService::approve_asset).
    pub async fn create_token(
        &self,
        asset_id: AssetId,
        overrides: &TokenizationOverrides,
    ) -> Result<IssuedToken, RwaError> {
        let _guard = self.ctx.locks.acquire(asset_id).await;
        let asset = self.ctx.load_asset(asset_id).await?;
        self.issue(&asset, overrides).await
    }

    /// Issue under a per-asset lock the caller already holds.
    pub(crate) async fn issue(
        &self,
        asset: &Asset,
        overrides: &TokenizationOverrides,
    ) -> Result<IssuedToken, RwaError> {
        if let Some(ledger_ref) = &asset.ledger_ref {
            return Ok(IssuedToken {
                ledger_ref: ledger_ref.clone(),
                tokenization: asset.tokenization.clone(),
            });
        }

        let record = self.issuance_record(asset, overrides).await?;
        if let Some(issuance) = &record.issuance {
            tracing::debug!(asset_id = %asset.id, token_id = %issuance.token_id, "reusing confirmed issuance");
            return Ok(issued(&record, issuance));
        }

        let issuance = self.mint(asset, &record).await?;
        if let Err(e) = self.ctx.store.record_issuance(asset.id, &issuance).await {
            // The mint reference is on the record; the next attempt confirms it by status.
            tracing::warn!(asset_id = %asset.id, error = %e, "failed to record confirmed issuance");
        }
        tracing::info!(
            asset_id = %asset.id,
            token_id = %issuance.token_id,
            tx_ref = %issuance.tx_ref,
            supply = record.tokenization.total_supply,
            "token issued"
        );
        Ok(issued(&record, &issuance))
    }

    /// The token the asset's recorded mint created on the ledger, if any.
    ///
    /// A mint whose outcome cannot be established is an unconfirmed ledger
    /// error: the token may exist.
    pub(crate) async fn issued_token(&self, asset_id: AssetId) -> Result<Option<TokenId>, RwaError> {
        let Some(record) = self.ctx.store.get_issuance(asset_id).await? else {
            return Ok(None);
        };
        if let Some(issuance) = record.issuance {
            return Ok(Some(issuance.token_id));
        }
        match confirm::await_confirmation(
            self.ctx.ledger.as_ref(),
            &record.mint_tx_ref,
            self.ctx.config.status_checks,
            self.ctx.config.status_poll_interval,
        )
        .await
        {
            Confirmation::Applied(tx) => tx.token_id.map(Some).ok_or_else(|| {
                RwaError::Ledger(LedgerFailure::new(
                    LedgerFailureKind::Unconfirmed,
                    format!("mint {} settled without a token", record.mint_tx_ref),
                ))
            }),
            Confirmation::Failed(_) | Confirmation::NotApplied => Ok(None),
            Confirmation::Undetermined(detail) => Err(RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::Unconfirmed,
                format!("mint {} unresolved: {detail}", record.mint_tx_ref),
            ))),
        }
    }

    /// The stored issuance record, creating and persisting it on first use.
    async fn issuance_record(
        &self,
        asset: &Asset,
        overrides: &TokenizationOverrides,
    ) -> Result<IssuanceRecord, RwaError> {
        if let Some(record) = self.ctx.store.get_issuance(asset.id).await? {
            if asset.verification_status != VerificationStatus::Pending {
                return Err(RwaError::InvalidTransition {
                    from: asset.verification_status.to_string(),
                    to: VerificationStatus::Approved.to_string(),
                });
            }
            let requested = asset.prepare_approval(overrides).ok();
            if requested.is_some_and(|t| t != record.tokenization) {
                tracing::warn!(
                    asset_id = %asset.id,
                    "issuance already started with different parameters; keeping the recorded ones"
                );
            }
            return Ok(record);
        }

        let tokenization = asset.prepare_approval(overrides)?;
        let fresh = IssuanceRecord {
            asset_id: asset.id,
            mint_tx_ref: rwa_core::LedgerTxRef::generate(self.ctx.ledger.treasury_account()),
            tokenization,
            admin_key: SignerKey::generate(),
            supply_key: SignerKey::generate(),
            issuance: None,
            created_at: Timestamp::now(),
        };
        // A concurrent writer in another process may have won; the stored record rules.
        Ok(self.ctx.store.save_issuance_keys(&fresh).await?)
    }

    async fn mint(&self, asset: &Asset, record: &IssuanceRecord) -> Result<TokenIssuance, RwaError> {
        let req = CreateTokenRequest {
            tx_ref: record.mint_tx_ref.clone(),
            name: asset.name.clone(),
            symbol: record.tokenization.symbol.clone(),
            total_supply: record.tokenization.total_supply,
            decimals: TOKEN_DECIMALS,
            treasury_account_id: self.ctx.ledger.treasury_account().clone(),
            admin_key: record.admin_key.public_key(),
            supply_key: record.supply_key.public_key(),
            memo: format!("{}:{}", self.ctx.config.token_memo_prefix, asset.id),
        };

        let result = {
            let _permit = self.ctx.throttle.acquire().await?;
            self.ctx
                .ledger
                .create_fungible_token(&req, &record.admin_key)
                .await
        };

        let err = match result {
            Ok(issuance) => return Ok(issuance),
            Err(e) if e.is_outcome_unknown() => e,
            Err(e) => {
                tracing::warn!(asset_id = %asset.id, tx_ref = %req.tx_ref, error = %e, "token creation rejected");
                return Err(e.into());
            }
        };

        tracing::warn!(asset_id = %asset.id, tx_ref = %req.tx_ref, error = %err, "mint outcome unknown, querying status");
        match confirm::await_confirmation(
            self.ctx.ledger.as_ref(),
            &req.tx_ref,
            self.ctx.config.status_checks,
            self.ctx.config.status_poll_interval,
        )
        .await
        {
            Confirmation::Applied(tx) => match (tx.kind, tx.token_id) {
                (LedgerTxKind::TokenCreation, Some(token_id)) => Ok(TokenIssuance {
                    token_id,
                    treasury_account_id: req.treasury_account_id,
                    supply_key: req.supply_key,
                    admin_key: req.admin_key,
                    tx_ref: req.tx_ref,
                }),
                (kind, _) => Err(RwaError::Ledger(LedgerFailure::new(
                    LedgerFailureKind::Unconfirmed,
                    format!("mint {} resolved to a {kind:?} record without a token", req.tx_ref),
                ))),
            },
            Confirmation::Failed(tx) => Err(confirm::rejection_from_status(&tx).into()),
            Confirmation::NotApplied => Err(RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::Transient,
                format!("mint {} was not applied: {err}", req.tx_ref),
            ))),
            Confirmation::Undetermined(detail) => Err(RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::Unconfirmed,
                format!("mint {} unresolved: {detail}", req.tx_ref),
            ))),
        }
    }
}

fn issued(record: &IssuanceRecord, issuance: &TokenIssuance) -> IssuedToken {
    IssuedToken {
        ledger_ref: LedgerRef {
            token_id: issuance.token_id.clone(),
            treasury_account_id: issuance.treasury_account_id.clone(),
            issuance_tx_ref: issuance.tx_ref.clone(),
        },
        tokenization: record.tokenization.clone(),
    }
}
