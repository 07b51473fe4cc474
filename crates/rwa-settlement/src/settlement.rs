//! # Settlement Engine
//!
//! Executes trades of asset fractions.
//!
//! A buy moves tokens from the treasury to the buyer's wallet on the ledger
//! and then commits the trade locally: inventory decrement, portfolio
//! update and transaction record in one atomic store write. A sell is
//! recorded off-ledger; no tokens move and inventory is untouched.
//!
//! ## Ordering
//!
//! Trades on one asset are serialized by the per-asset lock, and the
//! store's conditional inventory decrement catches any race the lock
//! cannot see (another process). The ledger transfer is submitted only
//! after every local precondition holds, so a refused buy leaves no trace
//! anywhere.
//!
//! ## Failure after settlement
//!
//! Once the ledger has moved tokens the trade is never rolled back. If the
//! local commit fails, a [`ReconciliationKind::CommitTrade`] task carrying
//! the complete commit is queued and the caller gets
//! `ReconciliationRequired`. If the transfer outcome cannot be established,
//! a [`ReconciliationKind::ConfirmTransfer`] task is queued and the caller
//! gets an unconfirmed ledger error.
//!
//! ## Idempotent buys
//!
//! A buy carrying an idempotency key reserves the key with its complete
//! commit, ledger reference included, before the transfer is submitted. A
//! retry of the same order finds the reservation and resumes it: the ledger
//! is asked whether the reserved transfer settled, and if it did not the same
//! reference is resubmitted, which the ledger deduplicates. A key therefore
//! moves tokens at most once however the first attempt ended. The
//! reservation is dropped when the commit lands, or when the ledger
//! definitively refuses the transfer.
//!
//! A buy without a key has no such anchor. When its transfer is reported
//! as not applied the caller gets a retryable error, and a retry is a new
//! order with a new reference; should the first submission still land
//! later, the account audit reports it as an unrecorded transfer.

use std::sync::Arc;

use rwa_core::{
    Amount, AssetId, ConflictReason, LedgerAccountId, LedgerFailure, LedgerFailureKind,
    LedgerTxRef, RwaError, TokenId, UserId,
};
use rwa_ledger::types::codes;
use rwa_ledger::{AssociateRequest, SignerKey, TransferRequest};
use rwa_state::{Asset, LedgerRef, TradeSide, Transaction, VerificationStatus};

use crate::confirm::{self, Confirmation};
use crate::context::Context;
use crate::notify::{NotificationEvent, NotificationKind};
use crate::store::{CommitOutcome, ReconciliationKind, ReconciliationTask, TradeCommit};

/// A purchase of fractions from the treasury.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyOrder {
    /// Buyer.
    pub user_id: UserId,
    /// Asset bought.
    pub asset_id: AssetId,
    /// Whole fractions.
    pub quantity: u64,
    /// Price per fraction to record. Defaults to the asset's listed price.
    pub limit_price: Option<Amount>,
    /// Client key that makes retries of this order safe.
    pub idempotency_key: Option<String>,
}

impl BuyOrder {
    /// A buy at the listed price.
    pub fn market(user_id: UserId, asset_id: AssetId, quantity: u64) -> Self {
        Self {
            user_id,
            asset_id,
            quantity,
            limit_price: None,
            idempotency_key: None,
        }
    }

    /// Record the trade at `price` instead of the listed price.
    pub fn with_limit_price(mut self, price: Amount) -> Self {
        self.limit_price = Some(price);
        self
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A sale of held fractions, recorded without a ledger leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellOrder {
    /// Seller.
    pub user_id: UserId,
    /// Asset sold.
    pub asset_id: AssetId,
    /// Whole fractions.
    pub quantity: u64,
    /// Agreed price per fraction.
    pub price_per_token: Amount,
    /// Client key that makes retries of this order safe.
    pub idempotency_key: Option<String>,
}

impl SellOrder {
    /// A sale at `price_per_token`.
    pub fn new(user_id: UserId, asset_id: AssetId, quantity: u64, price_per_token: Amount) -> Self {
        Self {
            user_id,
            asset_id,
            quantity,
            price_per_token,
            idempotency_key: None,
        }
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Result of a token association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// The association was submitted and took effect.
    Associated(LedgerTxRef),
    /// The account was already associated with the token.
    AlreadyAssociated,
}

/// Executes buys and sells.
#[derive(Clone)]
pub struct SettlementEngine {
    ctx: Arc<Context>,
}

impl SettlementEngine {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Buy fractions from the treasury.
    ///
    /// Replaying an order with the same idempotency key returns the original
    /// transaction, or resumes the original transfer if it has not been
    /// committed yet. See the module documentation.
    pub async fn buy(&self, order: &BuyOrder) -> Result<Transaction, RwaError> {
        if order.quantity == 0 {
            return Err(RwaError::Validation("quantity must be positive".into()));
        }
        if order.limit_price.is_some_and(|p| p.is_zero()) {
            return Err(RwaError::Validation("limit price must be positive".into()));
        }

        let _guard = self.ctx.locks.acquire(order.asset_id).await;
        if let Some(tx) = self
            .replay(
                order.user_id,
                order.idempotency_key.as_deref(),
                order.asset_id,
                TradeSide::Buy,
                order.quantity,
            )
            .await?
        {
            return Ok(tx);
        }

        if let Some(key) = order.idempotency_key.as_deref() {
            if let Some(reserved) = self.ctx.store.reserved_order(order.user_id, key).await? {
                if !reserved.transaction.same_order(
                    order.user_id,
                    order.asset_id,
                    TradeSide::Buy,
                    order.quantity,
                ) {
                    return Err(RwaError::Conflict(ConflictReason::IdempotencyKeyReused(
                        key.to_string(),
                    )));
                }
                if let Some(tx) = self.resume(key, reserved).await? {
                    return Ok(tx);
                }
            }
        }

        let (account, asset, ledger_ref) = self
            .purchasable(order.user_id, order.asset_id, order.quantity)
            .await?;
        let price = order.limit_price.unwrap_or(asset.tokenization.price_per_token);

        // Built before the transfer so an overflowing total is refused up front.
        let tx_ref = LedgerTxRef::generate(&ledger_ref.treasury_account_id);
        let transaction = Transaction::settled_buy(
            order.user_id,
            account,
            order.asset_id,
            order.quantity,
            price,
            tx_ref.clone(),
            order.idempotency_key.clone(),
        )?;
        let commit = TradeCommit::buy(transaction);

        if let Some(key) = order.idempotency_key.as_deref() {
            let stored = self.ctx.store.reserve_order(&commit).await?;
            if stored.transaction.id != commit.transaction.id {
                // Another process reserved the key between our read and write.
                return Err(RwaError::Conflict(ConflictReason::StaleRecord));
            }
            tracing::debug!(user_id = %order.user_id, tx_ref = %tx_ref, key, "order reserved");
        }
        self.settle(&ledger_ref, commit).await
    }

    /// Continue a reserved order from wherever its first attempt stopped.
    ///
    /// Returns `None` when the reserved transfer was refused by the ledger;
    /// the reservation is dropped and the caller places the order afresh.
    async fn resume(&self, key: &str, reserved: TradeCommit) -> Result<Option<Transaction>, RwaError> {
        let tx = &reserved.transaction;
        let tx_ref = tx.external_ledger_tx_ref.clone().ok_or_else(|| {
            RwaError::Store(format!("reserved order {} has no ledger reference", tx.id))
        })?;
        tracing::info!(user_id = %tx.user_id, tx_ref = %tx_ref, "resuming reserved order");

        match self.confirm(&tx_ref).await {
            Confirmation::Applied(_) => self.commit(reserved).await.map(Some),
            Confirmation::Failed(status) => {
                tracing::warn!(
                    tx_ref = %tx_ref,
                    code = status.result_code.as_deref().unwrap_or_default(),
                    "reserved transfer failed on ledger, releasing order"
                );
                self.ctx.store.release_order(tx.user_id, key).await?;
                Ok(None)
            }
            Confirmation::NotApplied => {
                // The identity or listing may have changed since the reservation.
                let (account, _, ledger_ref) =
                    self.purchasable(tx.user_id, tx.asset_id, tx.quantity).await?;
                if account != tx.account {
                    self.ctx.store.release_order(tx.user_id, key).await?;
                    return Ok(None);
                }
                self.settle(&ledger_ref, reserved).await.map(Some)
            }
            Confirmation::Undetermined(detail) => Err(RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::Unconfirmed,
                format!("reserved transfer {tx_ref} unresolved: {detail}"),
            ))),
        }
    }

    /// The buyer's verified wallet, the asset and its ledger reference, if
    /// `quantity` fractions can be bought right now.
    async fn purchasable(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        quantity: u64,
    ) -> Result<(LedgerAccountId, Asset, LedgerRef), RwaError> {
        let identity = self.ctx.load_identity(user_id).await?;
        let account = identity.verified_wallet()?.clone();
        let asset = self.ctx.load_asset(asset_id).await?;
        let ledger_ref = asset.check_purchasable(quantity)?.clone();
        Ok((account, asset, ledger_ref))
    }

    /// Transfer the commit's fractions and commit the trade. A reservation
    /// for the commit is released when the ledger definitively refuses.
    async fn settle(&self, ledger_ref: &LedgerRef, commit: TradeCommit) -> Result<Transaction, RwaError> {
        let tx = &commit.transaction;
        let tx_ref = tx.external_ledger_tx_ref.clone().ok_or_else(|| {
            RwaError::Validation(format!("buy {} has no ledger reference", tx.id))
        })?;
        if let Err(e) = self
            .transfer(ledger_ref, &tx.account, tx.quantity, &tx_ref, &commit)
            .await
        {
            let settled_unknown = matches!(
                &e,
                RwaError::Ledger(f)
                    if matches!(f.kind, LedgerFailureKind::Transient | LedgerFailureKind::Unconfirmed)
            );
            if let (false, Some(key)) = (settled_unknown, tx.idempotency_key.as_deref()) {
                if let Err(release) = self.ctx.store.release_order(tx.user_id, key).await {
                    tracing::warn!(tx_ref = %tx_ref, error = %release, "failed to release order reservation");
                }
            }
            return Err(e);
        }
        self.commit(commit).await
    }

    /// Record a sale of held fractions.
    pub async fn sell(&self, order: &SellOrder) -> Result<Transaction, RwaError> {
        if order.quantity == 0 {
            return Err(RwaError::Validation("quantity must be positive".into()));
        }
        if order.price_per_token.is_zero() {
            return Err(RwaError::Validation("price must be positive".into()));
        }

        let _guard = self.ctx.locks.acquire(order.asset_id).await;
        if let Some(tx) = self
            .replay(
                order.user_id,
                order.idempotency_key.as_deref(),
                order.asset_id,
                TradeSide::Sell,
                order.quantity,
            )
            .await?
        {
            return Ok(tx);
        }

        let identity = self.ctx.load_identity(order.user_id).await?;
        let account = identity.verified_wallet()?.clone();
        let asset = self.ctx.load_asset(order.asset_id).await?;
        if asset.verification_status != VerificationStatus::Approved {
            return Err(RwaError::Conflict(ConflictReason::NotApproved));
        }
        if asset.ledger_ref.is_none() {
            return Err(RwaError::Conflict(ConflictReason::NotTokenized));
        }

        let transaction = Transaction::recorded_sell(
            order.user_id,
            account,
            order.asset_id,
            order.quantity,
            order.price_per_token,
            order.idempotency_key.clone(),
        )?;
        self.commit(TradeCommit::sell(transaction)).await
    }

    /// Associate `token_id` with `account`, signed by the account holder.
    ///
    /// An account that is already associated is not an error.
    pub async fn associate_token(
        &self,
        account: &LedgerAccountId,
        token_id: &TokenId,
        signer: &SignerKey,
    ) -> Result<Association, RwaError> {
        if account == self.ctx.ledger.treasury_account() {
            return Err(RwaError::Validation(format!(
                "{account} is the treasury account and is associated with every token it issues"
            )));
        }
        let req = AssociateRequest {
            tx_ref: LedgerTxRef::generate(account),
            account_id: account.clone(),
            token_id: token_id.clone(),
        };

        let err = match self.ctx.ledger.associate_token(&req, signer).await {
            Ok(receipt) => {
                tracing::info!(account = %account, token_id = %token_id, tx_ref = %receipt.tx_ref, "token associated");
                return Ok(Association::Associated(receipt.tx_ref));
            }
            Err(e) if e.code() == Some(codes::TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT) => {
                return Ok(Association::AlreadyAssociated);
            }
            Err(e) if e.is_outcome_unknown() => e,
            Err(e) => return Err(e.into()),
        };

        tracing::warn!(account = %account, tx_ref = %req.tx_ref, error = %err, "association outcome unknown, querying status");
        match self.confirm(&req.tx_ref).await {
            Confirmation::Applied(tx) => Ok(Association::Associated(tx.tx_ref)),
            Confirmation::Failed(tx) => {
                let rejection = confirm::rejection_from_status(&tx);
                if rejection.code() == Some(codes::TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT) {
                    return Ok(Association::AlreadyAssociated);
                }
                Err(rejection.into())
            }
            // Association is safe to resubmit: a repeat reports already-associated.
            Confirmation::NotApplied => Err(RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::Transient,
                format!("association {} was not applied: {err}", req.tx_ref),
            ))),
            Confirmation::Undetermined(detail) => Err(RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::Unconfirmed,
                format!("association {} unresolved: {detail}", req.tx_ref),
            ))),
        }
    }

    /// Associate the token of `asset_id` with the wallet linked to `user_id`.
    pub async fn associate_for_user(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        signer: &SignerKey,
    ) -> Result<Association, RwaError> {
        let identity = self.ctx.load_identity(user_id).await?;
        let account = identity
            .wallet
            .ok_or(RwaError::Conflict(ConflictReason::WalletNotLinked))?;
        let asset = self.ctx.load_asset(asset_id).await?;
        let token_id = asset
            .token_id()
            .ok_or(RwaError::Conflict(ConflictReason::NotTokenized))?
            .clone();
        self.associate_token(&account, &token_id, signer).await
    }

    /// The committed transaction for `(user, key)`, if the key was used for
    /// this same order. A key reused for a different order is refused.
    async fn replay(
        &self,
        user_id: UserId,
        key: Option<&str>,
        asset_id: AssetId,
        side: TradeSide,
        quantity: u64,
    ) -> Result<Option<Transaction>, RwaError> {
        let Some(key) = key else {
            return Ok(None);
        };
        match self
            .ctx
            .store
            .find_transaction_by_idempotency_key(user_id, key)
            .await?
        {
            Some(tx) if tx.same_order(user_id, asset_id, side, quantity) => {
                tracing::debug!(user_id = %user_id, transaction_id = %tx.id, "idempotent replay");
                Ok(Some(tx))
            }
            Some(_) => Err(RwaError::Conflict(ConflictReason::IdempotencyKeyReused(
                key.to_string(),
            ))),
            None => Ok(None),
        }
    }

    async fn transfer(
        &self,
        ledger_ref: &LedgerRef,
        account: &LedgerAccountId,
        quantity: u64,
        tx_ref: &LedgerTxRef,
        commit: &TradeCommit,
    ) -> Result<(), RwaError> {
        let req = TransferRequest {
            tx_ref: tx_ref.clone(),
            token_id: ledger_ref.token_id.clone(),
            from_account: ledger_ref.treasury_account_id.clone(),
            to_account: account.clone(),
            amount: quantity,
        };

        let result = {
            let _permit = self.ctx.throttle.acquire().await?;
            self.ctx
                .ledger
                .transfer_tokens(&req, &self.ctx.treasury_key)
                .await
        };

        let err = match result {
            Ok(_) => return Ok(()),
            Err(e) if e.is_outcome_unknown() => e,
            Err(e) => {
                tracing::warn!(tx_ref = %tx_ref, token_id = %req.token_id, to = %account, error = %e, "transfer refused");
                return Err(e.into_transfer_failure(&req.token_id, &req.to_account));
            }
        };

        tracing::warn!(tx_ref = %tx_ref, error = %err, "transfer outcome unknown, querying status");
        match self.confirm(tx_ref).await {
            Confirmation::Applied(_) => Ok(()),
            Confirmation::Failed(tx) => Err(confirm::rejection_from_status(&tx)
                .into_transfer_failure(&req.token_id, &req.to_account)),
            Confirmation::NotApplied => Err(RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::Transient,
                format!("transfer {tx_ref} was not applied: {err}"),
            ))),
            Confirmation::Undetermined(detail) => {
                self.ctx
                    .queue_reconciliation(ReconciliationTask::new(
                        ReconciliationKind::ConfirmTransfer {
                            commit: commit.clone(),
                        },
                        tx_ref.clone(),
                        &detail,
                    ))
                    .await;
                Err(RwaError::Ledger(LedgerFailure::new(
                    LedgerFailureKind::Unconfirmed,
                    format!("transfer {tx_ref} unresolved: {detail}"),
                )))
            }
        }
    }

    async fn commit(&self, commit: TradeCommit) -> Result<Transaction, RwaError> {
        let outcome = self.ctx.store.commit_trade(&commit).await;
        let settled_ref = commit.transaction.external_ledger_tx_ref.clone();
        let failure = match outcome {
            Ok(CommitOutcome::Applied(tx)) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    user_id = %tx.user_id,
                    asset_id = %tx.asset_id,
                    side = tx.side.as_str(),
                    quantity = tx.quantity,
                    "trade committed"
                );
                self.ctx.notify(trade_completed(&tx));
                return Ok(tx);
            }
            Ok(CommitOutcome::AlreadyApplied(tx)) => return Ok(tx),
            Ok(CommitOutcome::Refused(reason)) => RwaError::Conflict(reason),
            Err(e) => e.into(),
        };

        // Without a ledger leg nothing happened; the caller may simply retry.
        let Some(tx_ref) = settled_ref else {
            return Err(failure);
        };
        let detail = failure.to_string();
        self.ctx
            .queue_reconciliation(ReconciliationTask::new(
                ReconciliationKind::CommitTrade { commit },
                tx_ref.clone(),
                &detail,
            ))
            .await;
        Err(RwaError::ReconciliationRequired {
            ledger_tx_ref: tx_ref,
            detail,
        })
    }

    async fn confirm(&self, tx_ref: &LedgerTxRef) -> Confirmation {
        confirm::await_confirmation(
            self.ctx.ledger.as_ref(),
            tx_ref,
            self.ctx.config.status_checks,
            self.ctx.config.status_poll_interval,
        )
        .await
    }
}

/// The notification for a committed trade.
pub(crate) fn trade_completed(tx: &Transaction) -> NotificationEvent {
    NotificationEvent::new(
        tx.user_id,
        NotificationKind::TradeCompleted {
            transaction_id: tx.id,
            asset_id: tx.asset_id,
            side: tx.side,
            quantity: tx.quantity,
            ledger_tx_ref: tx.external_ledger_tx_ref.clone(),
        },
    )
}
