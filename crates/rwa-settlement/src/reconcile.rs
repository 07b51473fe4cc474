//! # Reconciliation
//!
//! Re-drives ledger effects that were not reflected locally, and audits an
//! account's ledger history against local transaction records.
//!
//! Every task kind is safe to run repeatedly: trade commits are keyed by
//! their ledger reference, and approvals reuse the stored issuance record.
//! A task stays queued, with its attempt count and last error updated,
//! until it resolves.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use rwa_core::{AssetId, ConflictReason, LedgerAccountId, LedgerTxRef, RwaError};
use rwa_ledger::LedgerTransaction;
use rwa_state::{Transaction, VerificationStatus};

use crate::confirm::{self, Confirmation};
use crate::context::Context;
use crate::settlement::trade_completed;
use crate::store::{CommitOutcome, ReconciliationKind, ReconciliationTask, TradeCommit};
use crate::verification::VerificationService;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Tasks examined.
    pub examined: usize,
    /// Tasks completed and removed from the queue.
    pub resolved: usize,
    /// Tasks left queued after a failed attempt.
    pub still_pending: usize,
}

/// Differences between an account's ledger history and local records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAudit {
    /// Account audited.
    pub account: LedgerAccountId,
    /// Settled inbound transfers with no local transaction.
    pub unrecorded_transfers: Vec<LedgerTransaction>,
    /// Local buys whose transfer the ledger does not show as settled.
    pub unsettled_transactions: Vec<Transaction>,
}

impl AccountAudit {
    /// Whether ledger and local records agree.
    pub fn is_consistent(&self) -> bool {
        self.unrecorded_transfers.is_empty() && self.unsettled_transactions.is_empty()
    }
}

enum Step {
    Resolved,
    Retry(String),
}

/// Works the reconciliation queue.
#[derive(Clone)]
pub struct Reconciler {
    ctx: Arc<Context>,
    verification: VerificationService,
}

impl Reconciler {
    pub(crate) fn new(ctx: Arc<Context>, verification: VerificationService) -> Self {
        Self { ctx, verification }
    }

    /// Tasks currently queued.
    pub async fn pending(&self) -> Result<Vec<ReconciliationTask>, RwaError> {
        Ok(self.ctx.store.pending_reconciliations().await?)
    }

    /// Attempt every queued task once.
    pub async fn run_once(&self) -> Result<ReconciliationReport, RwaError> {
        let tasks = self.ctx.store.pending_reconciliations().await?;
        let mut report = ReconciliationReport {
            examined: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            match self.attempt(&task).await {
                Step::Resolved => {
                    self.ctx.store.resolve_reconciliation(task.id).await?;
                    report.resolved += 1;
                    tracing::info!(task_id = %task.id, tx_ref = %task.ledger_tx_ref, attempts = task.attempts + 1, "reconciliation resolved");
                }
                Step::Retry(error) => {
                    self.ctx
                        .store
                        .record_reconciliation_attempt(task.id, &error)
                        .await?;
                    report.still_pending += 1;
                    tracing::error!(task_id = %task.id, tx_ref = %task.ledger_tx_ref, attempts = task.attempts + 1, error = %error, "reconciliation attempt failed");
                }
            }
        }
        Ok(report)
    }

    async fn attempt(&self, task: &ReconciliationTask) -> Step {
        match &task.kind {
            ReconciliationKind::CommitTrade { commit } => self.commit(commit).await,
            ReconciliationKind::ConfirmTransfer { commit } => {
                self.confirm_transfer(&task.ledger_tx_ref, commit).await
            }
            ReconciliationKind::ApproveAsset { asset_id } => self.approve(*asset_id).await,
        }
    }

    async fn commit(&self, commit: &TradeCommit) -> Step {
        let _guard = self.ctx.locks.acquire(commit.transaction.asset_id).await;
        match self.ctx.store.commit_trade(commit).await {
            Ok(CommitOutcome::Applied(tx)) => {
                self.ctx.notify(trade_completed(&tx));
                Step::Resolved
            }
            Ok(CommitOutcome::AlreadyApplied(_)) => Step::Resolved,
            Ok(CommitOutcome::Refused(reason @ ConflictReason::IdempotencyKeyReused(_))) => {
                // Another transfer already settled under this key.
                tracing::error!(
                    tx_ref = ?commit.transaction.external_ledger_tx_ref,
                    user_id = %commit.transaction.user_id,
                    "second settled transfer for one idempotency key"
                );
                Step::Retry(reason.to_string())
            }
            Ok(CommitOutcome::Refused(reason)) => Step::Retry(reason.to_string()),
            Err(e) => Step::Retry(e.to_string()),
        }
    }

    async fn confirm_transfer(&self, tx_ref: &LedgerTxRef, commit: &TradeCommit) -> Step {
        match confirm::await_confirmation(
            self.ctx.ledger.as_ref(),
            tx_ref,
            self.ctx.config.status_checks,
            self.ctx.config.status_poll_interval,
        )
        .await
        {
            Confirmation::Applied(_) => self.commit(commit).await,
            Confirmation::Failed(tx) => {
                tracing::info!(tx_ref = %tx_ref, code = tx.result_code.as_deref().unwrap_or_default(), "transfer failed on ledger, nothing to commit");
                Step::Resolved
            }
            Confirmation::NotApplied => {
                tracing::info!(tx_ref = %tx_ref, "transfer never reached the ledger, nothing to commit");
                Step::Resolved
            }
            Confirmation::Undetermined(detail) => Step::Retry(detail),
        }
    }

    async fn approve(&self, asset_id: AssetId) -> Step {
        match self.ctx.load_asset(asset_id).await {
            Ok(asset)
                if asset.verification_status == VerificationStatus::Approved
                    && asset.ledger_ref.is_some() =>
            {
                return Step::Resolved;
            }
            Ok(asset) if asset.verification_status == VerificationStatus::Rejected => {
                tracing::error!(asset_id = %asset_id, "asset rejected after its token was minted; token left unlisted");
                return Step::Resolved;
            }
            Ok(_) => {}
            Err(e) => return Step::Retry(e.to_string()),
        }
        match self.verification.redrive_approval(asset_id).await {
            Ok(_) => Step::Resolved,
            Err(e) => Step::Retry(e.to_string()),
        }
    }

    /// Compare the ledger history of `account` with local transactions.
    ///
    /// Read-only; discrepancies are reported, not repaired.
    pub async fn audit_account(&self, account: &LedgerAccountId) -> Result<AccountAudit, RwaError> {
        let ledger_history = self.ctx.ledger.get_transaction_history(account).await?;
        let local = self.ctx.store.transactions_for_account(account).await?;

        let recorded: HashSet<&LedgerTxRef> = local
            .iter()
            .filter_map(|tx| tx.external_ledger_tx_ref.as_ref())
            .collect();
        let settled: HashSet<&LedgerTxRef> = ledger_history
            .iter()
            .filter(|tx| tx.is_settled_transfer())
            .map(|tx| &tx.tx_ref)
            .collect();

        let unrecorded_transfers: Vec<LedgerTransaction> = ledger_history
            .iter()
            .filter(|tx| tx.is_settled_transfer() && tx.to_account.as_ref() == Some(account))
            .filter(|tx| !recorded.contains(&tx.tx_ref))
            .cloned()
            .collect();
        let unsettled_transactions: Vec<Transaction> = local
            .iter()
            .filter(|tx| {
                tx.external_ledger_tx_ref
                    .as_ref()
                    .is_some_and(|r| !settled.contains(r))
            })
            .cloned()
            .collect();

        let audit = AccountAudit {
            account: account.clone(),
            unrecorded_transfers,
            unsettled_transactions,
        };
        if audit.is_consistent() {
            tracing::info!(account = %account, ledger = ledger_history.len(), local = local.len(), "account consistent");
        } else {
            tracing::warn!(
                account = %account,
                unrecorded = audit.unrecorded_transfers.len(),
                unsettled = audit.unsettled_transactions.len(),
                "account diverges from ledger"
            );
        }
        Ok(audit)
    }
}
