//! # Persistence Port
//!
//! The settlement core persists through [`SettlementStore`]. Two backends
//! implement it: [`MemoryStore`](crate::memory::MemoryStore) and, behind the
//! `postgres` feature, `PgStore`.
//!
//! ## Consistency Contract
//!
//! - `Identity` and `Asset` updates are conditional on the record's
//!   `version`. A mismatch is [`StoreError::VersionConflict`] and nothing is
//!   written.
//! - [`SettlementStore::commit_trade`] is the only writer of
//!   `available_tokens` after approval. It decrements inventory, upserts the
//!   portfolio entry and appends the transaction atomically, and the
//!   decrement is conditional on `available_tokens >= quantity` at write time.
//! - A commit is keyed by its ledger transaction reference and by
//!   `(user, idempotency_key)`: replaying an applied commit returns
//!   [`CommitOutcome::AlreadyApplied`] and writes nothing. A commit whose key
//!   is already recorded under a *different* ledger reference is refused
//!   with `IdempotencyKeyReused`; two transfers settled for one key is a
//!   divergence, not a replay.
//! - A keyed buy reserves `(user, idempotency_key)` with its commit before
//!   the transfer is submitted. A retry finds the reservation and resumes
//!   with the same ledger reference, so one key never moves tokens twice.
//!   Applying the commit deletes the reservation in the same write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rwa_core::{
    AssetId, ConflictReason, LedgerAccountId, LedgerTxRef, RwaError, Timestamp, UserId,
};
use rwa_ledger::{SignerKey, TokenIssuance};
use rwa_state::{Asset, Identity, PortfolioEntry, Tokenization, Transaction};

/// Errors raised by store backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A record with the same key already exists.
    #[error("{kind} {id} already exists")]
    Duplicate {
        /// Record kind.
        kind: &'static str,
        /// Record key.
        id: String,
    },

    /// The record to update does not exist.
    #[error("{kind} {id} not found")]
    Missing {
        /// Record kind.
        kind: &'static str,
        /// Record key.
        id: String,
    },

    /// The stored version differs from the version the caller read.
    #[error("{kind} {id} was modified concurrently (expected version {expected})")]
    VersionConflict {
        /// Record kind.
        kind: &'static str,
        /// Record key.
        id: String,
        /// Version the caller read.
        expected: u64,
    },

    /// A stored record could not be decoded.
    #[error("corrupt {kind} record: {detail}")]
    Corrupt {
        /// Record kind.
        kind: &'static str,
        /// Decoder detail.
        detail: String,
    },

    /// The backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for RwaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing { kind, id } => RwaError::NotFound { kind, id },
            StoreError::VersionConflict { .. } => RwaError::Conflict(ConflictReason::StaleRecord),
            StoreError::Duplicate { .. } => RwaError::Validation(err.to_string()),
            StoreError::Corrupt { .. } | StoreError::Backend(_) => RwaError::Store(err.to_string()),
        }
    }
}

/// Everything written for one settled trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCommit {
    /// The immutable transaction record.
    pub transaction: Transaction,
    /// Fractions withdrawn from the asset's available inventory.
    pub inventory_withdrawal: u64,
}

impl TradeCommit {
    /// Commit for a buy settled on the ledger.
    pub fn buy(transaction: Transaction) -> Self {
        let quantity = transaction.quantity;
        Self {
            transaction,
            inventory_withdrawal: quantity,
        }
    }

    /// Commit for a sell recorded off-ledger. Inventory is untouched.
    pub fn sell(transaction: Transaction) -> Self {
        Self {
            transaction,
            inventory_withdrawal: 0,
        }
    }
}

/// Result of [`SettlementStore::commit_trade`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The commit was written.
    Applied(Transaction),
    /// A commit with the same ledger reference exists, or, for a trade
    /// without a ledger leg, one with the same idempotency key.
    AlreadyApplied(Transaction),
    /// A guarded condition failed at write time. Nothing was written.
    Refused(ConflictReason),
}

/// The outcome of a commit whose ledger reference or idempotency key
/// matches an already recorded transaction.
pub(crate) fn classify_existing(commit: &TradeCommit, existing: Transaction) -> CommitOutcome {
    let tx = &commit.transaction;
    if tx.external_ledger_tx_ref.is_some() && existing.external_ledger_tx_ref != tx.external_ledger_tx_ref {
        return CommitOutcome::Refused(ConflictReason::IdempotencyKeyReused(
            tx.idempotency_key.clone().unwrap_or_default(),
        ));
    }
    CommitOutcome::AlreadyApplied(existing)
}

/// Log, and in debug builds panic on, an asset that breaks its record-level
/// invariants after a write.
pub(crate) fn check_asset_invariants(asset: &Asset) {
    let checked = asset.check_invariants();
    if let Err(e) = &checked {
        tracing::error!(asset_id = %asset.id, error = %e, "asset invariant violated");
    }
    debug_assert!(checked.is_ok(), "{checked:?}");
}

/// The `(user, idempotency_key)` a commit is reserved under.
pub(crate) fn reservation_key(commit: &TradeCommit) -> Result<(UserId, &str), StoreError> {
    let tx = &commit.transaction;
    tx.idempotency_key
        .as_deref()
        .map(|key| (tx.user_id, key))
        .ok_or_else(|| StoreError::Missing {
            kind: "idempotency key",
            id: tx.id.to_string(),
        })
}

/// Per-asset issuance state, written before the mint is submitted.
///
/// The mint transaction reference and the key pair are fixed on the first
/// attempt so that a retry after an unknown outcome queries the same
/// reference instead of minting a second token.
#[derive(Debug, Clone)]
pub struct IssuanceRecord {
    /// Asset being tokenized.
    pub asset_id: AssetId,
    /// Reference of the mint transaction.
    pub mint_tx_ref: LedgerTxRef,
    /// Tokenization parameters the mint was submitted with.
    pub tokenization: Tokenization,
    /// Admin key installed on the token.
    pub admin_key: SignerKey,
    /// Supply key installed on the token.
    pub supply_key: SignerKey,
    /// Confirmed issuance, once the mint is known to have succeeded.
    pub issuance: Option<TokenIssuance>,
    /// When the record was created.
    pub created_at: Timestamp,
}

/// What a reconciliation task re-drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationKind {
    /// A transfer settled on the ledger but the local commit failed.
    CommitTrade {
        /// The commit to re-apply.
        commit: TradeCommit,
    },
    /// A transfer whose ledger outcome could not be established.
    ConfirmTransfer {
        /// The commit to apply if the ledger confirms the transfer.
        commit: TradeCommit,
    },
    /// A token was minted but the asset approval was not written.
    ApproveAsset {
        /// The asset awaiting approval.
        asset_id: AssetId,
    },
}

/// A persisted reconciliation work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationTask {
    /// Task identifier.
    pub id: Uuid,
    /// What to re-drive.
    pub kind: ReconciliationKind,
    /// The ledger transaction that already took effect, or may have.
    pub ledger_tx_ref: LedgerTxRef,
    /// Re-drive attempts so far.
    pub attempts: u32,
    /// Error from the most recent failure.
    pub last_error: Option<String>,
    /// When the task was queued.
    pub created_at: Timestamp,
}

impl ReconciliationTask {
    /// A new task, recording the failure that produced it.
    pub fn new(kind: ReconciliationKind, ledger_tx_ref: LedgerTxRef, detail: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            ledger_tx_ref,
            attempts: 0,
            last_error: Some(detail.to_string()),
            created_at: Timestamp::now(),
        }
    }
}

/// Persistence operations used by the settlement core.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    // -- identities ---------------------------------------------------------

    /// Insert a new identity.
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Load an identity.
    async fn get_identity(&self, user_id: UserId) -> Result<Option<Identity>, StoreError>;

    /// Write `identity` if the stored version equals `identity.version`.
    /// Returns the stored record with its version incremented.
    async fn update_identity(&self, identity: &Identity) -> Result<Identity, StoreError>;

    // -- assets -------------------------------------------------------------

    /// Insert a newly submitted asset.
    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError>;

    /// Load an asset.
    async fn get_asset(&self, asset_id: AssetId) -> Result<Option<Asset>, StoreError>;

    /// Write `asset` if the stored version equals `asset.version`.
    /// Returns the stored record with its version incremented.
    async fn update_asset(&self, asset: &Asset) -> Result<Asset, StoreError>;

    // -- trades -------------------------------------------------------------

    /// Atomically apply a settled trade and drop its order reservation. See
    /// the module documentation.
    async fn commit_trade(&self, commit: &TradeCommit) -> Result<CommitOutcome, StoreError>;

    /// The transaction recorded for a ledger reference.
    async fn find_transaction_by_ledger_ref(
        &self,
        tx_ref: &LedgerTxRef,
    ) -> Result<Option<Transaction>, StoreError>;

    /// The transaction recorded for a user's idempotency key.
    async fn find_transaction_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// A user's transactions, oldest first.
    async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError>;

    /// Transactions settled to or from a ledger account, oldest first.
    async fn transactions_for_account(
        &self,
        account: &LedgerAccountId,
    ) -> Result<Vec<Transaction>, StoreError>;

    // -- order reservations -------------------------------------------------

    /// Reserve the commit's `(user, idempotency_key)` before its transfer is
    /// submitted, unless a reservation exists. Returns the stored commit.
    async fn reserve_order(&self, commit: &TradeCommit) -> Result<TradeCommit, StoreError>;

    /// The commit reserved under a user's idempotency key.
    async fn reserved_order(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<TradeCommit>, StoreError>;

    /// Drop a reservation whose transfer definitively did not settle.
    async fn release_order(&self, user_id: UserId, key: &str) -> Result<(), StoreError>;

    // -- portfolios ---------------------------------------------------------

    /// A user's portfolio entries.
    async fn portfolio(&self, user_id: UserId) -> Result<Vec<PortfolioEntry>, StoreError>;

    /// Replace a user's portfolio entries.
    async fn replace_portfolio(
        &self,
        user_id: UserId,
        entries: &[PortfolioEntry],
    ) -> Result<(), StoreError>;

    /// Delete the entry for `(user, asset)` if its quantity is zero.
    /// Returns whether an entry was deleted.
    async fn remove_empty_portfolio_entry(
        &self,
        user_id: UserId,
        asset_id: AssetId,
    ) -> Result<bool, StoreError>;

    // -- issuance -----------------------------------------------------------

    /// Persist the issuance keys and mint reference for an asset, unless a
    /// record already exists. Returns the stored record.
    async fn save_issuance_keys(&self, record: &IssuanceRecord) -> Result<IssuanceRecord, StoreError>;

    /// Record a confirmed issuance on an existing record.
    async fn record_issuance(
        &self,
        asset_id: AssetId,
        issuance: &TokenIssuance,
    ) -> Result<(), StoreError>;

    /// The issuance record for an asset.
    async fn get_issuance(&self, asset_id: AssetId) -> Result<Option<IssuanceRecord>, StoreError>;

    // -- reconciliation -----------------------------------------------------

    /// Queue a reconciliation task.
    async fn enqueue_reconciliation(&self, task: &ReconciliationTask) -> Result<(), StoreError>;

    /// Unresolved tasks, oldest first.
    async fn pending_reconciliations(&self) -> Result<Vec<ReconciliationTask>, StoreError>;

    /// Mark a task resolved.
    async fn resolve_reconciliation(&self, id: Uuid) -> Result<(), StoreError>;

    /// Record a failed re-drive attempt.
    async fn record_reconciliation_attempt(&self, id: Uuid, error: &str) -> Result<(), StoreError>;
}
