//! In-memory [`SettlementStore`].
//!
//! All tables sit behind one `parking_lot::RwLock`. Every operation takes
//! the lock once and never holds it across an `.await`, so a multi-record
//! commit is atomic with respect to every other operation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use rwa_core::{AssetId, LedgerAccountId, LedgerTxRef, UserId};
use rwa_ledger::TokenIssuance;
use rwa_state::{Asset, Identity, LifecycleError, PortfolioEntry, Transaction};

use crate::store::{
    check_asset_invariants, classify_existing, reservation_key, CommitOutcome, IssuanceRecord,
    ReconciliationTask, SettlementStore, StoreError, TradeCommit,
};

#[derive(Debug, Default)]
struct Tables {
    identities: HashMap<UserId, Identity>,
    assets: HashMap<AssetId, Asset>,
    transactions: Vec<Transaction>,
    by_ledger_ref: HashMap<LedgerTxRef, usize>,
    by_idempotency_key: HashMap<(UserId, String), usize>,
    portfolios: HashMap<(UserId, AssetId), PortfolioEntry>,
    issuances: HashMap<AssetId, IssuanceRecord>,
    reservations: HashMap<(UserId, String), TradeCommit>,
    reconciliations: Vec<ReconciliationTask>,
}

impl Tables {
    fn existing_commit(&self, tx: &Transaction) -> Option<&Transaction> {
        let by_ref = tx
            .external_ledger_tx_ref
            .as_ref()
            .and_then(|r| self.by_ledger_ref.get(r));
        let by_key = tx
            .idempotency_key
            .as_ref()
            .and_then(|k| self.by_idempotency_key.get(&(tx.user_id, k.clone())));
        by_ref.or(by_key).map(|&i| &self.transactions[i])
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version<'a, T>(
    current: Option<&'a mut T>,
    version: impl Fn(&T) -> u64,
    kind: &'static str,
    id: String,
    expected: u64,
) -> Result<&'a mut T, StoreError> {
    let current = current.ok_or_else(|| StoreError::Missing {
        kind,
        id: id.clone(),
    })?;
    if version(current) != expected {
        return Err(StoreError::VersionConflict { kind, id, expected });
    }
    Ok(current)
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        if t.identities.contains_key(&identity.user_id) {
            return Err(StoreError::Duplicate {
                kind: "identity",
                id: identity.user_id.to_string(),
            });
        }
        t.identities.insert(identity.user_id, identity.clone());
        Ok(())
    }

    async fn get_identity(&self, user_id: UserId) -> Result<Option<Identity>, StoreError> {
        Ok(self.tables.read().identities.get(&user_id).cloned())
    }

    async fn update_identity(&self, identity: &Identity) -> Result<Identity, StoreError> {
        let mut t = self.tables.write();
        let stored = check_version(
            t.identities.get_mut(&identity.user_id),
            |i| i.version,
            "identity",
            identity.user_id.to_string(),
            identity.version,
        )?;
        *stored = identity.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        if t.assets.contains_key(&asset.id) {
            return Err(StoreError::Duplicate {
                kind: "asset",
                id: asset.id.to_string(),
            });
        }
        t.assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn get_asset(&self, asset_id: AssetId) -> Result<Option<Asset>, StoreError> {
        Ok(self.tables.read().assets.get(&asset_id).cloned())
    }

    async fn update_asset(&self, asset: &Asset) -> Result<Asset, StoreError> {
        let mut t = self.tables.write();
        let stored = check_version(
            t.assets.get_mut(&asset.id),
            |a| a.version,
            "asset",
            asset.id.to_string(),
            asset.version,
        )?;
        *stored = asset.clone();
        stored.version += 1;
        check_asset_invariants(stored);
        Ok(stored.clone())
    }

    async fn commit_trade(&self, commit: &TradeCommit) -> Result<CommitOutcome, StoreError> {
        let mut guard = self.tables.write();
        let t = &mut *guard;
        let tx = &commit.transaction;

        if let Some(existing) = t.existing_commit(tx) {
            return Ok(classify_existing(commit, existing.clone()));
        }

        let mut asset = t
            .assets
            .get(&tx.asset_id)
            .cloned()
            .ok_or_else(|| StoreError::Missing {
                kind: "asset",
                id: tx.asset_id.to_string(),
            })?;
        if commit.inventory_withdrawal > 0 {
            match asset.withdraw_available(commit.inventory_withdrawal) {
                Ok(()) => asset.version += 1,
                Err(LifecycleError::Precondition(reason)) => return Ok(CommitOutcome::Refused(reason)),
                Err(other) => {
                    return Err(StoreError::Corrupt {
                        kind: "asset",
                        detail: other.to_string(),
                    })
                }
            }
        }

        let key = (tx.user_id, tx.asset_id);
        let mut entry = t
            .portfolios
            .get(&key)
            .cloned()
            .unwrap_or_else(|| PortfolioEntry::open(tx.user_id, tx.asset_id));
        match entry.apply(tx.side, tx.quantity) {
            Ok(()) => {}
            Err(LifecycleError::Precondition(reason)) => return Ok(CommitOutcome::Refused(reason)),
            Err(other) => {
                return Err(StoreError::Corrupt {
                    kind: "portfolio",
                    detail: other.to_string(),
                })
            }
        }

        // Every check passed; write all three records.
        check_asset_invariants(&asset);
        t.assets.insert(asset.id, asset);
        t.portfolios.insert(key, entry);
        let index = t.transactions.len();
        t.transactions.push(tx.clone());
        if let Some(r) = &tx.external_ledger_tx_ref {
            t.by_ledger_ref.insert(r.clone(), index);
        }
        if let Some(k) = &tx.idempotency_key {
            t.by_idempotency_key.insert((tx.user_id, k.clone()), index);
            t.reservations.remove(&(tx.user_id, k.clone()));
        }
        Ok(CommitOutcome::Applied(tx.clone()))
    }

    async fn find_transaction_by_ledger_ref(
        &self,
        tx_ref: &LedgerTxRef,
    ) -> Result<Option<Transaction>, StoreError> {
        let t = self.tables.read();
        Ok(t.by_ledger_ref.get(tx_ref).map(|&i| t.transactions[i].clone()))
    }

    async fn find_transaction_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let t = self.tables.read();
        Ok(t
            .by_idempotency_key
            .get(&(user_id, key.to_string()))
            .map(|&i| t.transactions[i].clone()))
    }

    async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .tables
            .read()
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn transactions_for_account(
        &self,
        account: &LedgerAccountId,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .tables
            .read()
            .transactions
            .iter()
            .filter(|tx| &tx.account == account)
            .cloned()
            .collect())
    }

    async fn reserve_order(&self, commit: &TradeCommit) -> Result<TradeCommit, StoreError> {
        let (user_id, key) = reservation_key(commit)?;
        Ok(self
            .tables
            .write()
            .reservations
            .entry((user_id, key.to_string()))
            .or_insert_with(|| commit.clone())
            .clone())
    }

    async fn reserved_order(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<TradeCommit>, StoreError> {
        Ok(self
            .tables
            .read()
            .reservations
            .get(&(user_id, key.to_string()))
            .cloned())
    }

    async fn release_order(&self, user_id: UserId, key: &str) -> Result<(), StoreError> {
        self.tables
            .write()
            .reservations
            .remove(&(user_id, key.to_string()));
        Ok(())
    }

    async fn portfolio(&self, user_id: UserId) -> Result<Vec<PortfolioEntry>, StoreError> {
        let mut entries: Vec<PortfolioEntry> = self
            .tables
            .read()
            .portfolios
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.opened_at, e.asset_id));
        Ok(entries)
    }

    async fn replace_portfolio(
        &self,
        user_id: UserId,
        entries: &[PortfolioEntry],
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        t.portfolios.retain(|(user, _), _| *user != user_id);
        for entry in entries {
            t.portfolios
                .insert((entry.user_id, entry.asset_id), entry.clone());
        }
        Ok(())
    }

    async fn remove_empty_portfolio_entry(
        &self,
        user_id: UserId,
        asset_id: AssetId,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write();
        let key = (user_id, asset_id);
        match t.portfolios.get(&key) {
            Some(entry) if entry.quantity == 0 => {
                t.portfolios.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_issuance_keys(&self, record: &IssuanceRecord) -> Result<IssuanceRecord, StoreError> {
        let mut t = self.tables.write();
        Ok(t
            .issuances
            .entry(record.asset_id)
            .or_insert_with(|| record.clone())
            .clone())
    }

    async fn record_issuance(
        &self,
        asset_id: AssetId,
        issuance: &TokenIssuance,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let record = t.issuances.get_mut(&asset_id).ok_or_else(|| StoreError::Missing {
            kind: "issuance",
            id: asset_id.to_string(),
        })?;
        record.issuance = Some(issuance.clone());
        Ok(())
    }

    async fn get_issuance(&self, asset_id: AssetId) -> Result<Option<IssuanceRecord>, StoreError> {
        Ok(self.tables.read().issuances.get(&asset_id).cloned())
    }

    async fn enqueue_reconciliation(&self, task: &ReconciliationTask) -> Result<(), StoreError> {
        self.tables.write().reconciliations.push(task.clone());
        Ok(())
    }

    async fn pending_reconciliations(&self) -> Result<Vec<ReconciliationTask>, StoreError> {
        Ok(self.tables.read().reconciliations.clone())
    }

    async fn resolve_reconciliation(&self, id: Uuid) -> Result<(), StoreError> {
        self.tables.write().reconciliations.retain(|task| task.id != id);
        Ok(())
    }

    async fn record_reconciliation_attempt(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let task = t
            .reconciliations
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| StoreError::Missing {
                kind: "reconciliation task",
                id: id.to_string(),
            })?;
        task.attempts += 1;
        task.last_error = Some(error.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwa_core::{Amount, AssetCategory, ConflictReason};
    use rwa_state::{LedgerRef, TokenizationDraft, TokenizationOverrides, TradeSide};

    fn approved_asset() -> Asset {
        let mut asset = Asset::submit(
            UserId::new(),
            "Gold Bar Lot 7",
            "",
            AssetCategory::Commodity {
                commodity_type: "gold".into(),
                quantity: 10,
                unit: "kg".into(),
                storage_location: "Vault 3".into(),
            },
            &TokenizationDraft {
                total_supply: 1000,
                symbol: "GLD7".into(),
                price_per_token: Amount(500),
                reserved_tokens: 200,
            },
        )
        .unwrap();
        let t = asset.prepare_approval(&TokenizationOverrides::default()).unwrap();
        asset
            .approve(
                t,
                LedgerRef {
                    token_id: rwa_core::TokenId::new("0.0.5005").unwrap(),
                    treasury_account_id: LedgerAccountId::new("0.0.2").unwrap(),
                    issuance_tx_ref: LedgerTxRef::new("0.0.2@1700000000.000000001").unwrap(),
                },
            )
            .unwrap();
        asset
    }

    fn buy(asset: &Asset, user: UserId, quantity: u64, seq: u32) -> TradeCommit {
        TradeCommit::buy(
            Transaction::settled_buy(
                user,
                LedgerAccountId::new("0.0.7001").unwrap(),
                asset.id,
                quantity,
                Amount(500),
                LedgerTxRef::new(&format!("0.0.2@1700000000.00000000{seq}")).unwrap(),
                None,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_update_requires_current_version() {
        let store = MemoryStore::new();
        let identity = Identity::register(UserId::new());
        store.insert_identity(&identity).await.unwrap();

        let stored = store.update_identity(&identity).await.unwrap();
        assert_eq!(stored.version, 1);

        let err = store.update_identity(&identity).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 0, .. }));
    }

    #[tokio::test]
    async fn test_commit_decrements_inventory_and_opens_entry() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        let user = UserId::new();

        let outcome = store.commit_trade(&buy(&asset, user, 300, 2)).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Applied(_)));

        let stored = store.get_asset(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.tokenization.available_tokens, 500);
        assert_eq!(stored.version, asset.version + 1);
        let portfolio = store.portfolio(user).await.unwrap();
        assert_eq!(portfolio[0].quantity, 300);
    }

    #[tokio::test]
    async fn test_commit_refuses_oversell_and_writes_nothing() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        let user = UserId::new();

        let outcome = store.commit_trade(&buy(&asset, user, 801, 2)).await.unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Refused(ConflictReason::InsufficientAvailability {
                requested: 801,
                available: 800
            })
        );
        assert!(store.transactions_for_user(user).await.unwrap().is_empty());
        assert!(store.portfolio(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_commit_is_already_applied() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        let user = UserId::new();
        let commit = buy(&asset, user, 100, 2);

        store.commit_trade(&commit).await.unwrap();
        let replay = store.commit_trade(&commit).await.unwrap();
        assert!(matches!(replay, CommitOutcome::AlreadyApplied(_)));

        let stored = store.get_asset(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.tokenization.available_tokens, 700);
        assert_eq!(store.transactions_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_key_settled_by_another_transfer_is_refused() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        let user = UserId::new();
        let keyed = |seq| {
            let mut commit = buy(&asset, user, 10, seq);
            commit.transaction.idempotency_key = Some("order-9".into());
            commit
        };

        let first = store.commit_trade(&keyed(2)).await.unwrap();
        assert!(matches!(first, CommitOutcome::Applied(_)));
        let second = store.commit_trade(&keyed(3)).await.unwrap();
        assert_eq!(
            second,
            CommitOutcome::Refused(ConflictReason::IdempotencyKeyReused("order-9".into()))
        );
        assert_eq!(store.transactions_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reservation_is_kept_until_commit() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        let user = UserId::new();
        let mut commit = buy(&asset, user, 10, 2);
        commit.transaction.idempotency_key = Some("order-1".into());
        let mut rival = buy(&asset, user, 10, 3);
        rival.transaction.idempotency_key = Some("order-1".into());

        assert_eq!(store.reserve_order(&commit).await.unwrap(), commit);
        // A second reservation under the same key returns the first.
        assert_eq!(store.reserve_order(&rival).await.unwrap(), commit);

        store.commit_trade(&commit).await.unwrap();
        assert!(store.reserved_order(user, "order-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unkeyed_commit_cannot_be_reserved() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        let err = store
            .reserve_order(&buy(&asset, UserId::new(), 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Missing { kind: "idempotency key", .. }));
    }

    #[tokio::test]
    async fn test_commits_keep_asset_invariants() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        let user = UserId::new();

        for seq in 2..=5 {
            store.commit_trade(&buy(&asset, user, 200, seq)).await.unwrap();
        }
        let stored = store.get_asset(asset.id).await.unwrap().unwrap();
        assert_eq!(stored.tokenization.available_tokens, 0);
        stored.check_invariants().unwrap();
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "InvariantViolated")]
    async fn test_write_breaking_inventory_cap_panics_in_debug() {
        let store = MemoryStore::new();
        let mut asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        asset.tokenization.available_tokens = asset.tokenization.total_supply;
        let _ = store.update_asset(&asset).await;
    }

    #[tokio::test]
    async fn test_sell_without_holding_is_refused() {
        let store = MemoryStore::new();
        let asset = approved_asset();
        store.insert_asset(&asset).await.unwrap();
        let user = UserId::new();
        let sell = TradeCommit::sell(
            Transaction::recorded_sell(
                user,
                LedgerAccountId::new("0.0.7001").unwrap(),
                asset.id,
                5,
                Amount(500),
                None,
            )
            .unwrap(),
        );
        let outcome = store.commit_trade(&sell).await.unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Refused(ConflictReason::InsufficientHoldings {
                requested: 5,
                held: 0
            })
        );
        assert_eq!(sell.transaction.side, TradeSide::Sell);
    }

    #[tokio::test]
    async fn test_prune_only_removes_empty_entries() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let asset_id = AssetId::new();
        let mut entry = PortfolioEntry::open(user, asset_id);
        entry.apply(TradeSide::Buy, 3).unwrap();
        store.replace_portfolio(user, &[entry]).await.unwrap();

        assert!(!store.remove_empty_portfolio_entry(user, asset_id).await.unwrap());
        let mut emptied = store.portfolio(user).await.unwrap().remove(0);
        emptied.apply(TradeSide::Sell, 3).unwrap();
        store.replace_portfolio(user, &[emptied]).await.unwrap();
        assert!(store.remove_empty_portfolio_entry(user, asset_id).await.unwrap());
        assert!(store.portfolio(user).await.unwrap().is_empty());
    }
}
