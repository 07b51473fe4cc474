//! Shared fixtures for the settlement integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use rwa_core::{Amount, AssetCategory, AssetId, LedgerAccountId, LedgerTxRef, UserId};
use rwa_ledger::{InMemoryLedger, SignerKey, TokenIssuance};
use rwa_settlement::{
    ChannelDispatcher, CommitOutcome, EngineConfig, IssuanceRecord, MemoryStore,
    NotificationEvent, ReconciliationTask, RwaCore, SettlementStore, StoreError, TradeCommit,
};
use rwa_state::{Asset, Identity, PortfolioEntry, TokenizationDraft, TokenizationOverrides, Transaction};

/// A [`MemoryStore`] that fails selected writes on demand.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing_commits: AtomicU32,
    failing_asset_updates: AtomicU32,
}

impl FlakyStore {
    /// Fail the next `n` calls of `commit_trade`.
    pub fn fail_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` calls of `update_asset`.
    pub fn fail_asset_updates(&self, n: u32) {
        self.failing_asset_updates.store(n, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicU32) -> Result<(), StoreError> {
        if counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Backend("injected: connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for FlakyStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        self.inner.insert_identity(identity).await
    }

    async fn get_identity(&self, user_id: UserId) -> Result<Option<Identity>, StoreError> {
        self.inner.get_identity(user_id).await
    }

    async fn update_identity(&self, identity: &Identity) -> Result<Identity, StoreError> {
        self.inner.update_identity(identity).await
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        self.inner.insert_asset(asset).await
    }

    async fn get_asset(&self, asset_id: AssetId) -> Result<Option<Asset>, StoreError> {
        self.inner.get_asset(asset_id).await
    }

    async fn update_asset(&self, asset: &Asset) -> Result<Asset, StoreError> {
        Self::trip(&self.failing_asset_updates)?;
        self.inner.update_asset(asset).await
    }

    async fn commit_trade(&self, commit: &TradeCommit) -> Result<CommitOutcome, StoreError> {
        Self::trip(&self.failing_commits)?;
        self.inner.commit_trade(commit).await
    }

    async fn find_transaction_by_ledger_ref(
        &self,
        tx_ref: &LedgerTxRef,
    ) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_transaction_by_ledger_ref(tx_ref).await
    }

    async fn find_transaction_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        self.inner.find_transaction_by_idempotency_key(user_id, key).await
    }

    async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        self.inner.transactions_for_user(user_id).await
    }

    async fn transactions_for_account(
        &self,
        account: &LedgerAccountId,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.inner.transactions_for_account(account).await
    }

    async fn reserve_order(&self, commit: &TradeCommit) -> Result<TradeCommit, StoreError> {
        self.inner.reserve_order(commit).await
    }

    async fn reserved_order(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<TradeCommit>, StoreError> {
        self.inner.reserved_order(user_id, key).await
    }

    async fn release_order(&self, user_id: UserId, key: &str) -> Result<(), StoreError> {
        self.inner.release_order(user_id, key).await
    }

    async fn portfolio(&self, user_id: UserId) -> Result<Vec<PortfolioEntry>, StoreError> {
        self.inner.portfolio(user_id).await
    }

    async fn replace_portfolio(
        &self,
        user_id: UserId,
        entries: &[PortfolioEntry],
    ) -> Result<(), StoreError> {
        self.inner.replace_portfolio(user_id, entries).await
    }

    async fn remove_empty_portfolio_entry(
        &self,
        user_id: UserId,
        asset_id: AssetId,
    ) -> Result<bool, StoreError> {
        self.inner.remove_empty_portfolio_entry(user_id, asset_id).await
    }

    async fn save_issuance_keys(&self, record: &IssuanceRecord) -> Result<IssuanceRecord, StoreError> {
        self.inner.save_issuance_keys(record).await
    }

    async fn record_issuance(
        &self,
        asset_id: AssetId,
        issuance: &TokenIssuance,
    ) -> Result<(), StoreError> {
        self.inner.record_issuance(asset_id, issuance).await
    }

    async fn get_issuance(&self, asset_id: AssetId) -> Result<Option<IssuanceRecord>, StoreError> {
        self.inner.get_issuance(asset_id).await
    }

    async fn enqueue_reconciliation(&self, task: &ReconciliationTask) -> Result<(), StoreError> {
        self.inner.enqueue_reconciliation(task).await
    }

    async fn pending_reconciliations(&self) -> Result<Vec<ReconciliationTask>, StoreError> {
        self.inner.pending_reconciliations().await
    }

    async fn resolve_reconciliation(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.resolve_reconciliation(id).await
    }

    async fn record_reconciliation_attempt(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.inner.record_reconciliation_attempt(id, error).await
    }
}

/// A buyer with a verified identity and a ledger wallet.
pub struct Buyer {
    pub user_id: UserId,
    pub account: LedgerAccountId,
    pub key: SignerKey,
}

/// A core wired to an in-memory ledger and a [`FlakyStore`].
pub struct Harness {
    pub core: RwaCore,
    pub ledger: Arc<InMemoryLedger>,
    pub store: Arc<FlakyStore>,
    pub events: UnboundedReceiver<NotificationEvent>,
    /// The key the core signs treasury transfers with.
    pub treasury_key: SignerKey,
}

impl Harness {
    pub fn new() -> Self {
        let treasury_key = SignerKey::generate();
        let ledger = Arc::new(InMemoryLedger::new(&treasury_key));
        let store = Arc::new(FlakyStore::default());
        let (dispatcher, events) = ChannelDispatcher::new();
        let core = RwaCore::new(
            store.clone(),
            ledger.clone(),
            treasury_key.clone(),
            Arc::new(dispatcher),
            EngineConfig::for_tests(),
        );
        Self {
            core,
            ledger,
            store,
            events,
            treasury_key,
        }
    }

    /// Register a user and open a ledger wallet for them, without KYC.
    pub async fn registered_user(&self) -> Buyer {
        let user_id = UserId::new();
        self.core
            .verification()
            .register_identity(user_id)
            .await
            .unwrap();
        let key = SignerKey::generate();
        let account = self.ledger.create_account(&key.public_key());
        Buyer {
            user_id,
            account,
            key,
        }
    }

    /// A KYC-approved user with a linked wallet.
    pub async fn verified_buyer(&self) -> Buyer {
        let buyer = self.registered_user().await;
        let verification = self.core.verification();
        verification.submit_kyc(buyer.user_id).await.unwrap();
        verification.approve_identity(buyer.user_id).await.unwrap();
        verification
            .link_wallet(buyer.user_id, buyer.account.clone())
            .await
            .unwrap();
        buyer
    }

    /// A pending asset submitted by a fresh owner.
    pub async fn pending_asset(&self, total_supply: u64, reserved: u64, price: u64) -> Asset {
        let owner = UserId::new();
        self.core
            .verification()
            .register_identity(owner)
            .await
            .unwrap();
        self.core
            .verification()
            .submit_asset(
                owner,
                "Harbour View Apartments",
                "Twelve-unit residential block",
                real_estate(),
                &TokenizationDraft {
                    total_supply,
                    symbol: "HVA".into(),
                    price_per_token: Amount::from_minor(price),
                    reserved_tokens: reserved,
                },
            )
            .await
            .unwrap()
    }

    /// An approved, listed asset.
    pub async fn approved_asset(&self, total_supply: u64, reserved: u64, price: u64) -> Asset {
        let asset = self.pending_asset(total_supply, reserved, price).await;
        self.core
            .verification()
            .approve_asset(asset.id, &TokenizationOverrides::default())
            .await
            .unwrap()
    }

    /// Associate the asset's token with the buyer's wallet.
    pub async fn associate(&self, buyer: &Buyer, asset: &Asset) {
        self.core
            .settlement()
            .associate_for_user(buyer.user_id, asset.id, &buyer.key)
            .await
            .unwrap();
    }

    /// A verified, associated buyer for `asset`.
    pub async fn ready_buyer(&self, asset: &Asset) -> Buyer {
        let buyer = self.verified_buyer().await;
        self.associate(&buyer, asset).await;
        buyer
    }

    pub async fn asset(&self, asset_id: AssetId) -> Asset {
        self.core.verification().asset(asset_id).await.unwrap()
    }

    /// Drain notifications delivered so far.
    pub fn drain_events(&mut self) -> Vec<NotificationEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn real_estate() -> AssetCategory {
    AssetCategory::RealEstate {
        address: "14 Quay Street".into(),
        area_sq_m: 1_450,
        property_type: "residential".into(),
    }
}
