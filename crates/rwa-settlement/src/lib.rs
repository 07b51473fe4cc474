//! # rwa-settlement — Tokenization and Settlement Core
//!
//! Services over the lifecycle records of `rwa-state`, the ledger port of
//! `rwa-ledger` and a [`SettlementStore`]:
//!
//! - [`VerificationService`]: KYC review, wallet links, asset review.
//! - [`TokenizationCoordinator`]: one ledger token per approved asset.
//! - [`SettlementEngine`]: buys settled on the ledger, sells recorded
//!   off-ledger.
//! - [`PortfolioLedger`]: holdings, rebuild and pruning.
//! - [`Reconciler`]: re-drives ledger effects whose local write failed.
//!
//! ## Wiring
//!
//! [`RwaCore::new`] takes every collaborator explicitly: store, ledger
//! client, treasury signing key, notification dispatcher and
//! [`EngineConfig`]. There are no process-wide singletons.
//!
//! ```ignore
//! let ledger = Arc::new(HttpLedgerClient::new(LedgerConfig::from_env()?)?);
//! let core = RwaCore::new(store, ledger, treasury_key, Arc::new(LogDispatcher), EngineConfig::from_env()?);
//! let tx = core.settlement().buy(&BuyOrder::market(user, asset, 10)).await?;
//! ```

pub mod config;
mod confirm;
mod context;
pub mod locks;
pub mod memory;
pub mod notify;
pub mod portfolio;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod reconcile;
pub mod settlement;
pub mod store;
pub mod tokenization;
pub mod verification;

use std::sync::Arc;

use rwa_ledger::{LedgerClient, SignerKey};

pub use config::EngineConfig;
pub use memory::MemoryStore;
pub use notify::{
    ChannelDispatcher, DispatchError, LogDispatcher, NotificationDispatcher, NotificationEvent,
    NotificationKind,
};
pub use portfolio::{Holding, PortfolioLedger};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use reconcile::{AccountAudit, ReconciliationReport, Reconciler};
pub use settlement::{Association, BuyOrder, SellOrder, SettlementEngine};
pub use store::{
    CommitOutcome, IssuanceRecord, ReconciliationKind, ReconciliationTask, SettlementStore,
    StoreError, TradeCommit,
};
pub use tokenization::{IssuedToken, TokenizationCoordinator};
pub use verification::VerificationService;

use context::Context;
use locks::{AssetLocks, TreasuryThrottle};

/// The assembled core. Cheap to clone; all services share one context.
#[derive(Clone)]
pub struct RwaCore {
    verification: VerificationService,
    tokenization: TokenizationCoordinator,
    settlement: SettlementEngine,
    portfolio: PortfolioLedger,
    reconciler: Reconciler,
}

impl RwaCore {
    /// Assemble the core.
    ///
    /// `treasury_key` signs transfers out of `ledger.treasury_account()`.
    pub fn new(
        store: Arc<dyn SettlementStore>,
        ledger: Arc<dyn LedgerClient>,
        treasury_key: SignerKey,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: EngineConfig,
    ) -> Self {
        tracing::info!(
            treasury = %ledger.treasury_account(),
            treasury_concurrency = config.treasury_concurrency,
            status_checks = config.status_checks,
            "settlement core assembled"
        );
        let ctx = Arc::new(Context {
            store,
            ledger,
            treasury_key,
            dispatcher,
            locks: AssetLocks::new(),
            throttle: TreasuryThrottle::new(config.treasury_concurrency),
            config,
        });
        let tokenization = TokenizationCoordinator::new(Arc::clone(&ctx));
        let verification = VerificationService::new(Arc::clone(&ctx), tokenization.clone());
        Self {
            reconciler: Reconciler::new(Arc::clone(&ctx), verification.clone()),
            settlement: SettlementEngine::new(Arc::clone(&ctx)),
            portfolio: PortfolioLedger::new(ctx),
            verification,
            tokenization,
        }
    }

    /// KYC and asset review.
    pub fn verification(&self) -> &VerificationService {
        &self.verification
    }

    /// Token issuance.
    pub fn tokenization(&self) -> &TokenizationCoordinator {
        &self.tokenization
    }

    /// Trades.
    pub fn settlement(&self) -> &SettlementEngine {
        &self.settlement
    }

    /// Holdings.
    pub fn portfolio(&self) -> &PortfolioLedger {
        &self.portfolio
    }

    /// Reconciliation queue and audits.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}
