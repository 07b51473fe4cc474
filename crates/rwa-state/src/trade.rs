//! # Trade Records
//!
//! `Transaction` is written once per settled trade and never mutated.
//! `PortfolioEntry` is the per-(holder, asset) aggregate derived from the
//! transaction stream. It stores the held quantity only. Ownership share is
//! computed at read time against the asset's current total supply.

use serde::{Deserialize, Serialize};

use rwa_core::{
    Amount, AssetId, ConflictReason, LedgerAccountId, LedgerTxRef, Timestamp, TransactionId,
    UserId,
};

use crate::error::LifecycleError;

/// Direction of a trade from the holder's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    /// Fractions acquired from the treasury.
    Buy,
    /// Fractions disposed of.
    Sell,
}

impl TradeSide {
    /// Lowercase wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Parse a storage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Settlement status of a recorded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Settled on the external ledger and recorded locally.
    Completed,
    /// Recorded locally with no external ledger leg.
    RecordedOffLedger,
}

impl TransactionStatus {
    /// Lowercase wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::RecordedOffLedger => "recorded_off_ledger",
        }
    }

    /// Parse a storage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "recorded_off_ledger" => Some(Self::RecordedOffLedger),
            _ => None,
        }
    }
}

/// An immutable settled-trade record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Record identifier.
    pub id: TransactionId,
    /// Trading user.
    pub user_id: UserId,
    /// The user's ledger wallet at settlement time.
    pub account: LedgerAccountId,
    /// Traded asset.
    pub asset_id: AssetId,
    /// Buy or sell.
    pub side: TradeSide,
    /// Whole fractions traded.
    pub quantity: u64,
    /// Execution price per fraction.
    pub price_per_token: Amount,
    /// `price_per_token × quantity`.
    pub total_amount: Amount,
    /// Settlement status.
    pub status: TransactionStatus,
    /// Reference of the ledger transfer, when there was one.
    pub external_ledger_tx_ref: Option<LedgerTxRef>,
    /// Client-supplied key identifying the originating order.
    pub idempotency_key: Option<String>,
    /// When the trade was recorded.
    pub created_at: Timestamp,
}

impl Transaction {
    /// A purchase settled by the ledger transfer `tx_ref`.
    pub fn settled_buy(
        user_id: UserId,
        account: LedgerAccountId,
        asset_id: AssetId,
        quantity: u64,
        price_per_token: Amount,
        tx_ref: LedgerTxRef,
        idempotency_key: Option<String>,
    ) -> Result<Self, LifecycleError> {
        Ok(Self {
            id: TransactionId::new(),
            user_id,
            account,
            asset_id,
            side: TradeSide::Buy,
            quantity,
            price_per_token,
            total_amount: total(price_per_token, quantity)?,
            status: TransactionStatus::Completed,
            external_ledger_tx_ref: Some(tx_ref),
            idempotency_key,
            created_at: Timestamp::now(),
        })
    }

    /// A sale recorded without a ledger leg.
    pub fn recorded_sell(
        user_id: UserId,
        account: LedgerAccountId,
        asset_id: AssetId,
        quantity: u64,
        price_per_token: Amount,
        idempotency_key: Option<String>,
    ) -> Result<Self, LifecycleError> {
        Ok(Self {
            id: TransactionId::new(),
            user_id,
            account,
            asset_id,
            side: TradeSide::Sell,
            quantity,
            price_per_token,
            total_amount: total(price_per_token, quantity)?,
            status: TransactionStatus::RecordedOffLedger,
            external_ledger_tx_ref: None,
            idempotency_key,
            created_at: Timestamp::now(),
        })
    }

    /// Whether this record was produced by an order with these parameters.
    pub fn same_order(&self, user_id: UserId, asset_id: AssetId, side: TradeSide, quantity: u64) -> bool {
        self.user_id == user_id
            && self.asset_id == asset_id
            && self.side == side
            && self.quantity == quantity
    }
}

fn total(price: Amount, quantity: u64) -> Result<Amount, LifecycleError> {
    price.checked_times(quantity).ok_or_else(|| {
        LifecycleError::Invalid(format!("total of {quantity} × {price} overflows"))
    })
}

/// A holder's aggregate position in one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    /// Holder.
    pub user_id: UserId,
    /// Held asset.
    pub asset_id: AssetId,
    /// Whole fractions held. May be zero; zeroed entries are kept until pruned.
    pub quantity: u64,
    /// When the first trade for this pair was recorded.
    pub opened_at: Timestamp,
    /// When the last trade for this pair was recorded.
    pub updated_at: Timestamp,
}

impl PortfolioEntry {
    /// An empty position, created lazily on the first trade.
    pub fn open(user_id: UserId, asset_id: AssetId) -> Self {
        let now = Timestamp::now();
        Self {
            user_id,
            asset_id,
            quantity: 0,
            opened_at: now,
            updated_at: now,
        }
    }

    /// Apply a trade to the position.
    pub fn apply(&mut self, side: TradeSide, quantity: u64) -> Result<(), LifecycleError> {
        self.quantity = match side {
            TradeSide::Buy => self.quantity.checked_add(quantity).ok_or_else(|| {
                LifecycleError::InvariantViolated(format!(
                    "holding of {} in {} overflows",
                    self.user_id, self.asset_id
                ))
            })?,
            TradeSide::Sell => self.quantity.checked_sub(quantity).ok_or(
                LifecycleError::Precondition(ConflictReason::InsufficientHoldings {
                    requested: quantity,
                    held: self.quantity,
                }),
            )?,
        };
        self.updated_at = Timestamp::now();
        Ok(())
    }

    /// Ownership of `total_supply` in basis points, rounded down.
    pub fn ownership_bps(&self, total_supply: u64) -> u32 {
        if total_supply == 0 {
            return 0;
        }
        let bps = u128::from(self.quantity) * 10_000 / u128::from(total_supply);
        u32::try_from(bps).unwrap_or(u32::MAX)
    }
}
