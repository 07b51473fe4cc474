//! # Portfolio Ledger
//!
//! Read side of holdings. Entries are maintained by the trade commit; this
//! module values them against the current asset records, recomputes them
//! from the transaction history, and prunes zeroed positions.
//!
//! Ownership percentages are derived on every read from the entry quantity
//! and the asset's total supply, never stored.

use std::collections::HashMap;
use std::sync::Arc;

use rwa_core::{Amount, AssetId, RwaError, UserId};
use rwa_state::{PortfolioEntry, Transaction};

use crate::context::Context;

/// A position valued at the asset's listed price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    /// The stored position.
    pub entry: PortfolioEntry,
    /// Token symbol of the asset.
    pub symbol: String,
    /// Asset name.
    pub asset_name: String,
    /// Listed price per fraction.
    pub price_per_token: Amount,
    /// `quantity × price_per_token`.
    pub market_value: Amount,
    /// Share of total supply, in basis points, rounded down.
    pub ownership_bps: u32,
}

/// Holdings queries and maintenance.
#[derive(Clone)]
pub struct PortfolioLedger {
    ctx: Arc<Context>,
}

impl PortfolioLedger {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Stored entries for `user_id`, zeroed ones included.
    pub async fn entries(&self, user_id: UserId) -> Result<Vec<PortfolioEntry>, RwaError> {
        Ok(self.ctx.store.portfolio(user_id).await?)
    }

    /// Non-empty positions of `user_id`, valued.
    pub async fn holdings(&self, user_id: UserId) -> Result<Vec<Holding>, RwaError> {
        let entries = self.ctx.store.portfolio(user_id).await?;
        let mut holdings = Vec::with_capacity(entries.len());
        for entry in entries.into_iter().filter(|e| e.quantity > 0) {
            let asset = self.ctx.load_asset(entry.asset_id).await?;
            let price = asset.tokenization.price_per_token;
            let market_value = price.checked_times(entry.quantity).ok_or_else(|| {
                RwaError::Validation(format!(
                    "value of {} × {price} in {} overflows",
                    entry.quantity, entry.asset_id
                ))
            })?;
            holdings.push(Holding {
                ownership_bps: entry.ownership_bps(asset.tokenization.total_supply),
                symbol: asset.tokenization.symbol,
                asset_name: asset.name,
                price_per_token: price,
                market_value,
                entry,
            });
        }
        Ok(holdings)
    }

    /// Total value of the non-empty positions of `user_id`.
    pub async fn total_value(&self, user_id: UserId) -> Result<Amount, RwaError> {
        self.holdings(user_id)
            .await?
            .iter()
            .try_fold(Amount::default(), |acc, h| {
                acc.minor_units()
                    .checked_add(h.market_value.minor_units())
                    .map(Amount::from_minor)
            })
            .ok_or_else(|| RwaError::Validation(format!("portfolio value of {user_id} overflows")))
    }

    /// Recompute the entries of `user_id` from the transaction history and
    /// replace the stored ones.
    ///
    /// Maintenance operation: run it while no trades for the user are in
    /// flight.
    pub async fn rebuild(&self, user_id: UserId) -> Result<Vec<PortfolioEntry>, RwaError> {
        let history = self.ctx.store.transactions_for_user(user_id).await?;
        let entries = replay_history(user_id, &history)?;
        self.ctx.store.replace_portfolio(user_id, &entries).await?;
        tracing::info!(user_id = %user_id, transactions = history.len(), entries = entries.len(), "portfolio rebuilt");
        Ok(entries)
    }

    /// Delete a zeroed entry.
    pub async fn prune(&self, user_id: UserId, asset_id: AssetId) -> Result<(), RwaError> {
        if self
            .ctx
            .store
            .remove_empty_portfolio_entry(user_id, asset_id)
            .await?
        {
            tracing::debug!(user_id = %user_id, asset_id = %asset_id, "empty position pruned");
            return Ok(());
        }
        let held = self
            .ctx
            .store
            .portfolio(user_id)
            .await?
            .into_iter()
            .find(|e| e.asset_id == asset_id);
        match held {
            Some(entry) => Err(RwaError::Validation(format!(
                "position of {user_id} in {asset_id} still holds {}",
                entry.quantity
            ))),
            None => Err(RwaError::not_found("portfolio entry", format!("{user_id}/{asset_id}"))),
        }
    }
}

/// Fold a chronological transaction history into portfolio entries.
fn replay_history(user_id: UserId, history: &[Transaction]) -> Result<Vec<PortfolioEntry>, RwaError> {
    let mut by_asset: HashMap<AssetId, PortfolioEntry> = HashMap::new();
    for tx in history.iter().filter(|tx| tx.user_id == user_id) {
        let entry = by_asset.entry(tx.asset_id).or_insert_with(|| PortfolioEntry {
            opened_at: tx.created_at,
            ..PortfolioEntry::open(user_id, tx.asset_id)
        });
        entry.apply(tx.side, tx.quantity).map_err(|e| {
            RwaError::Store(format!("transaction {} cannot be replayed: {e}", tx.id))
        })?;
        entry.updated_at = tx.created_at;
    }
    let mut entries: Vec<_> = by_asset.into_values().collect();
    entries.sort_by_key(|e| e.opened_at);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwa_core::{LedgerAccountId, LedgerTxRef};

    fn account() -> LedgerAccountId {
        LedgerAccountId::new("0.0.7001").unwrap()
    }

    fn buy(user: UserId, asset: AssetId, qty: u64) -> Transaction {
        Transaction::settled_buy(
            user,
            account(),
            asset,
            qty,
            Amount::from_minor(100),
            LedgerTxRef::generate(&LedgerAccountId::new("0.0.2").unwrap()),
            None,
        )
        .unwrap()
    }

    fn sell(user: UserId, asset: AssetId, qty: u64) -> Transaction {
        Transaction::recorded_sell(user, account(), asset, qty, Amount::from_minor(100), None).unwrap()
    }

    #[test]
    fn test_replay_nets_buys_and_sells() {
        let user = UserId::new();
        let (a, b) = (AssetId::new(), AssetId::new());
        let history = vec![buy(user, a, 10), buy(user, b, 3), sell(user, a, 4), buy(user, a, 1)];
        let entries = replay_history(user, &history).unwrap();
        let qty = |asset| entries.iter().find(|e| e.asset_id == asset).unwrap().quantity;
        assert_eq!(qty(a), 7);
        assert_eq!(qty(b), 3);
    }

    #[test]
    fn test_replay_keeps_zeroed_positions() {
        let user = UserId::new();
        let a = AssetId::new();
        let entries = replay_history(user, &[buy(user, a, 2), sell(user, a, 2)]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].quantity, 0);
    }

    #[test]
    fn test_replay_refuses_oversold_history() {
        let user = UserId::new();
        let a = AssetId::new();
        let err = replay_history(user, &[buy(user, a, 1), sell(user, a, 2)]).unwrap_err();
        assert!(matches!(err, RwaError::Store(_)));
    }

    #[test]
    fn test_replay_ignores_other_users() {
        let user = UserId::new();
        let other = UserId::new();
        let a = AssetId::new();
        let entries = replay_history(user, &[buy(other, a, 5)]).unwrap();
        assert!(entries.is_empty());
    }
}
