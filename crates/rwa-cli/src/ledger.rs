//! # Ledger Subcommand
//!
//! Read-only lookups against the ledger gateway configured by the
//! `LEDGER_*` environment variables.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use rwa_core::{LedgerAccountId, LedgerTxRef};
use rwa_ledger::LedgerClient;

/// Arguments for the ledger subcommand.
#[derive(Args, Debug)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub query: LedgerQuery,
}

/// Ledger lookups.
#[derive(Subcommand, Debug)]
pub enum LedgerQuery {
    /// Status of one transaction by reference.
    Status {
        /// Transaction reference, `<payer>@<seconds>.<nanos>`.
        #[arg(long)]
        tx_ref: String,
    },
    /// Transactions touching an account, oldest first.
    History {
        /// Account id, `shard.realm.num`.
        #[arg(long)]
        account: String,
    },
}

/// Run a lookup and print the result.
pub async fn run(
    args: &LedgerArgs,
    client: &dyn LedgerClient,
    out: &mut dyn std::io::Write,
) -> Result<()> {
    match &args.query {
        LedgerQuery::Status { tx_ref } => {
            let tx_ref = LedgerTxRef::new(tx_ref).context("invalid --tx-ref")?;
            let status = client.get_transaction_status(&tx_ref).await?;
            if status.is_none() {
                tracing::warn!(tx_ref = %tx_ref, "transaction not known to the ledger");
            }
            crate::emit(out, &status)
        }
        LedgerQuery::History { account } => {
            let account = LedgerAccountId::new(account).context("invalid --account")?;
            let history = client.get_transaction_history(&account).await?;
            tracing::debug!(account = %account, transactions = history.len(), "history fetched");
            crate::emit(out, &history)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwa_ledger::{InMemoryLedger, SignerKey};

    async fn run_query(ledger: &InMemoryLedger, query: LedgerQuery) -> Result<serde_json::Value> {
        let mut buf = Vec::new();
        run(&LedgerArgs { query }, ledger, &mut buf).await?;
        Ok(serde_json::from_slice(&buf)?)
    }

    #[tokio::test]
    async fn test_unknown_status_prints_null() {
        let ledger = InMemoryLedger::new(&SignerKey::generate());
        let out = run_query(
            &ledger,
            LedgerQuery::Status {
                tx_ref: "0.0.2@1700000000.000000001".into(),
            },
        )
        .await
        .unwrap();
        assert!(out.is_null());
    }

    #[tokio::test]
    async fn test_empty_history_prints_empty_array() {
        let ledger = InMemoryLedger::new(&SignerKey::generate());
        let out = run_query(
            &ledger,
            LedgerQuery::History {
                account: "0.0.1234".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_malformed_reference_is_rejected() {
        let ledger = InMemoryLedger::new(&SignerKey::generate());
        let err = run_query(
            &ledger,
            LedgerQuery::Status {
                tx_ref: "0.0.2 @1700000000.0".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("--tx-ref"));
    }
}
