//! # Reconcile Subcommand
//!
//! Runs one pass over the reconciliation queue, then optionally audits a
//! single account against the ledger. Uses the PostgreSQL store at
//! `DATABASE_URL` and the gateway configured by `LEDGER_*`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use rwa_core::LedgerAccountId;
use rwa_ledger::{HttpLedgerClient, LedgerConfig};
use rwa_settlement::{
    AccountAudit, EngineConfig, LogDispatcher, PgStore, ReconciliationReport, RwaCore,
};

/// Arguments for the reconcile subcommand.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Audit this account after the queue pass.
    #[arg(long)]
    pub account: Option<String>,

    /// List queued tasks without attempting them.
    #[arg(long, conflicts_with = "account")]
    pub list: bool,
}

#[derive(Serialize)]
struct ReconcileOutput {
    report: ReconciliationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<AccountAudit>,
}

/// Wire the core from the environment and run the requested pass.
pub async fn run(args: &ReconcileArgs, out: &mut dyn std::io::Write) -> Result<()> {
    let Some(store) = PgStore::from_env().await? else {
        bail!("DATABASE_URL must be set to reconcile");
    };
    let ledger_config = LedgerConfig::from_env().context("ledger configuration")?;
    let treasury_key = ledger_config.operator_key.clone();
    let ledger = HttpLedgerClient::new(ledger_config)?;
    let core = RwaCore::new(
        Arc::new(store),
        Arc::new(ledger),
        treasury_key,
        Arc::new(LogDispatcher),
        EngineConfig::from_env().context("engine configuration")?,
    );
    let reconciler = core.reconciler();

    if args.list {
        return crate::emit(out, &reconciler.pending().await?);
    }
    let account = args
        .account
        .as_deref()
        .map(LedgerAccountId::new)
        .transpose()
        .context("invalid --account")?;

    let report = reconciler.run_once().await?;
    let audit = match &account {
        Some(account) => Some(reconciler.audit_account(account).await?),
        None => None,
    };
    crate::emit(out, &ReconcileOutput { report, audit })
}
