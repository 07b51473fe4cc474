//! # rwa-cli — Operator Command-Line Interface
//!
//! ## Subcommands
//!
//! - `ledger`: transaction status and account history from the gateway
//! - `keygen`: Ed25519 key pairs for wallets and operators
//! - `reconcile`: work the reconciliation queue, audit an account
//!   (requires the `postgres` feature)
//!
//! Argument parsing lives in `main.rs`; handlers here write JSON to the
//! writer they are given and delegate to the domain crates.

pub mod keygen;
pub mod ledger;
#[cfg(feature = "postgres")]
pub mod reconcile;

/// Write `value` as pretty JSON followed by a newline.
pub(crate) fn emit(out: &mut dyn std::io::Write, value: &impl serde::Serialize) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
