//! Resolving ledger calls whose outcome is unknown.
//!
//! A submission that timed out after delivery is never resubmitted blindly.
//! Its client-generated reference is looked up with `get_transaction_status`
//! a bounded number of times instead.

use std::time::Duration;

use rwa_core::LedgerTxRef;
use rwa_ledger::{LedgerClient, LedgerError, LedgerTransaction, TxStatus};

/// What the status polls established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Confirmation {
    /// The transaction reached consensus and took effect.
    Applied(LedgerTransaction),
    /// The transaction reached consensus and failed.
    Failed(LedgerTransaction),
    /// Every poll reported the reference as unknown to the ledger.
    NotApplied,
    /// Polls were inconclusive (pending, or the status call itself failed).
    Undetermined(String),
}

/// Poll the status of `tx_ref` up to `checks` times.
pub(crate) async fn await_confirmation(
    ledger: &dyn LedgerClient,
    tx_ref: &LedgerTxRef,
    checks: u32,
    interval: Duration,
) -> Confirmation {
    let mut last = String::from("no status check was made");
    let mut inconclusive = checks == 0;

    for attempt in 0..checks {
        if attempt > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        match ledger.get_transaction_status(tx_ref).await {
            Ok(Some(tx)) => match tx.status {
                TxStatus::Success => return Confirmation::Applied(tx),
                TxStatus::Failed => return Confirmation::Failed(tx),
                TxStatus::Pending | TxStatus::Unknown => {
                    inconclusive = true;
                    last = format!("transaction {tx_ref} still {:?}", tx.status);
                }
            },
            Ok(None) => last = format!("transaction {tx_ref} not found"),
            Err(e) => {
                inconclusive = true;
                last = e.to_string();
            }
        }
        tracing::debug!(tx_ref = %tx_ref, attempt = attempt + 1, checks, "{last}");
    }

    if inconclusive {
        Confirmation::Undetermined(last)
    } else {
        Confirmation::NotApplied
    }
}

/// The rejection a failed status record stands for.
pub(crate) fn rejection_from_status(tx: &LedgerTransaction) -> LedgerError {
    LedgerError::Rejected {
        endpoint: "GET /transactions".into(),
        status: 200,
        code: tx.result_code.clone().unwrap_or_else(|| "FAILED".into()),
        message: format!("transaction {} failed at consensus", tx.tx_ref),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwa_ledger::{InMemoryLedger, InjectedFailure, LedgerOp, SignerKey};

    fn tx_ref() -> LedgerTxRef {
        LedgerTxRef::new("0.0.2@1700000000.000000009").unwrap()
    }

    #[tokio::test]
    async fn test_unknown_reference_is_not_applied() {
        let ledger = InMemoryLedger::new(&SignerKey::generate());
        let c = await_confirmation(&ledger, &tx_ref(), 3, Duration::ZERO).await;
        assert_eq!(c, Confirmation::NotApplied);
    }

    #[tokio::test]
    async fn test_failing_status_calls_are_undetermined() {
        let ledger = InMemoryLedger::new(&SignerKey::generate());
        for _ in 0..2 {
            ledger.fail_next(LedgerOp::Status, InjectedFailure::Unreachable);
        }
        let c = await_confirmation(&ledger, &tx_ref(), 2, Duration::ZERO).await;
        assert!(matches!(c, Confirmation::Undetermined(_)));
    }

    #[tokio::test]
    async fn test_one_failed_poll_then_not_found_is_undetermined() {
        let ledger = InMemoryLedger::new(&SignerKey::generate());
        ledger.fail_next(LedgerOp::Status, InjectedFailure::Unreachable);
        let c = await_confirmation(&ledger, &tx_ref(), 3, Duration::ZERO).await;
        assert!(matches!(c, Confirmation::Undetermined(_)));
    }

    #[tokio::test]
    async fn test_zero_checks_is_undetermined() {
        let ledger = InMemoryLedger::new(&SignerKey::generate());
        let c = await_confirmation(&ledger, &tx_ref(), 0, Duration::ZERO).await;
        assert!(matches!(c, Confirmation::Undetermined(_)));
    }
}
