//! # Error Types — Settlement Error Taxonomy
//!
//! Defines the error kinds surfaced by the settlement core to its callers.
//! All errors use `thiserror` for derive-based `Display` and `Error`
//! implementations.
//!
//! ## Propagation
//!
//! - `Validation`, `NotFound`, `Conflict` and `InvalidTransition` are
//!   recovered at the call boundary. No state was mutated and no external
//!   ledger call was made.
//! - `Ledger` is surfaced verbatim with its sub-kind. `AssociationRequired`
//!   carries the token identifier so the caller can remediate.
//! - `ReconciliationRequired` means the ledger moved but the local write did
//!   not land. A reconciliation task has been queued (or logged) for it.

use thiserror::Error;

use crate::identity::{LedgerAccountId, LedgerTxRef, TokenId};

/// Top-level error type for the RWA stack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RwaError {
    /// Malformed or missing input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("asset", "identity", ...).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A domain precondition is unmet.
    #[error("conflict: {0}")]
    Conflict(ConflictReason),

    /// The lifecycle state does not allow the requested transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state name.
        from: String,
        /// Attempted target state name.
        to: String,
    },

    /// The external ledger call failed.
    #[error("ledger error: {0}")]
    Ledger(LedgerFailure),

    /// The ledger call succeeded but the local write did not.
    #[error("reconciliation required for ledger transaction {ledger_tx_ref}: {detail}")]
    ReconciliationRequired {
        /// Reference of the ledger transaction that already took effect.
        ledger_tx_ref: LedgerTxRef,
        /// What failed locally.
        detail: String,
    },

    /// The persistence backend failed.
    #[error("store error: {0}")]
    Store(String),
}

impl RwaError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(failure) => matches!(failure.kind, LedgerFailureKind::Transient),
            Self::Conflict(ConflictReason::StaleRecord) => true,
            _ => false,
        }
    }
}

/// Domain preconditions that can block an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The identity is not KYC-approved with a linked wallet.
    #[error("identity is not verified")]
    NotVerified,

    /// The identity has no linked ledger wallet.
    #[error("no wallet linked to identity")]
    WalletNotLinked,

    /// The asset is not listed for trading.
    #[error("asset is not listed")]
    NotListed,

    /// The asset has no token on the external ledger.
    #[error("asset is not tokenized")]
    NotTokenized,

    /// The asset has not been approved.
    #[error("asset is not approved")]
    NotApproved,

    /// Fewer fractions remain than were requested.
    #[error("insufficient availability: requested {requested}, available {available}")]
    InsufficientAvailability {
        /// Quantity requested.
        requested: u64,
        /// Quantity still available.
        available: u64,
    },

    /// The seller holds fewer fractions than offered.
    #[error("insufficient holdings: requested {requested}, held {held}")]
    InsufficientHoldings {
        /// Quantity offered.
        requested: u64,
        /// Quantity held.
        held: u64,
    },

    /// The record changed since it was read.
    #[error("record was modified concurrently")]
    StaleRecord,

    /// The idempotency key was already used for a different order.
    #[error("idempotency key {0} was used for a different order")]
    IdempotencyKeyReused(String),

    /// A token exists on the ledger for the asset; its approval can only
    /// be completed.
    #[error("token {0} already issued for asset")]
    TokenIssued(TokenId),
}

/// A failed external ledger call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct LedgerFailure {
    /// What kind of failure occurred.
    pub kind: LedgerFailureKind,
    /// Diagnostic detail from the ledger or transport.
    pub detail: String,
}

impl LedgerFailure {
    /// Create a failure of the given kind.
    pub fn new(kind: LedgerFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Distinguishable causes of a ledger call failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerFailureKind {
    /// The receiving account has not associated the token. The holder must
    /// call `AssociateToken` with their own key first.
    #[error("token {token_id} is not associated with account {account}")]
    AssociationRequired {
        /// The token that must be associated.
        token_id: TokenId,
        /// The account that must associate it.
        account: LedgerAccountId,
    },

    /// The treasury does not hold enough of the token.
    #[error("treasury balance of token {token_id} is insufficient")]
    InsufficientTreasuryBalance {
        /// The token being transferred.
        token_id: TokenId,
    },

    /// Network failure or timeout with no observable side effect.
    #[error("transient ledger failure")]
    Transient,

    /// The ledger rejected the transaction.
    #[error("ledger rejected the transaction with {code}")]
    Rejected {
        /// Ledger response code.
        code: String,
    },

    /// The call's effect could not be established.
    #[error("ledger outcome unconfirmed")]
    Unconfirmed,
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations; use string or integer for amount: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_required_message_names_token() {
        let err = RwaError::Ledger(LedgerFailure::new(
            LedgerFailureKind::AssociationRequired {
                token_id: TokenId::new("0.0.5005").unwrap(),
                account: LedgerAccountId::new("0.0.1234").unwrap(),
            },
            "TOKEN_NOT_ASSOCIATED_TO_ACCOUNT",
        ));
        let msg = err.to_string();
        assert!(msg.contains("0.0.5005"));
        assert!(msg.contains("0.0.1234"));
    }

    #[test]
    fn test_retryable_kinds() {
        let transient = RwaError::Ledger(LedgerFailure::new(LedgerFailureKind::Transient, "timeout"));
        assert!(transient.is_retryable());
        assert!(RwaError::Conflict(ConflictReason::StaleRecord).is_retryable());

        let unconfirmed =
            RwaError::Ledger(LedgerFailure::new(LedgerFailureKind::Unconfirmed, "status unknown"));
        assert!(!unconfirmed.is_retryable());
        assert!(!RwaError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_not_found_display() {
        let err = RwaError::not_found("asset", "asset:123");
        assert_eq!(err.to_string(), "asset not found: asset:123");
    }

    #[test]
    fn test_insufficient_availability_display() {
        let reason = ConflictReason::InsufficientAvailability {
            requested: 100,
            available: 50,
        };
        assert_eq!(
            reason.to_string(),
            "insufficient availability: requested 100, available 50"
        );
    }
}
