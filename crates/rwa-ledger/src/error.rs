//! Ledger client error types.
//!
//! Transport failures are split by whether the request may have reached the
//! ledger. `Unreachable` means it was never delivered and is safe to resubmit.
//! `OutcomeUnknown` means it may have taken effect: the caller must query the
//! transaction's status by reference before deciding anything.

use rwa_core::{LedgerAccountId, LedgerFailure, LedgerFailureKind, RwaError, TokenId};

use crate::config::ConfigError;
use crate::keys::KeyError;
use crate::types::codes;

/// Errors from ledger client calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The request was never delivered (connection refused, DNS failure).
    #[error("ledger gateway unreachable calling {endpoint}: {detail}")]
    Unreachable {
        /// Endpoint called.
        endpoint: String,
        /// Transport detail.
        detail: String,
    },

    /// The request may have been delivered but no verdict came back.
    #[error("outcome of {endpoint} is unknown: {detail}")]
    OutcomeUnknown {
        /// Endpoint called.
        endpoint: String,
        /// Transport detail.
        detail: String,
    },

    /// The ledger rejected the transaction.
    #[error("ledger {endpoint} returned {status} {code}: {message}")]
    Rejected {
        /// Endpoint called.
        endpoint: String,
        /// HTTP status.
        status: u16,
        /// Ledger result code.
        code: String,
        /// Detail from the gateway.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to deserialize response from {endpoint}: {detail}")]
    Deserialization {
        /// Endpoint called.
        endpoint: String,
        /// Decoder detail.
        detail: String,
    },

    /// The request could not be signed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<KeyError> for LedgerError {
    fn from(err: KeyError) -> Self {
        Self::Signing(err.to_string())
    }
}

impl From<rwa_core::CanonicalizationError> for LedgerError {
    fn from(err: rwa_core::CanonicalizationError) -> Self {
        Self::Signing(err.to_string())
    }
}

impl LedgerError {
    /// The ledger result code, for rejections.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the request was certainly not applied and may be resubmitted.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Whether the call may have taken effect on the ledger.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::OutcomeUnknown { .. })
            || self.code() == Some(codes::DUPLICATE_TRANSACTION)
    }

    /// Map a failed transfer of `token_id` to `to` into the caller-facing
    /// error, naming the token for association failures.
    pub fn into_transfer_failure(self, token_id: &TokenId, to: &LedgerAccountId) -> RwaError {
        let detail = self.to_string();
        let code = self.code().map(str::to_owned);
        match code.as_deref() {
            Some(codes::TOKEN_NOT_ASSOCIATED_TO_ACCOUNT) => RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::AssociationRequired {
                    token_id: token_id.clone(),
                    account: to.clone(),
                },
                detail,
            )),
            Some(codes::INSUFFICIENT_TOKEN_BALANCE) => RwaError::Ledger(LedgerFailure::new(
                LedgerFailureKind::InsufficientTreasuryBalance {
                    token_id: token_id.clone(),
                },
                detail,
            )),
            _ => self.into(),
        }
    }
}

impl From<LedgerError> for RwaError {
    fn from(err: LedgerError) -> Self {
        let detail = err.to_string();
        let kind = match err {
            LedgerError::Unreachable { .. } => LedgerFailureKind::Transient,
            LedgerError::OutcomeUnknown { .. } | LedgerError::Deserialization { .. } => {
                LedgerFailureKind::Unconfirmed
            }
            LedgerError::Rejected { code, .. } => LedgerFailureKind::Rejected { code },
            LedgerError::Signing(_) | LedgerError::Config(_) => {
                return RwaError::Validation(detail);
            }
        };
        RwaError::Ledger(LedgerFailure::new(kind, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(code: &str) -> LedgerError {
        LedgerError::Rejected {
            endpoint: "POST /api/v1/transfers".into(),
            status: 400,
            code: code.into(),
            message: "rejected".into(),
        }
    }

    #[test]
    fn test_association_failure_names_token_and_account() {
        let token = TokenId::new("0.0.5005").unwrap();
        let to = LedgerAccountId::new("0.0.7001").unwrap();
        let err = rejected(codes::TOKEN_NOT_ASSOCIATED_TO_ACCOUNT).into_transfer_failure(&token, &to);
        match err {
            RwaError::Ledger(f) => assert_eq!(
                f.kind,
                LedgerFailureKind::AssociationRequired {
                    token_id: token,
                    account: to
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_transport_classification() {
        let unreachable = LedgerError::Unreachable {
            endpoint: "x".into(),
            detail: "connection refused".into(),
        };
        assert!(unreachable.is_transient());
        assert!(!unreachable.is_outcome_unknown());
        assert!(RwaError::from(unreachable).is_retryable());

        let timeout = LedgerError::OutcomeUnknown {
            endpoint: "x".into(),
            detail: "timed out".into(),
        };
        assert!(timeout.is_outcome_unknown());
        assert!(!RwaError::from(timeout).is_retryable());
    }

    #[test]
    fn test_duplicate_is_outcome_unknown() {
        assert!(rejected(codes::DUPLICATE_TRANSACTION).is_outcome_unknown());
        assert!(!rejected(codes::INVALID_SIGNATURE).is_outcome_unknown());
    }
}
