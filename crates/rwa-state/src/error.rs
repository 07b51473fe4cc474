//! Errors raised by lifecycle transitions.

use thiserror::Error;

use rwa_core::{ConflictReason, RwaError};

/// A transition was refused. The record is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The current state does not allow the transition.
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        /// Record kind.
        entity: &'static str,
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A rejection was attempted without a reason.
    #[error("{entity} rejection requires a non-empty reason")]
    MissingReason {
        /// Record kind.
        entity: &'static str,
    },

    /// Submitted or merged fields are malformed.
    #[error("{0}")]
    Invalid(String),

    /// A domain precondition is unmet.
    #[error("{0}")]
    Precondition(ConflictReason),

    /// A record was observed in a state its invariants forbid.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

impl From<LifecycleError> for RwaError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidTransition { from, to, .. } => {
                RwaError::InvalidTransition { from, to }
            }
            LifecycleError::MissingReason { .. } | LifecycleError::Invalid(_) => {
                RwaError::Validation(err.to_string())
            }
            LifecycleError::Precondition(reason) => RwaError::Conflict(reason),
            LifecycleError::InvariantViolated(_) => RwaError::Store(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_reason_maps_to_validation() {
        let err: RwaError = LifecycleError::MissingReason { entity: "asset" }.into();
        assert!(matches!(err, RwaError::Validation(_)));
    }

    #[test]
    fn test_invalid_transition_keeps_state_names() {
        let err: RwaError = LifecycleError::InvalidTransition {
            entity: "identity",
            from: "APPROVED".into(),
            to: "APPROVED".into(),
        }
        .into();
        assert_eq!(
            err,
            RwaError::InvalidTransition {
                from: "APPROVED".into(),
                to: "APPROVED".into()
            }
        );
    }
}
