//! # Identity Lifecycle — KYC and Wallet Link
//!
//! ```text
//! NotSubmitted ──▶ Pending ──▶ Approved
//!                     │
//!                     └──▶ Rejected (terminal)
//! ```
//!
//! Trading eligibility is `kyc approved AND wallet linked`. The two halves
//! change independently: an identity approved before its wallet is linked
//! stays unverified until the link event arrives.

use serde::{Deserialize, Serialize};

use rwa_core::{ConflictReason, LedgerAccountId, Timestamp, UserId};

use crate::error::LifecycleError;

/// KYC review status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    /// Registered, no documents submitted.
    NotSubmitted,
    /// Documents submitted, awaiting review.
    Pending,
    /// Review passed.
    Approved,
    /// Review failed (terminal).
    Rejected,
}

impl KycStatus {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// Lowercase wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "not_submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse a storage name produced by [`KycStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_submitted" => Some(Self::NotSubmitted),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for KycStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotSubmitted => "NOT_SUBMITTED",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Record of a KYC status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycTransitionRecord {
    /// Status before the transition.
    pub from_state: KycStatus,
    /// Status after the transition.
    pub to_state: KycStatus,
    /// When the transition occurred.
    pub timestamp: Timestamp,
    /// Rejection reason, when rejecting.
    pub reason: Option<String>,
}

/// A platform user's identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The user this identity belongs to.
    pub user_id: UserId,
    /// KYC review status.
    pub kyc_status: KycStatus,
    /// Linked ledger wallet, if any.
    pub wallet: Option<LedgerAccountId>,
    /// Reason recorded on rejection.
    pub rejection_reason: Option<String>,
    /// When the identity was registered.
    pub created_at: Timestamp,
    /// When KYC documents were submitted.
    pub submitted_at: Option<Timestamp>,
    /// When the review decision was recorded.
    pub reviewed_at: Option<Timestamp>,
    /// Optimistic concurrency version, bumped by the store on every write.
    pub version: u64,
    /// Ordered log of KYC transitions.
    pub transitions: Vec<KycTransitionRecord>,
}

impl Identity {
    /// Register a new identity with no KYC submission.
    pub fn register(user_id: UserId) -> Self {
        Self {
            user_id,
            kyc_status: KycStatus::NotSubmitted,
            wallet: None,
            rejection_reason: None,
            created_at: Timestamp::now(),
            submitted_at: None,
            reviewed_at: None,
            version: 0,
            transitions: Vec::new(),
        }
    }

    /// Submit KYC documents for review (NOT_SUBMITTED → PENDING).
    pub fn submit_kyc(&mut self) -> Result<(), LifecycleError> {
        self.require_state(KycStatus::NotSubmitted, KycStatus::Pending)?;
        self.submitted_at = Some(Timestamp::now());
        self.do_transition(KycStatus::Pending, None);
        Ok(())
    }

    /// Approve the KYC review (PENDING → APPROVED).
    pub fn approve(&mut self) -> Result<(), LifecycleError> {
        self.require_state(KycStatus::Pending, KycStatus::Approved)?;
        self.reviewed_at = Some(Timestamp::now());
        self.do_transition(KycStatus::Approved, None);
        Ok(())
    }

    /// Reject the KYC review (PENDING → REJECTED).
    ///
    /// The reason is checked before the state so that a missing reason is
    /// always reported as such.
    pub fn reject(&mut self, reason: &str) -> Result<(), LifecycleError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::MissingReason { entity: "identity" });
        }
        self.require_state(KycStatus::Pending, KycStatus::Rejected)?;
        self.reviewed_at = Some(Timestamp::now());
        self.rejection_reason = Some(reason.to_string());
        self.do_transition(KycStatus::Rejected, Some(reason.to_string()));
        Ok(())
    }

    /// Link a ledger wallet, replacing any previous link.
    pub fn link_wallet(&mut self, account: LedgerAccountId) {
        self.wallet = Some(account);
    }

    /// Remove the wallet link. Returns the previously linked account.
    pub fn unlink_wallet(&mut self) -> Result<LedgerAccountId, LifecycleError> {
        self.wallet
            .take()
            .ok_or(LifecycleError::Precondition(ConflictReason::WalletNotLinked))
    }

    /// KYC approved and a wallet linked.
    pub fn is_verified(&self) -> bool {
        self.kyc_status == KycStatus::Approved && self.wallet.is_some()
    }

    /// The linked wallet of a verified identity.
    pub fn verified_wallet(&self) -> Result<&LedgerAccountId, LifecycleError> {
        if self.kyc_status != KycStatus::Approved {
            return Err(LifecycleError::Precondition(ConflictReason::NotVerified));
        }
        self.wallet
            .as_ref()
            .ok_or(LifecycleError::Precondition(ConflictReason::WalletNotLinked))
    }

    fn require_state(&self, expected: KycStatus, target: KycStatus) -> Result<(), LifecycleError> {
        if self.kyc_status != expected {
            return Err(LifecycleError::InvalidTransition {
                entity: "identity",
                from: self.kyc_status.to_string(),
                to: target.to_string(),
            });
        }
        Ok(())
    }

    fn do_transition(&mut self, to: KycStatus, reason: Option<String>) {
        self.transitions.push(KycTransitionRecord {
            from_state: self.kyc_status,
            to_state: to,
            timestamp: Timestamp::now(),
            reason,
        });
        self.kyc_status = to;
    }
}
