//! # Asset Lifecycle — Verification, Tokenization, Listing
//!
//! ```text
//! Pending ──▶ Approved (tokenized, listed) ◀──▶ Approved (delisted)
//!    │
//!    └──▶ Rejected (terminal)
//! ```
//!
//! ## Invariants
//!
//! - `0 <= available_tokens <= total_supply - reserved_tokens`.
//! - `is_listed` implies `Approved` and a ledger token id.
//! - Approval installs the tokenization parameters and the ledger reference
//!   together; there is no approved asset without a token.
//! - Rejection never touches tokenization or the ledger reference.

use serde::{Deserialize, Serialize};

use rwa_core::{
    Amount, AssetCategory, AssetId, ConflictReason, LedgerAccountId, LedgerTxRef, Timestamp,
    TokenId, UserId,
};

use crate::error::LifecycleError;

/// Verification status of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Submitted, awaiting admin review.
    Pending,
    /// Verified and tokenized.
    Approved,
    /// Review failed (terminal).
    Rejected,
}

impl VerificationStatus {
    /// Lowercase wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse a storage name produced by [`VerificationStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Tokenization parameters proposed by the owner at submission.
///
/// Not validated until approval, where admin overrides are merged first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationDraft {
    /// Number of whole fractions to mint.
    pub total_supply: u64,
    /// Token symbol.
    pub symbol: String,
    /// Price of one fraction in minor units.
    pub price_per_token: Amount,
    /// Fractions withheld from sale.
    pub reserved_tokens: u64,
}

/// Admin overrides applied on top of the draft at approval time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationOverrides {
    /// Replacement total supply.
    pub total_supply: Option<u64>,
    /// Replacement symbol.
    pub symbol: Option<String>,
    /// Replacement price per fraction.
    pub price_per_token: Option<Amount>,
    /// Replacement reserved count.
    pub reserved_tokens: Option<u64>,
}

/// Tokenization parameters and the sellable inventory counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokenization {
    /// Number of whole fractions minted.
    pub total_supply: u64,
    /// Token symbol.
    pub symbol: String,
    /// Price of one fraction in minor units.
    pub price_per_token: Amount,
    /// Fractions withheld from sale.
    pub reserved_tokens: u64,
    /// Fractions still eligible for purchase.
    pub available_tokens: u64,
}

impl Tokenization {
    /// Upper bound of `available_tokens`.
    pub fn sellable_cap(&self) -> u64 {
        self.total_supply.saturating_sub(self.reserved_tokens)
    }

    /// Fractions already sold out of the sellable cap.
    pub fn sold(&self) -> u64 {
        self.sellable_cap().saturating_sub(self.available_tokens)
    }

    fn from_draft(draft: &TokenizationDraft) -> Self {
        Self {
            total_supply: draft.total_supply,
            symbol: draft.symbol.clone(),
            price_per_token: draft.price_per_token,
            reserved_tokens: draft.reserved_tokens,
            available_tokens: 0,
        }
    }
}

/// Reference to the asset's token on the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRef {
    /// The minted token.
    pub token_id: TokenId,
    /// Account holding unsold fractions.
    pub treasury_account_id: LedgerAccountId,
    /// Reference of the mint transaction.
    pub issuance_tx_ref: LedgerTxRef,
}

/// Record of an asset status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTransitionRecord {
    /// Status before the transition.
    pub from_state: VerificationStatus,
    /// Status after the transition.
    pub to_state: VerificationStatus,
    /// When the transition occurred.
    pub timestamp: Timestamp,
    /// Rejection reason, when rejecting.
    pub reason: Option<String>,
}

/// A registered real-world asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset identifier.
    pub id: AssetId,
    /// Submitting owner.
    pub owner: UserId,
    /// Display name, also used as the token name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Category and its descriptive fields.
    pub category: AssetCategory,
    /// Review status.
    pub verification_status: VerificationStatus,
    /// Draft parameters while pending; final parameters once approved.
    pub tokenization: Tokenization,
    /// Ledger token, set on approval.
    pub ledger_ref: Option<LedgerRef>,
    /// Whether the asset may be bought.
    pub is_listed: bool,
    /// Reason recorded on rejection.
    pub rejection_reason: Option<String>,
    /// When the asset was submitted.
    pub created_at: Timestamp,
    /// When the review decision was recorded.
    pub reviewed_at: Option<Timestamp>,
    /// Optimistic concurrency version, bumped by the store on every write.
    pub version: u64,
    /// Ordered log of status transitions.
    pub transitions: Vec<AssetTransitionRecord>,
}

impl Asset {
    /// Create a pending asset from an owner's submission.
    pub fn submit(
        owner: UserId,
        name: &str,
        description: &str,
        category: AssetCategory,
        draft: &TokenizationDraft,
    ) -> Result<Self, LifecycleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::Invalid("asset name must be non-empty".into()));
        }
        category
            .validate()
            .map_err(|e| LifecycleError::Invalid(e.to_string()))?;
        Ok(Self {
            id: AssetId::new(),
            owner,
            name: name.to_string(),
            description: description.trim().to_string(),
            category,
            verification_status: VerificationStatus::Pending,
            tokenization: Tokenization::from_draft(draft),
            ledger_ref: None,
            is_listed: false,
            rejection_reason: None,
            created_at: Timestamp::now(),
            reviewed_at: None,
            version: 0,
            transitions: Vec::new(),
        })
    }

    /// Merge overrides into the draft and validate the result.
    ///
    /// Does not mutate the asset: the merged parameters are handed to the
    /// token mint first and installed by [`Asset::approve`] only afterwards.
    pub fn prepare_approval(
        &self,
        overrides: &TokenizationOverrides,
    ) -> Result<Tokenization, LifecycleError> {
        self.require_state(VerificationStatus::Pending, VerificationStatus::Approved)?;

        let draft = &self.tokenization;
        let total_supply = overrides.total_supply.unwrap_or(draft.total_supply);
        let symbol = overrides
            .symbol
            .as_deref()
            .unwrap_or(&draft.symbol)
            .trim()
            .to_string();
        let price_per_token = overrides.price_per_token.unwrap_or(draft.price_per_token);
        let reserved_tokens = overrides.reserved_tokens.unwrap_or(draft.reserved_tokens);

        if total_supply == 0 {
            return Err(LifecycleError::Invalid("total_supply must be positive".into()));
        }
        if symbol.is_empty() {
            return Err(LifecycleError::Invalid("symbol must be non-empty".into()));
        }
        if price_per_token.is_zero() {
            return Err(LifecycleError::Invalid("price_per_token must be positive".into()));
        }
        if reserved_tokens > total_supply {
            return Err(LifecycleError::Invalid(format!(
                "reserved_tokens {reserved_tokens} exceeds total_supply {total_supply}"
            )));
        }

        Ok(Tokenization {
            total_supply,
            symbol,
            price_per_token,
            reserved_tokens,
            available_tokens: total_supply - reserved_tokens,
        })
    }

    /// Record approval after the token was minted (PENDING → APPROVED).
    pub fn approve(
        &mut self,
        tokenization: Tokenization,
        ledger_ref: LedgerRef,
    ) -> Result<(), LifecycleError> {
        self.require_state(VerificationStatus::Pending, VerificationStatus::Approved)?;
        if tokenization.available_tokens > tokenization.sellable_cap() {
            return Err(LifecycleError::Invalid(
                "available_tokens exceeds total_supply - reserved_tokens".into(),
            ));
        }
        self.tokenization = tokenization;
        self.ledger_ref = Some(ledger_ref);
        self.is_listed = true;
        self.reviewed_at = Some(Timestamp::now());
        self.do_transition(VerificationStatus::Approved, None);
        Ok(())
    }

    /// Reject the asset (PENDING → REJECTED).
    pub fn reject(&mut self, reason: &str) -> Result<(), LifecycleError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::MissingReason { entity: "asset" });
        }
        self.require_state(VerificationStatus::Pending, VerificationStatus::Rejected)?;
        self.reviewed_at = Some(Timestamp::now());
        self.rejection_reason = Some(reason.to_string());
        self.do_transition(VerificationStatus::Rejected, Some(reason.to_string()));
        Ok(())
    }

    /// Withdraw the asset from sale.
    pub fn delist(&mut self) -> Result<(), LifecycleError> {
        if self.verification_status != VerificationStatus::Approved {
            return Err(LifecycleError::Precondition(ConflictReason::NotApproved));
        }
        self.is_listed = false;
        Ok(())
    }

    /// Return a delisted asset to sale.
    pub fn relist(&mut self) -> Result<(), LifecycleError> {
        if self.verification_status != VerificationStatus::Approved {
            return Err(LifecycleError::Precondition(ConflictReason::NotApproved));
        }
        if self.ledger_ref.is_none() {
            return Err(LifecycleError::Precondition(ConflictReason::NotTokenized));
        }
        self.is_listed = true;
        Ok(())
    }

    /// The ledger token id, if minted.
    pub fn token_id(&self) -> Option<&TokenId> {
        self.ledger_ref.as_ref().map(|r| &r.token_id)
    }

    /// Check that a purchase of `quantity` may proceed against this snapshot.
    ///
    /// Order of checks: approval, listing, token, availability.
    pub fn check_purchasable(&self, quantity: u64) -> Result<&LedgerRef, LifecycleError> {
        if quantity == 0 {
            return Err(LifecycleError::Invalid("quantity must be positive".into()));
        }
        if self.verification_status != VerificationStatus::Approved {
            return Err(LifecycleError::Precondition(ConflictReason::NotApproved));
        }
        if !self.is_listed {
            return Err(LifecycleError::Precondition(ConflictReason::NotListed));
        }
        let ledger_ref = self
            .ledger_ref
            .as_ref()
            .ok_or(LifecycleError::Precondition(ConflictReason::NotTokenized))?;
        if quantity > self.tokenization.available_tokens {
            return Err(LifecycleError::Precondition(
                ConflictReason::InsufficientAvailability {
                    requested: quantity,
                    available: self.tokenization.available_tokens,
                },
            ));
        }
        Ok(ledger_ref)
    }

    /// Decrement inventory, guarded by current availability.
    pub fn withdraw_available(&mut self, quantity: u64) -> Result<(), LifecycleError> {
        let available = self.tokenization.available_tokens;
        if quantity > available {
            return Err(LifecycleError::Precondition(
                ConflictReason::InsufficientAvailability {
                    requested: quantity,
                    available,
                },
            ));
        }
        self.tokenization.available_tokens = available - quantity;
        Ok(())
    }

    /// Verify the record-level invariants.
    pub fn check_invariants(&self) -> Result<(), LifecycleError> {
        let t = &self.tokenization;
        if t.reserved_tokens > t.total_supply && self.verification_status == VerificationStatus::Approved {
            return Err(LifecycleError::InvariantViolated(format!(
                "asset {}: reserved {} > total {}",
                self.id, t.reserved_tokens, t.total_supply
            )));
        }
        if t.available_tokens > t.sellable_cap() {
            return Err(LifecycleError::InvariantViolated(format!(
                "asset {}: available {} > total {} - reserved {}",
                self.id, t.available_tokens, t.total_supply, t.reserved_tokens
            )));
        }
        if self.is_listed
            && (self.verification_status != VerificationStatus::Approved || self.ledger_ref.is_none())
        {
            return Err(LifecycleError::InvariantViolated(format!(
                "asset {} is listed without approval and token",
                self.id
            )));
        }
        Ok(())
    }

    fn require_state(
        &self,
        expected: VerificationStatus,
        target: VerificationStatus,
    ) -> Result<(), LifecycleError> {
        if self.verification_status != expected {
            return Err(LifecycleError::InvalidTransition {
                entity: "asset",
                from: self.verification_status.to_string(),
                to: target.to_string(),
            });
        }
        Ok(())
    }

    fn do_transition(&mut self, to: VerificationStatus, reason: Option<String>) {
        self.transitions.push(AssetTransitionRecord {
            from_state: self.verification_status,
            to_state: to,
            timestamp: Timestamp::now(),
            reason,
        });
        self.verification_status = to;
    }
}
