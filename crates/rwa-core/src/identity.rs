//! # Identifier Newtypes
//!
//! Newtype wrappers for every identifier in the RWA stack. These prevent
//! accidental identifier confusion: you cannot pass an `AssetId` where a
//! `UserId` is expected, or a `TokenId` where a `LedgerAccountId` is.
//!
//! Platform records (`UserId`, `AssetId`, `TransactionId`) are UUIDs.
//! External ledger entities (`LedgerAccountId`, `TokenId`) use the ledger's
//! `shard.realm.num` notation, and ledger transactions are referenced by
//! `payer@seconds.nanos`.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RwaError;

/// Unique identifier for a platform user (the holder of an identity record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

/// Unique identifier for a registered real-world asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub Uuid);

/// Unique identifier for a settled trade in the local transaction ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

macro_rules! uuid_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Access the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(UserId, "user");
uuid_id!(AssetId, "asset");
uuid_id!(TransactionId, "tx");

/// Parse `shard.realm.num` into its three components.
fn parse_entity_num(kind: &str, raw: &str) -> Result<(u64, u64, u64), RwaError> {
    let parts: Vec<&str> = raw.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(RwaError::Validation(format!(
            "{kind} must be shard.realm.num, got {raw:?}"
        )));
    }
    let mut nums = [0u64; 3];
    for (slot, part) in nums.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RwaError::Validation(format!(
                "{kind} must be shard.realm.num, got {raw:?}"
            )));
        }
        *slot = part
            .parse()
            .map_err(|e| RwaError::Validation(format!("{kind} {raw:?}: {e}")))?;
    }
    Ok((nums[0], nums[1], nums[2]))
}

/// An account on the external ledger (e.g. `0.0.48213`).
///
/// Used for the treasury account and for users' linked wallets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LedgerAccountId(String);

/// A fungible token on the external ledger (e.g. `0.0.59110`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(String);

impl LedgerAccountId {
    /// Validate and wrap a ledger account identifier.
    pub fn new(raw: &str) -> Result<Self, RwaError> {
        let (shard, realm, num) = parse_entity_num("ledger account id", raw)?;
        Ok(Self::from_parts(shard, realm, num))
    }

    /// Build from numeric components.
    pub fn from_parts(shard: u64, realm: u64, num: u64) -> Self {
        Self(format!("{shard}.{realm}.{num}"))
    }

    /// The identifier in `shard.realm.num` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TokenId {
    /// Validate and wrap a token identifier.
    pub fn new(raw: &str) -> Result<Self, RwaError> {
        let (shard, realm, num) = parse_entity_num("token id", raw)?;
        Ok(Self::from_parts(shard, realm, num))
    }

    /// Build from numeric components.
    pub fn from_parts(shard: u64, realm: u64, num: u64) -> Self {
        Self(format!("{shard}.{realm}.{num}"))
    }

    /// The identifier in `shard.realm.num` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LedgerAccountId {
    type Error = RwaError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<LedgerAccountId> for String {
    fn from(value: LedgerAccountId) -> Self {
        value.0
    }
}

impl TryFrom<String> for TokenId {
    type Error = RwaError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TokenId> for String {
    fn from(value: TokenId) -> Self {
        value.0
    }
}

impl std::fmt::Display for LedgerAccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sub-second sequence mixed into generated references so that two
/// references generated in the same nanosecond by this process differ.
static TX_REF_SEQ: AtomicU32 = AtomicU32::new(0);

/// Reference to a transaction on the external ledger.
///
/// Generated client-side before submission (`payer@seconds.nanos`) so that
/// the transaction's status can be queried by reference if the submitting
/// call times out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LedgerTxRef(String);

impl LedgerTxRef {
    /// Wrap a reference returned by the ledger.
    pub fn new(raw: &str) -> Result<Self, RwaError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(RwaError::Validation(format!(
                "ledger transaction reference must be non-empty without whitespace, got {raw:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Generate a fresh reference for a transaction paid for by `payer`.
    pub fn generate(payer: &LedgerAccountId) -> Self {
        let now = Utc::now();
        let seq = TX_REF_SEQ.fetch_add(1, Ordering::Relaxed) % 1000;
        let nanos = (now.timestamp_subsec_nanos() / 1000) * 1000 + seq;
        Self(format!("{payer}@{}.{nanos:09}", now.timestamp()))
    }

    /// The reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LedgerTxRef {
    type Error = RwaError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<LedgerTxRef> for String {
    fn from(value: LedgerTxRef) -> Self {
        value.0
    }
}

impl std::fmt::Display for LedgerTxRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_accepts_entity_notation() {
        let id = LedgerAccountId::new("0.0.48213").unwrap();
        assert_eq!(id.as_str(), "0.0.48213");
    }

    #[test]
    fn test_account_id_normalizes_leading_zeros() {
        let id = LedgerAccountId::new("0.0.0042").unwrap();
        assert_eq!(id.as_str(), "0.0.42");
    }

    #[test]
    fn test_account_id_rejects_malformed() {
        assert!(LedgerAccountId::new("").is_err());
        assert!(LedgerAccountId::new("0.0").is_err());
        assert!(LedgerAccountId::new("0.0.x").is_err());
        assert!(LedgerAccountId::new("0..1").is_err());
        assert!(LedgerAccountId::new("0.0.-1").is_err());
    }

    #[test]
    fn test_token_id_serde_is_plain_string() {
        let id = TokenId::new("0.0.5005").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0.0.5005\"");
        let back: TokenId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_token_id_deserialize_rejects_garbage() {
        let result: Result<TokenId, _> = serde_json::from_str("\"not-a-token\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_generated_tx_refs_are_unique_and_carry_payer() {
        let payer = LedgerAccountId::new("0.0.2").unwrap();
        let a = LedgerTxRef::generate(&payer);
        let b = LedgerTxRef::generate(&payer);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("0.0.2@"));
    }

    #[test]
    fn test_tx_ref_rejects_whitespace() {
        assert!(LedgerTxRef::new("").is_err());
        assert!(LedgerTxRef::new("0.0.2@1 2").is_err());
        assert!(LedgerTxRef::new("0.0.2@1700000000.000000001").is_ok());
    }

    #[test]
    fn test_uuid_id_display_prefix() {
        let id = AssetId::new();
        assert!(id.to_string().starts_with("asset:"));
        assert_ne!(AssetId::new(), id);
    }
}
