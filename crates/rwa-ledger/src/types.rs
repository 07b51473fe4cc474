//! Request and response types exchanged with the ledger gateway.
//!
//! Every submitted body is canonicalized and signed, so request types
//! contain integers and strings only.

use serde::{Deserialize, Serialize};

use rwa_core::{LedgerAccountId, LedgerTxRef, TokenId};

use crate::keys::{PublicKey, Signature};

/// Response codes returned by the ledger for rejected transactions.
pub mod codes {
    /// The recipient has not associated the token.
    pub const TOKEN_NOT_ASSOCIATED_TO_ACCOUNT: &str = "TOKEN_NOT_ASSOCIATED_TO_ACCOUNT";
    /// The sender holds too few tokens.
    pub const INSUFFICIENT_TOKEN_BALANCE: &str = "INSUFFICIENT_TOKEN_BALANCE";
    /// The account has already associated the token.
    pub const TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT: &str = "TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT";
    /// A required signature is missing or wrong.
    pub const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
    /// A transaction with the same reference was already submitted.
    pub const DUPLICATE_TRANSACTION: &str = "DUPLICATE_TRANSACTION";
    /// The token does not exist.
    pub const INVALID_TOKEN_ID: &str = "INVALID_TOKEN_ID";
    /// The account does not exist.
    pub const INVALID_ACCOUNT_ID: &str = "INVALID_ACCOUNT_ID";
}

/// Request to issue a fungible token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    /// Client-generated transaction reference.
    pub tx_ref: LedgerTxRef,
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
    /// Initial and maximum supply.
    pub total_supply: u64,
    /// Decimal places; always 0 for whole fractions.
    pub decimals: u32,
    /// Account receiving the initial supply.
    pub treasury_account_id: LedgerAccountId,
    /// Key authorizing token updates.
    pub admin_key: PublicKey,
    /// Key authorizing supply changes.
    pub supply_key: PublicKey,
    /// Free-form memo.
    pub memo: String,
}

/// Result of a token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIssuance {
    /// The new token.
    pub token_id: TokenId,
    /// Account holding the initial supply.
    pub treasury_account_id: LedgerAccountId,
    /// Supply key installed on the token.
    pub supply_key: PublicKey,
    /// Admin key installed on the token.
    pub admin_key: PublicKey,
    /// Reference of the mint transaction.
    pub tx_ref: LedgerTxRef,
}

/// Request to move tokens between accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Client-generated transaction reference.
    pub tx_ref: LedgerTxRef,
    /// Token being moved.
    pub token_id: TokenId,
    /// Sending account.
    pub from_account: LedgerAccountId,
    /// Receiving account.
    pub to_account: LedgerAccountId,
    /// Whole tokens moved.
    pub amount: u64,
}

/// Request to associate a token with an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociateRequest {
    /// Client-generated transaction reference.
    pub tx_ref: LedgerTxRef,
    /// Account associating the token.
    pub account_id: LedgerAccountId,
    /// Token to associate.
    pub token_id: TokenId,
}

/// Receipt of an accepted transfer or association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    /// Reference of the settled transaction.
    pub tx_ref: LedgerTxRef,
}

/// Final or interim status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    /// Reached consensus and took effect.
    Success,
    /// Reached consensus and failed.
    Failed,
    /// Submitted, not yet final.
    Pending,
    /// Forward-compatible catch-all.
    #[serde(other)]
    Unknown,
}

/// Kind of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerTxKind {
    /// Token issuance.
    TokenCreation,
    /// Token transfer.
    TokenTransfer,
    /// Token association.
    TokenAssociation,
    /// Forward-compatible catch-all.
    #[serde(other)]
    Other,
}

/// A transaction as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    /// Transaction reference.
    pub tx_ref: LedgerTxRef,
    /// Transaction kind.
    pub kind: LedgerTxKind,
    /// Status.
    pub status: TxStatus,
    /// Ledger result code.
    #[serde(default)]
    pub result_code: Option<String>,
    /// Token involved.
    #[serde(default)]
    pub token_id: Option<TokenId>,
    /// Sending account for transfers.
    #[serde(default)]
    pub from_account: Option<LedgerAccountId>,
    /// Receiving account for transfers, associating account for associations.
    #[serde(default)]
    pub to_account: Option<LedgerAccountId>,
    /// Tokens moved or minted.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Consensus time, RFC 3339.
    #[serde(default)]
    pub consensus_at: Option<String>,
}

impl LedgerTransaction {
    /// Whether this is a successful transfer.
    pub fn is_settled_transfer(&self) -> bool {
        self.kind == LedgerTxKind::TokenTransfer && self.status == TxStatus::Success
    }
}

/// History page returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHistory {
    /// Account queried.
    pub account_id: LedgerAccountId,
    /// Transactions, oldest first.
    pub transactions: Vec<LedgerTransaction>,
}

/// One signature over a canonical request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePair {
    /// Signer's public key.
    pub public_key: PublicKey,
    /// Signature over the canonical body.
    pub signature: Signature,
}

/// A request body with the signatures authorizing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope<T> {
    /// The request.
    pub body: T,
    /// Paying account.
    pub payer: LedgerAccountId,
    /// Signatures over the JCS canonicalization of `body`.
    pub signatures: Vec<SignaturePair>,
}

/// Error body returned by the gateway on rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayErrorBody {
    /// Ledger result code.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_request_wire_shape() {
        let req = TransferRequest {
            tx_ref: LedgerTxRef::new("0.0.2@1700000000.000000001").unwrap(),
            token_id: TokenId::new("0.0.5005").unwrap(),
            from_account: LedgerAccountId::new("0.0.2").unwrap(),
            to_account: LedgerAccountId::new("0.0.7001").unwrap(),
            amount: 100,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["tokenId"], "0.0.5005");
        assert_eq!(json["toAccount"], "0.0.7001");
        assert_eq!(json["amount"], 100);
    }

    #[test]
    fn test_ledger_transaction_tolerates_unknown_status() {
        let tx: LedgerTransaction = serde_json::from_value(serde_json::json!({
            "txRef": "0.0.2@1700000000.000000001",
            "kind": "CONTRACT_CALL",
            "status": "REVERTED"
        }))
        .unwrap();
        assert_eq!(tx.kind, LedgerTxKind::Other);
        assert_eq!(tx.status, TxStatus::Unknown);
        assert!(!tx.is_settled_transfer());
    }
}
