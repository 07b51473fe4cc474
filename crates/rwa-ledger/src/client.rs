//! The ledger client port.
//!
//! The settlement core depends on this trait only. Production wiring passes
//! an [`HttpLedgerClient`](crate::HttpLedgerClient) constructed once at
//! startup; tests pass an [`InMemoryLedger`](crate::InMemoryLedger).

use async_trait::async_trait;

use rwa_core::{LedgerAccountId, LedgerTxRef};

use crate::error::LedgerError;
use crate::keys::SignerKey;
use crate::types::{
    AssociateRequest, CreateTokenRequest, LedgerReceipt, LedgerTransaction, TokenIssuance,
    TransferRequest,
};

/// Operations the settlement core needs from the external ledger.
///
/// Every submission carries a client-generated `tx_ref`, so a call whose
/// outcome is unknown can be resolved with
/// [`get_transaction_status`](LedgerClient::get_transaction_status) instead of
/// being resubmitted blindly.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// The treasury account that receives every issued supply.
    fn treasury_account(&self) -> &LedgerAccountId;

    /// Issue a fungible token. Signed by the treasury and by `admin_key`.
    async fn create_fungible_token(
        &self,
        req: &CreateTokenRequest,
        admin_key: &SignerKey,
    ) -> Result<TokenIssuance, LedgerError>;

    /// Move tokens. `signer` must hold the sending account.
    async fn transfer_tokens(
        &self,
        req: &TransferRequest,
        signer: &SignerKey,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Associate a token with an account. `signer` must hold that account.
    async fn associate_token(
        &self,
        req: &AssociateRequest,
        signer: &SignerKey,
    ) -> Result<LedgerReceipt, LedgerError>;

    /// Look up a transaction by reference. `None` if the ledger never saw it.
    async fn get_transaction_status(
        &self,
        tx_ref: &LedgerTxRef,
    ) -> Result<Option<LedgerTransaction>, LedgerError>;

    /// Transactions touching `account`, oldest first. Read-only; used for
    /// reconciliation and audit, never for settlement decisions.
    async fn get_transaction_history(
        &self,
        account: &LedgerAccountId,
    ) -> Result<Vec<LedgerTransaction>, LedgerError>;
}
