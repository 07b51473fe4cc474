//! Typed HTTP client for the ledger gateway.
//!
//! ## Gateway Paths
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | POST   | `/api/v1/tokens` | Issue fungible token |
//! | POST   | `/api/v1/transfers` | Transfer tokens |
//! | POST   | `/api/v1/associations` | Associate token with account |
//! | GET    | `/api/v1/transactions/{txRef}` | Transaction status |
//! | GET    | `/api/v1/accounts/{id}/transactions` | Account history |
//!
//! Submissions are sent as a [`SignedEnvelope`]: the JCS canonicalization of
//! the body, signed by the operator (payer) and by any additional signer the
//! operation requires.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use rwa_core::{CanonicalBytes, LedgerAccountId, LedgerTxRef};

use crate::client::LedgerClient;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::keys::SignerKey;
use crate::types::{
    AssociateRequest, CreateTokenRequest, GatewayErrorBody, LedgerReceipt, LedgerTransaction,
    SignaturePair, SignedEnvelope, TokenIssuance, TransactionHistory, TransferRequest,
};

const API_PREFIX: &str = "api/v1";

/// Header carrying the target network.
pub const NETWORK_HEADER: &str = "x-ledger-network";

/// Ledger client backed by the HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    http: reqwest::Client,
    base_url: url::Url,
    operator_id: LedgerAccountId,
    operator_key: SignerKey,
}

impl HttpLedgerClient {
    /// Create a client from configuration.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    NETWORK_HEADER,
                    reqwest::header::HeaderValue::from_static(config.network.as_str()),
                );
                headers
            })
            .build()
            .map_err(|e| LedgerError::Unreachable {
                endpoint: "client_init".into(),
                detail: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: config.gateway_url,
            operator_id: config.operator_id,
            operator_key: config.operator_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}/{}", self.base_url, API_PREFIX, path)
    }

    fn envelope<T: Serialize + Clone>(
        &self,
        body: &T,
        extra_signer: Option<&SignerKey>,
    ) -> Result<SignedEnvelope<T>, LedgerError> {
        let canonical = CanonicalBytes::new(body)?;
        let mut signatures = vec![SignaturePair {
            public_key: self.operator_key.public_key(),
            signature: self.operator_key.sign(&canonical),
        }];
        if let Some(signer) = extra_signer {
            if signer.public_key() != self.operator_key.public_key() {
                signatures.push(SignaturePair {
                    public_key: signer.public_key(),
                    signature: signer.sign(&canonical),
                });
            }
        }
        Ok(SignedEnvelope {
            body: body.clone(),
            payer: self.operator_id.clone(),
            signatures,
        })
    }

    async fn submit<T, R>(
        &self,
        endpoint: &str,
        path: &str,
        body: &T,
        extra_signer: Option<&SignerKey>,
    ) -> Result<R, LedgerError>
    where
        T: Serialize + Clone + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let envelope = self.envelope(body, extra_signer)?;
        let url = self.url(path);

        let resp = crate::retry::retry_submit(|| self.http.post(&url).json(&envelope).send())
            .await
            .map_err(|e| submit_transport_error(endpoint, e))?;

        if !resp.status().is_success() {
            return Err(rejection(endpoint, resp, true).await);
        }

        // The ledger accepted the transaction; an unreadable receipt does not
        // undo it.
        resp.json().await.map_err(|e| LedgerError::OutcomeUnknown {
            endpoint: endpoint.into(),
            detail: format!("unreadable receipt: {e}"),
        })
    }

    async fn read<R: DeserializeOwned + Send>(
        &self,
        endpoint: &str,
        path: &str,
    ) -> Result<Option<R>, LedgerError> {
        let url = self.url(path);

        let resp = crate::retry::retry_read(|| self.http.get(&url).send())
            .await
            .map_err(|e| LedgerError::Unreachable {
                endpoint: endpoint.into(),
                detail: e.to_string(),
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !resp.status().is_success() {
            return Err(rejection(endpoint, resp, false).await);
        }

        resp.json()
            .await
            .map(Some)
            .map_err(|e| LedgerError::Deserialization {
                endpoint: endpoint.into(),
                detail: e.to_string(),
            })
    }
}

fn submit_transport_error(endpoint: &str, e: reqwest::Error) -> LedgerError {
    if e.is_connect() {
        LedgerError::Unreachable {
            endpoint: endpoint.into(),
            detail: e.to_string(),
        }
    } else {
        LedgerError::OutcomeUnknown {
            endpoint: endpoint.into(),
            detail: e.to_string(),
        }
    }
}

/// Classify a non-2xx response. A 5xx without a ledger code on a submission
/// leaves the outcome unknown: the gateway may have forwarded the request.
async fn rejection(endpoint: &str, resp: reqwest::Response, submission: bool) -> LedgerError {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
    let parsed: GatewayErrorBody = serde_json::from_str(&text).unwrap_or_default();

    match parsed.code {
        Some(code) => LedgerError::Rejected {
            endpoint: endpoint.into(),
            status: status.as_u16(),
            code,
            message: parsed.message.unwrap_or(text),
        },
        None if status.is_server_error() && submission => LedgerError::OutcomeUnknown {
            endpoint: endpoint.into(),
            detail: format!("gateway returned {status}: {text}"),
        },
        None if status.is_server_error() => LedgerError::Unreachable {
            endpoint: endpoint.into(),
            detail: format!("gateway returned {status}: {text}"),
        },
        None => LedgerError::Rejected {
            endpoint: endpoint.into(),
            status: status.as_u16(),
            code: format!("HTTP_{}", status.as_u16()),
            message: text,
        },
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn treasury_account(&self) -> &LedgerAccountId {
        &self.operator_id
    }

    async fn create_fungible_token(
        &self,
        req: &CreateTokenRequest,
        admin_key: &SignerKey,
    ) -> Result<TokenIssuance, LedgerError> {
        self.submit("POST /tokens", "tokens", req, Some(admin_key))
            .await
    }

    async fn transfer_tokens(
        &self,
        req: &TransferRequest,
        signer: &SignerKey,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.submit("POST /transfers", "transfers", req, Some(signer))
            .await
    }

    async fn associate_token(
        &self,
        req: &AssociateRequest,
        signer: &SignerKey,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.submit("POST /associations", "associations", req, Some(signer))
            .await
    }

    async fn get_transaction_status(
        &self,
        tx_ref: &LedgerTxRef,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(tx_ref.as_str().as_bytes()).collect();
        self.read(
            &format!("GET /transactions/{tx_ref}"),
            &format!("transactions/{encoded}"),
        )
        .await
    }

    async fn get_transaction_history(
        &self,
        account: &LedgerAccountId,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let history: Option<TransactionHistory> = self
            .read(
                &format!("GET /accounts/{account}/transactions"),
                &format!("accounts/{account}/transactions"),
            )
            .await?;
        Ok(history.map(|h| h.transactions).unwrap_or_default())
    }
}
