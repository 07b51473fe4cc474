//! # In-Memory Ledger
//!
//! A deterministic ledger implementing [`LedgerClient`], used as the test
//! double for the settlement core. It enforces the same rules the real
//! ledger does for the calls the core makes: association before receipt,
//! sender balance, signer ownership, and duplicate transaction references.
//!
//! Failures can be injected per operation to exercise timeout and
//! reconciliation paths. `TimeoutAfterApply` applies the transaction and
//! then reports an unknown outcome, like a gateway timeout after consensus.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use rwa_core::{LedgerAccountId, LedgerTxRef, TokenId};

use crate::client::LedgerClient;
use crate::error::LedgerError;
use crate::keys::{PublicKey, SignerKey};
use crate::types::{
    codes, AssociateRequest, CreateTokenRequest, LedgerReceipt, LedgerTransaction, LedgerTxKind,
    TokenIssuance, TransferRequest, TxStatus,
};

/// Ledger operations that accept injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    /// `create_fungible_token`.
    CreateToken,
    /// `transfer_tokens`.
    Transfer,
    /// `associate_token`.
    Associate,
    /// `get_transaction_status`.
    Status,
    /// `get_transaction_history`.
    History,
}

/// A failure to inject into the next call of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    /// The request is never delivered.
    Unreachable,
    /// The request is lost after delivery without taking effect.
    TimeoutBeforeApply,
    /// The request takes effect but the response is lost.
    TimeoutAfterApply,
    /// The ledger rejects the request with this code.
    Reject(String),
}

#[derive(Debug)]
struct TokenState {
    treasury: LedgerAccountId,
    balances: HashMap<LedgerAccountId, u64>,
    associated: HashSet<LedgerAccountId>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<LedgerAccountId, PublicKey>,
    tokens: HashMap<TokenId, TokenState>,
    transactions: Vec<LedgerTransaction>,
    seen_refs: HashSet<LedgerTxRef>,
    failures: HashMap<LedgerOp, VecDeque<InjectedFailure>>,
    next_entity: u64,
}

/// An in-memory ledger with a single treasury account.
#[derive(Debug)]
pub struct InMemoryLedger {
    treasury: LedgerAccountId,
    state: Mutex<LedgerState>,
    mints: AtomicU64,
    transfers: AtomicU64,
}

impl InMemoryLedger {
    /// Create a ledger whose treasury account is controlled by `treasury_key`.
    pub fn new(treasury_key: &SignerKey) -> Self {
        let treasury = LedgerAccountId::from_parts(0, 0, 2);
        let mut state = LedgerState {
            next_entity: 1000,
            ..Default::default()
        };
        state
            .accounts
            .insert(treasury.clone(), treasury_key.public_key());
        Self {
            treasury,
            state: Mutex::new(state),
            mints: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
        }
    }

    /// Open an account controlled by `key`.
    pub fn create_account(&self, key: &PublicKey) -> LedgerAccountId {
        let mut state = self.state.lock();
        let id = LedgerAccountId::from_parts(0, 0, state.next_entity);
        state.next_entity += 1;
        state.accounts.insert(id.clone(), *key);
        id
    }

    /// Queue a failure for the next call of `op`.
    pub fn fail_next(&self, op: LedgerOp, failure: InjectedFailure) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(failure);
    }

    /// Number of successful token issuances.
    pub fn mint_count(&self) -> u64 {
        self.mints.load(Ordering::SeqCst)
    }

    /// Number of successful transfers.
    pub fn transfer_count(&self) -> u64 {
        self.transfers.load(Ordering::SeqCst)
    }

    /// Token balance of `account`.
    pub fn balance(&self, token_id: &TokenId, account: &LedgerAccountId) -> u64 {
        self.state
            .lock()
            .tokens
            .get(token_id)
            .and_then(|t| t.balances.get(account).copied())
            .unwrap_or(0)
    }

    fn take_failure(&self, op: LedgerOp) -> Option<InjectedFailure> {
        self.state
            .lock()
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
    }

    /// Run `apply` under the injected-failure policy for `op`.
    fn execute<T>(
        &self,
        op: LedgerOp,
        endpoint: &str,
        apply: impl FnOnce(&mut LedgerState) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        match self.take_failure(op) {
            None => apply(&mut self.state.lock()),
            Some(InjectedFailure::Unreachable) => Err(LedgerError::Unreachable {
                endpoint: endpoint.into(),
                detail: "injected: connection refused".into(),
            }),
            Some(InjectedFailure::TimeoutBeforeApply) => Err(LedgerError::OutcomeUnknown {
                endpoint: endpoint.into(),
                detail: "injected: timed out".into(),
            }),
            Some(InjectedFailure::TimeoutAfterApply) => {
                apply(&mut self.state.lock())?;
                Err(LedgerError::OutcomeUnknown {
                    endpoint: endpoint.into(),
                    detail: "injected: timed out after consensus".into(),
                })
            }
            Some(InjectedFailure::Reject(code)) => Err(reject(endpoint, &code, "injected")),
        }
    }
}

fn reject(endpoint: &str, code: &str, message: &str) -> LedgerError {
    LedgerError::Rejected {
        endpoint: endpoint.into(),
        status: 400,
        code: code.into(),
        message: message.into(),
    }
}

fn check_ref(state: &mut LedgerState, endpoint: &str, tx_ref: &LedgerTxRef) -> Result<(), LedgerError> {
    if !state.seen_refs.insert(tx_ref.clone()) {
        return Err(reject(endpoint, codes::DUPLICATE_TRANSACTION, tx_ref.as_str()));
    }
    Ok(())
}

fn check_signer(
    state: &LedgerState,
    endpoint: &str,
    account: &LedgerAccountId,
    signer: &PublicKey,
) -> Result<(), LedgerError> {
    match state.accounts.get(account) {
        None => Err(reject(endpoint, codes::INVALID_ACCOUNT_ID, account.as_str())),
        Some(key) if key != signer => Err(reject(
            endpoint,
            codes::INVALID_SIGNATURE,
            &format!("{account} not signed by its key"),
        )),
        Some(_) => Ok(()),
    }
}

fn record(
    state: &mut LedgerState,
    tx_ref: &LedgerTxRef,
    kind: LedgerTxKind,
    token_id: &TokenId,
    from: Option<&LedgerAccountId>,
    to: Option<&LedgerAccountId>,
    amount: Option<u64>,
) {
    state.transactions.push(LedgerTransaction {
        tx_ref: tx_ref.clone(),
        kind,
        status: TxStatus::Success,
        result_code: Some("SUCCESS".into()),
        token_id: Some(token_id.clone()),
        from_account: from.cloned(),
        to_account: to.cloned(),
        amount,
        consensus_at: Some(rwa_core::Timestamp::now().to_iso8601()),
    });
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn treasury_account(&self) -> &LedgerAccountId {
        &self.treasury
    }

    async fn create_fungible_token(
        &self,
        req: &CreateTokenRequest,
        admin_key: &SignerKey,
    ) -> Result<TokenIssuance, LedgerError> {
        let endpoint = "POST /tokens";
        self.execute(LedgerOp::CreateToken, endpoint, |state| {
            if admin_key.public_key() != req.admin_key {
                return Err(reject(endpoint, codes::INVALID_SIGNATURE, "admin key"));
            }
            if !state.accounts.contains_key(&req.treasury_account_id) {
                return Err(reject(
                    endpoint,
                    codes::INVALID_ACCOUNT_ID,
                    req.treasury_account_id.as_str(),
                ));
            }
            check_ref(state, endpoint, &req.tx_ref)?;

            let num = state.next_entity;
            state.next_entity += 1;
            let token_id = TokenId::from_parts(0, 0, num);
            let treasury = req.treasury_account_id.clone();
            state.tokens.insert(
                token_id.clone(),
                TokenState {
                    treasury: treasury.clone(),
                    balances: HashMap::from([(treasury.clone(), req.total_supply)]),
                    associated: HashSet::from([treasury.clone()]),
                },
            );
            record(
                state,
                &req.tx_ref,
                LedgerTxKind::TokenCreation,
                &token_id,
                None,
                Some(&treasury),
                Some(req.total_supply),
            );
            self.mints.fetch_add(1, Ordering::SeqCst);
            Ok(TokenIssuance {
                token_id,
                treasury_account_id: treasury,
                supply_key: req.supply_key,
                admin_key: req.admin_key,
                tx_ref: req.tx_ref.clone(),
            })
        })
    }

    async fn transfer_tokens(
        &self,
        req: &TransferRequest,
        signer: &SignerKey,
    ) -> Result<LedgerReceipt, LedgerError> {
        let endpoint = "POST /transfers";
        self.execute(LedgerOp::Transfer, endpoint, |state| {
            check_signer(state, endpoint, &req.from_account, &signer.public_key())?;
            if !state.accounts.contains_key(&req.to_account) {
                return Err(reject(endpoint, codes::INVALID_ACCOUNT_ID, req.to_account.as_str()));
            }
            let token = state
                .tokens
                .get_mut(&req.token_id)
                .ok_or_else(|| reject(endpoint, codes::INVALID_TOKEN_ID, req.token_id.as_str()))?;
            if !token.associated.contains(&req.to_account) {
                return Err(reject(
                    endpoint,
                    codes::TOKEN_NOT_ASSOCIATED_TO_ACCOUNT,
                    &format!("{} has not associated {}", req.to_account, req.token_id),
                ));
            }
            let from_balance = token.balances.get(&req.from_account).copied().unwrap_or(0);
            if from_balance < req.amount {
                return Err(reject(
                    endpoint,
                    codes::INSUFFICIENT_TOKEN_BALANCE,
                    &format!("{} holds {from_balance}", req.from_account),
                ));
            }
            check_ref(state, endpoint, &req.tx_ref)?;

            // Re-borrow after the duplicate check touched `state`.
            let token = state
                .tokens
                .get_mut(&req.token_id)
                .ok_or_else(|| reject(endpoint, codes::INVALID_TOKEN_ID, req.token_id.as_str()))?;
            token
                .balances
                .insert(req.from_account.clone(), from_balance - req.amount);
            *token.balances.entry(req.to_account.clone()).or_insert(0) += req.amount;
            record(
                state,
                &req.tx_ref,
                LedgerTxKind::TokenTransfer,
                &req.token_id,
                Some(&req.from_account),
                Some(&req.to_account),
                Some(req.amount),
            );
            self.transfers.fetch_add(1, Ordering::SeqCst);
            Ok(LedgerReceipt {
                tx_ref: req.tx_ref.clone(),
            })
        })
    }

    async fn associate_token(
        &self,
        req: &AssociateRequest,
        signer: &SignerKey,
    ) -> Result<LedgerReceipt, LedgerError> {
        let endpoint = "POST /associations";
        self.execute(LedgerOp::Associate, endpoint, |state| {
            check_signer(state, endpoint, &req.account_id, &signer.public_key())?;
            let token = state
                .tokens
                .get(&req.token_id)
                .ok_or_else(|| reject(endpoint, codes::INVALID_TOKEN_ID, req.token_id.as_str()))?;
            if token.associated.contains(&req.account_id) || token.treasury == req.account_id {
                return Err(reject(
                    endpoint,
                    codes::TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT,
                    req.account_id.as_str(),
                ));
            }
            check_ref(state, endpoint, &req.tx_ref)?;
            if let Some(token) = state.tokens.get_mut(&req.token_id) {
                token.associated.insert(req.account_id.clone());
            }
            record(
                state,
                &req.tx_ref,
                LedgerTxKind::TokenAssociation,
                &req.token_id,
                None,
                Some(&req.account_id),
                None,
            );
            Ok(LedgerReceipt {
                tx_ref: req.tx_ref.clone(),
            })
        })
    }

    async fn get_transaction_status(
        &self,
        tx_ref: &LedgerTxRef,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        self.execute(LedgerOp::Status, "GET /transactions", |state| {
            Ok(state
                .transactions
                .iter()
                .find(|t| &t.tx_ref == tx_ref)
                .cloned())
        })
    }

    async fn get_transaction_history(
        &self,
        account: &LedgerAccountId,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        self.execute(LedgerOp::History, "GET /accounts/transactions", |state| {
            Ok(state
                .transactions
                .iter()
                .filter(|t| {
                    t.from_account.as_ref() == Some(account) || t.to_account.as_ref() == Some(account)
                })
                .cloned()
                .collect())
        })
    }
}
