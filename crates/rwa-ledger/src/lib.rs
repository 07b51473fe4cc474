//! # rwa-ledger — External Ledger Client Adapter
//!
//! Typed access to the distributed ledger that holds the asset tokens:
//! fungible token issuance, token transfers, holder-signed association,
//! transaction status by reference, and account history.
//!
//! ## Architecture
//!
//! The settlement core talks to the ledger only through the [`LedgerClient`]
//! trait. The client is constructed once at startup and passed in; there is
//! no process-wide ledger singleton.
//!
//! - [`HttpLedgerClient`] submits signed requests to a ledger gateway over
//!   HTTP (`reqwest`), with exponential backoff on reads and
//!   connection-only retry on submissions.
//! - [`InMemoryLedger`] implements the same rules in memory, with failure
//!   injection, for tests.
//!
//! ## Idempotency
//!
//! Every submission carries a client-generated [`LedgerTxRef`](rwa_core::LedgerTxRef).
//! A submission whose outcome is unknown (timeout after delivery) must be
//! resolved through `get_transaction_status` before it is ever resubmitted.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod keys;
pub mod mock;
pub(crate) mod retry;
pub mod types;

pub use client::LedgerClient;
pub use config::{ConfigError, LedgerConfig, LedgerNetwork};
pub use error::LedgerError;
pub use http::HttpLedgerClient;
pub use keys::{KeyError, PublicKey, Signature, SignerKey};
pub use mock::{InMemoryLedger, InjectedFailure, LedgerOp};
pub use types::{
    AssociateRequest, CreateTokenRequest, LedgerReceipt, LedgerTransaction, LedgerTxKind,
    TokenIssuance, TransferRequest, TxStatus,
};
