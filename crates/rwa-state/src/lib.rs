//! # rwa-state — Lifecycle State Machines
//!
//! Pure, synchronous records and the transitions allowed on them. Nothing in
//! this crate performs I/O: services in `rwa-settlement` load a record, run a
//! transition here, and persist the result with an optimistic version check.
//!
//! ## State Machines
//!
//! - **Identity** (`kyc.rs`): `NotSubmitted → Pending → Approved | Rejected`,
//!   plus wallet link events. `is_verified()` is derived from the KYC status
//!   and the wallet link on every read.
//!
//! - **Asset** (`asset.rs`): `Pending → Approved | Rejected`. Approval
//!   installs the final tokenization parameters and the ledger reference in a
//!   single transition. Listing and inventory withdrawal are guarded by the
//!   asset invariants.
//!
//! Rejected records are terminal. A rejected identity or asset is resubmitted
//! as a new record.
//!
//! - **Trade records** (`trade.rs`): the immutable `Transaction` and the
//!   per-holder `PortfolioEntry` aggregate.

pub mod asset;
pub mod error;
pub mod kyc;
pub mod trade;

pub use asset::{
    Asset, AssetTransitionRecord, LedgerRef, Tokenization, TokenizationDraft,
    TokenizationOverrides, VerificationStatus,
};
pub use error::LifecycleError;
pub use kyc::{Identity, KycStatus, KycTransitionRecord};
pub use trade::{PortfolioEntry, TradeSide, Transaction, TransactionStatus};
