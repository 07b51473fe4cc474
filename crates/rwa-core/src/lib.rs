//! # rwa-core — Foundational Types for the RWA Stack
//!
//! This crate defines the primitives shared by every other crate in the
//! workspace: identifier newtypes, UTC timestamps, integer money amounts,
//! the asset category union, canonical JSON bytes for request signing, and
//! the error taxonomy returned to callers of the settlement core.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `UserId`, `AssetId`,
//!    `LedgerAccountId`, `TokenId`, `LedgerTxRef`. No bare strings or UUIDs
//!    cross a crate boundary.
//!
//! 2. **Integer money.** `Amount` counts minor currency units. Token
//!    quantities are whole fractions (`u64`); tokens are minted with zero
//!    decimals.
//!
//! 3. **One error taxonomy.** `RwaError` distinguishes validation, not-found,
//!    conflict, invalid transition, ledger and reconciliation failures so
//!    callers can react without string matching.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `rwa-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod amount;
pub mod canonical;
pub mod category;
pub mod error;
pub mod identity;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use amount::Amount;
pub use canonical::CanonicalBytes;
pub use category::AssetCategory;
pub use error::{
    CanonicalizationError, ConflictReason, LedgerFailure, LedgerFailureKind, RwaError,
};
pub use identity::{AssetId, LedgerAccountId, LedgerTxRef, TokenId, TransactionId, UserId};
pub use temporal::Timestamp;
