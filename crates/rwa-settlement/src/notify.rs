//! # Notification Dispatch
//!
//! Terminal events from verification, tokenization and settlement are
//! handed to a [`NotificationDispatcher`] after the triggering write has
//! committed. Dispatch is synchronous and must not block; failures are
//! logged and dropped, never propagated to the operation that produced the
//! event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use rwa_core::{AssetId, LedgerTxRef, Timestamp, TokenId, TransactionId, UserId};
use rwa_state::TradeSide;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    /// KYC was approved.
    KycApproved,
    /// KYC was rejected.
    KycRejected {
        /// Reviewer's reason.
        reason: String,
    },
    /// An asset was approved and tokenized.
    AssetApproved {
        /// The asset.
        asset_id: AssetId,
        /// Its ledger token.
        token_id: TokenId,
    },
    /// An asset was rejected.
    AssetRejected {
        /// The asset.
        asset_id: AssetId,
        /// Reviewer's reason.
        reason: String,
    },
    /// A trade was recorded.
    TradeCompleted {
        /// The transaction record.
        transaction_id: TransactionId,
        /// The asset traded.
        asset_id: AssetId,
        /// Buy or sell.
        side: TradeSide,
        /// Fractions traded.
        quantity: u64,
        /// Ledger reference, for buys.
        ledger_tx_ref: Option<LedgerTxRef>,
    },
}

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Recipient.
    pub user_id: UserId,
    /// Event payload.
    pub kind: NotificationKind,
    /// When the event was produced.
    pub created_at: Timestamp,
}

impl NotificationEvent {
    /// An event stamped now.
    pub fn new(user_id: UserId, kind: NotificationKind) -> Self {
        Self {
            user_id,
            kind,
            created_at: Timestamp::now(),
        }
    }
}

/// Dispatch failed. Never surfaced to callers of the core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Best-effort delivery of notification events.
pub trait NotificationDispatcher: Send + Sync {
    /// Hand off an event. Must not block.
    fn dispatch(&self, event: NotificationEvent) -> Result<(), DispatchError>;
}

/// Dispatch `event`, logging and discarding any failure.
pub(crate) fn emit(dispatcher: &dyn NotificationDispatcher, event: NotificationEvent) {
    let user_id = event.user_id;
    if let Err(e) = dispatcher.dispatch(event) {
        tracing::warn!(user_id = %user_id, error = %e, "notification dropped");
    }
}

/// Forwards events into an unbounded Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationDispatcher for ChannelDispatcher {
    fn dispatch(&self, event: NotificationEvent) -> Result<(), DispatchError> {
        self.tx
            .send(event)
            .map_err(|_| DispatchError("receiver dropped".into()))
    }
}

/// Writes events to the tracing log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, event: NotificationEvent) -> Result<(), DispatchError> {
        tracing::info!(user_id = %event.user_id, kind = ?event.kind, "notification");
        Ok(())
    }
}
