//! Integration tests: buys, sells, association, reconciliation and audit.

mod common;

use common::Harness;
use proptest::prelude::*;
use rwa_core::{Amount, ConflictReason, LedgerAccountId, LedgerFailureKind, RwaError};
use rwa_ledger::{InjectedFailure, LedgerClient, LedgerOp, TransferRequest};
use rwa_settlement::{
    Association, BuyOrder, NotificationKind, ReconciliationKind, SellOrder, SettlementStore,
};
use rwa_state::{TradeSide, TransactionStatus};

fn assert_ledger_kind(err: &RwaError, expected: fn(&LedgerFailureKind) -> bool) {
    match err {
        RwaError::Ledger(f) => assert!(expected(&f.kind), "unexpected ledger failure {f}"),
        other => panic!("expected a ledger failure, got {other}"),
    }
}

// -- buys -------------------------------------------------------------------

#[tokio::test]
async fn buy_settles_on_ledger_and_commits() {
    let mut h = Harness::new();
    let asset = h.approved_asset(1_000, 200, 2_500).await;
    let buyer = h.ready_buyer(&asset).await;
    h.drain_events();

    let tx = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 10))
        .await
        .unwrap();

    assert_eq!(tx.side, TradeSide::Buy);
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.total_amount, Amount::from_minor(25_000));
    assert_eq!(tx.account, buyer.account);
    assert!(tx.external_ledger_tx_ref.is_some());

    let token_id = asset.token_id().unwrap();
    assert_eq!(h.ledger.balance(token_id, &buyer.account), 10);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 790);

    let holdings = h.core.portfolio().holdings(buyer.user_id).await.unwrap();
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].entry.quantity, 10);
    assert_eq!(holdings[0].ownership_bps, 100);
    assert_eq!(holdings[0].market_value, Amount::from_minor(25_000));
    assert_eq!(holdings[0].symbol, "HVA");

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        NotificationKind::TradeCompleted { transaction_id, .. } if *transaction_id == tx.id
    )));
}

#[tokio::test]
async fn limit_price_is_recorded() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 2_500).await;
    let buyer = h.ready_buyer(&asset).await;
    let tx = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 4).with_limit_price(Amount::from_minor(2_000)))
        .await
        .unwrap();
    assert_eq!(tx.price_per_token, Amount::from_minor(2_000));
    assert_eq!(tx.total_amount, Amount::from_minor(8_000));
}

#[tokio::test]
async fn zero_quantity_is_invalid() {
    let h = Harness::new();
    let asset = h.approved_asset(100, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RwaError::Validation(_)));
}

#[tokio::test]
async fn concurrent_buys_never_oversell() {
    let h = Harness::new();
    let asset = h.approved_asset(150, 0, 100).await;
    let first = h.ready_buyer(&asset).await;
    let second = h.ready_buyer(&asset).await;

    let spawn_buy = |user_id| {
        let settlement = h.core.settlement().clone();
        let order = BuyOrder::market(user_id, asset.id, 100);
        tokio::spawn(async move { settlement.buy(&order).await })
    };
    let a = spawn_buy(first.user_id);
    let b = spawn_buy(second.user_id);
    let results = [a.await.unwrap(), b.await.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(
        err,
        RwaError::Conflict(ConflictReason::InsufficientAvailability {
            requested: 100,
            available: 50
        })
    );
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 50);
    assert_eq!(h.ledger.transfer_count(), 1);
}

#[tokio::test]
async fn unverified_buyer_leaves_no_trace() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let user = h.registered_user().await;

    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(user.user_id, asset.id, 5))
        .await
        .unwrap_err();
    assert_eq!(err, RwaError::Conflict(ConflictReason::NotVerified));
    assert_eq!(h.ledger.transfer_count(), 0);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 1_000);
    assert!(h.core.portfolio().entries(user.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn approved_buyer_without_wallet_is_refused() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.verified_buyer().await;
    h.core.verification().unlink_wallet(buyer.user_id).await.unwrap();

    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 5))
        .await
        .unwrap_err();
    assert_eq!(err, RwaError::Conflict(ConflictReason::WalletNotLinked));
}

#[tokio::test]
async fn unlisted_or_pending_assets_are_refused() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let settlement = h.core.settlement();

    h.core.verification().delist_asset(asset.id).await.unwrap();
    let err = settlement
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 5))
        .await
        .unwrap_err();
    assert_eq!(err, RwaError::Conflict(ConflictReason::NotListed));

    let pending = h.pending_asset(100, 0, 100).await;
    let err = settlement
        .buy(&BuyOrder::market(buyer.user_id, pending.id, 5))
        .await
        .unwrap_err();
    assert_eq!(err, RwaError::Conflict(ConflictReason::NotApproved));
    assert_eq!(h.ledger.transfer_count(), 0);
}

#[tokio::test]
async fn overbuy_is_refused_before_transfer() {
    let h = Harness::new();
    let asset = h.approved_asset(100, 40, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 61))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RwaError::Conflict(ConflictReason::InsufficientAvailability {
            requested: 61,
            available: 60
        })
    );
    assert_eq!(h.ledger.transfer_count(), 0);
}

#[tokio::test]
async fn missing_association_is_reported_with_token() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.verified_buyer().await;

    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 5))
        .await
        .unwrap_err();
    let token_id = asset.token_id().unwrap().clone();
    let account = buyer.account.clone();
    match err {
        RwaError::Ledger(f) => assert_eq!(
            f.kind,
            LedgerFailureKind::AssociationRequired { token_id, account }
        ),
        other => panic!("expected AssociationRequired, got {other}"),
    }
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 1_000);
    assert!(h.core.portfolio().entries(buyer.user_id).await.unwrap().is_empty());

    // Associating fixes it.
    h.associate(&buyer, &asset).await;
    h.core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 5))
        .await
        .unwrap();
}

#[tokio::test]
async fn transfer_timeout_after_apply_is_committed() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    h.ledger
        .fail_next(LedgerOp::Transfer, InjectedFailure::TimeoutAfterApply);

    let tx = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 7))
        .await
        .unwrap();
    assert_eq!(tx.quantity, 7);
    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 993);
}

#[tokio::test]
async fn transfer_lost_before_apply_is_retryable() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    h.ledger
        .fail_next(LedgerOp::Transfer, InjectedFailure::TimeoutBeforeApply);

    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 7))
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert_eq!(h.ledger.transfer_count(), 0);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 1_000);
    assert!(h.core.reconciler().pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn unresolved_transfer_is_queued_for_confirmation() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    h.ledger
        .fail_next(LedgerOp::Transfer, InjectedFailure::TimeoutAfterApply);
    for _ in 0..3 {
        h.ledger
            .fail_next(LedgerOp::Status, InjectedFailure::Unreachable);
    }

    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 3))
        .await
        .unwrap_err();
    assert_ledger_kind(&err, |k| *k == LedgerFailureKind::Unconfirmed);
    let pending = h.core.reconciler().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(matches!(pending[0].kind, ReconciliationKind::ConfirmTransfer { .. }));

    let report = h.core.reconciler().run_once().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 997);
    assert_eq!(h.ledger.transfer_count(), 1);
}

#[tokio::test]
async fn rejected_transfer_is_not_committed() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    h.ledger.fail_next(
        LedgerOp::Transfer,
        InjectedFailure::Reject("ACCOUNT_FROZEN_FOR_TOKEN".into()),
    );

    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 3))
        .await
        .unwrap_err();
    assert_ledger_kind(&err, |k| {
        matches!(k, LedgerFailureKind::Rejected { code } if code == "ACCOUNT_FROZEN_FOR_TOKEN")
    });
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 1_000);
}

#[tokio::test]
async fn commit_failure_is_reconciled_without_second_transfer() {
    let mut h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    h.drain_events();
    h.store.fail_commits(1);

    let err = h
        .core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 10))
        .await
        .unwrap_err();
    let RwaError::ReconciliationRequired { ledger_tx_ref, .. } = err else {
        panic!("expected ReconciliationRequired, got {err}");
    };
    let token_id = asset.token_id().unwrap();
    assert_eq!(h.ledger.balance(token_id, &buyer.account), 10);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 1_000);
    assert!(h.drain_events().is_empty());

    let audit = h.core.reconciler().audit_account(&buyer.account).await.unwrap();
    assert_eq!(audit.unrecorded_transfers.len(), 1);
    assert_eq!(audit.unrecorded_transfers[0].tx_ref, ledger_tx_ref);

    let report = h.core.reconciler().run_once().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 990);

    let holdings = h.core.portfolio().holdings(buyer.user_id).await.unwrap();
    assert_eq!(holdings[0].entry.quantity, 10);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e.kind, NotificationKind::TradeCompleted { .. })));

    let audit = h.core.reconciler().audit_account(&buyer.account).await.unwrap();
    assert!(audit.is_consistent());

    // A second pass finds nothing to do.
    let report = h.core.reconciler().run_once().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn failing_reconciliation_stays_queued() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    h.store.fail_commits(2);

    h.core
        .settlement()
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 1))
        .await
        .unwrap_err();
    let report = h.core.reconciler().run_once().await.unwrap();
    assert_eq!(report.still_pending, 1);
    let pending = h.core.reconciler().pending().await.unwrap();
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.is_some());

    let report = h.core.reconciler().run_once().await.unwrap();
    assert_eq!(report.resolved, 1);
}

// -- idempotency ------------------------------------------------------------

#[tokio::test]
async fn idempotency_key_replays_original_trade() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let order = BuyOrder::market(buyer.user_id, asset.id, 10).with_idempotency_key("order-7f3a");

    let first = h.core.settlement().buy(&order).await.unwrap();
    let replay = h.core.settlement().buy(&order).await.unwrap();
    assert_eq!(first.id, replay.id);
    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 990);

    let different = BuyOrder::market(buyer.user_id, asset.id, 11).with_idempotency_key("order-7f3a");
    let err = h.core.settlement().buy(&different).await.unwrap_err();
    assert_eq!(
        err,
        RwaError::Conflict(ConflictReason::IdempotencyKeyReused("order-7f3a".into()))
    );
}

#[tokio::test]
async fn keyed_retry_after_commit_failure_reuses_settled_transfer() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let order = BuyOrder::market(buyer.user_id, asset.id, 10).with_idempotency_key("order-k1");
    h.store.fail_commits(1);

    let err = h.core.settlement().buy(&order).await.unwrap_err();
    let RwaError::ReconciliationRequired { ledger_tx_ref, .. } = err else {
        panic!("expected ReconciliationRequired, got {err}");
    };

    // The retry commits the transfer that already settled instead of sending another.
    let tx = h.core.settlement().buy(&order).await.unwrap();
    assert_eq!(tx.external_ledger_tx_ref.as_ref(), Some(&ledger_tx_ref));
    assert_eq!(h.ledger.transfer_count(), 1);
    assert!(h
        .store
        .reserved_order(buyer.user_id, "order-k1")
        .await
        .unwrap()
        .is_none());

    let report = h.core.reconciler().run_once().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert!(h.core.reconciler().pending().await.unwrap().is_empty());

    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.ledger.balance(asset.token_id().unwrap(), &buyer.account), 10);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 990);
    assert_eq!(h.store.transactions_for_user(buyer.user_id).await.unwrap().len(), 1);
    let audit = h.core.reconciler().audit_account(&buyer.account).await.unwrap();
    assert!(audit.is_consistent());
}

#[tokio::test]
async fn keyed_retry_after_lost_transfer_resubmits_same_reference() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let order = BuyOrder::market(buyer.user_id, asset.id, 7).with_idempotency_key("order-lost");
    h.ledger
        .fail_next(LedgerOp::Transfer, InjectedFailure::TimeoutBeforeApply);

    let err = h.core.settlement().buy(&order).await.unwrap_err();
    assert!(err.is_retryable(), "{err}");
    let reserved = h
        .store
        .reserved_order(buyer.user_id, "order-lost")
        .await
        .unwrap()
        .unwrap();

    let tx = h.core.settlement().buy(&order).await.unwrap();
    assert_eq!(tx.id, reserved.transaction.id);
    assert_eq!(tx.external_ledger_tx_ref, reserved.transaction.external_ledger_tx_ref);
    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 993);
}

#[tokio::test]
async fn keyed_retry_commits_late_landing_transfer() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let order = BuyOrder::market(buyer.user_id, asset.id, 7).with_idempotency_key("order-late");
    h.ledger
        .fail_next(LedgerOp::Transfer, InjectedFailure::TimeoutBeforeApply);

    let err = h.core.settlement().buy(&order).await.unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert_eq!(h.ledger.transfer_count(), 0);

    // The first submission reaches consensus after the caller gave up on it.
    let reserved = h
        .store
        .reserved_order(buyer.user_id, "order-late")
        .await
        .unwrap()
        .unwrap();
    let late = TransferRequest {
        tx_ref: reserved.transaction.external_ledger_tx_ref.clone().unwrap(),
        token_id: asset.token_id().unwrap().clone(),
        from_account: h.ledger.treasury_account().clone(),
        to_account: buyer.account.clone(),
        amount: 7,
    };
    h.ledger.transfer_tokens(&late, &h.treasury_key).await.unwrap();
    assert_eq!(h.ledger.transfer_count(), 1);

    let tx = h.core.settlement().buy(&order).await.unwrap();
    assert_eq!(tx.id, reserved.transaction.id);
    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.ledger.balance(asset.token_id().unwrap(), &buyer.account), 7);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 993);
}

#[tokio::test]
async fn refused_keyed_transfer_releases_its_key() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.verified_buyer().await;
    let order = BuyOrder::market(buyer.user_id, asset.id, 5).with_idempotency_key("order-assoc");

    let err = h.core.settlement().buy(&order).await.unwrap_err();
    assert_ledger_kind(&err, |k| matches!(k, LedgerFailureKind::AssociationRequired { .. }));
    assert!(h
        .store
        .reserved_order(buyer.user_id, "order-assoc")
        .await
        .unwrap()
        .is_none());

    h.associate(&buyer, &asset).await;
    let tx = h.core.settlement().buy(&order).await.unwrap();
    assert_eq!(tx.quantity, 5);
    assert_eq!(h.ledger.transfer_count(), 1);
}

#[tokio::test]
async fn reserved_key_is_refused_for_different_order() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    h.ledger
        .fail_next(LedgerOp::Transfer, InjectedFailure::TimeoutBeforeApply);
    let order = BuyOrder::market(buyer.user_id, asset.id, 4).with_idempotency_key("order-4");
    h.core.settlement().buy(&order).await.unwrap_err();

    let different = BuyOrder::market(buyer.user_id, asset.id, 5).with_idempotency_key("order-4");
    let err = h.core.settlement().buy(&different).await.unwrap_err();
    assert_eq!(
        err,
        RwaError::Conflict(ConflictReason::IdempotencyKeyReused("order-4".into()))
    );
    assert_eq!(h.ledger.transfer_count(), 0);
}

// -- sells ------------------------------------------------------------------

#[tokio::test]
async fn sell_is_recorded_off_ledger() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let settlement = h.core.settlement();
    settlement
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 10))
        .await
        .unwrap();

    let tx = settlement
        .sell(&SellOrder::new(buyer.user_id, asset.id, 4, Amount::from_minor(150)))
        .await
        .unwrap();
    assert_eq!(tx.side, TradeSide::Sell);
    assert_eq!(tx.status, TransactionStatus::RecordedOffLedger);
    assert!(tx.external_ledger_tx_ref.is_none());
    assert_eq!(tx.total_amount, Amount::from_minor(600));

    // No ledger leg and no change to inventory.
    assert_eq!(h.ledger.transfer_count(), 1);
    assert_eq!(h.ledger.balance(asset.token_id().unwrap(), &buyer.account), 10);
    assert_eq!(h.asset(asset.id).await.tokenization.available_tokens, 990);

    let entries = h.core.portfolio().entries(buyer.user_id).await.unwrap();
    assert_eq!(entries[0].quantity, 6);

    let err = settlement
        .sell(&SellOrder::new(buyer.user_id, asset.id, 7, Amount::from_minor(150)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RwaError::Conflict(ConflictReason::InsufficientHoldings {
            requested: 7,
            held: 6
        })
    );
}

#[tokio::test]
async fn sell_without_position_is_refused() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let seller = h.verified_buyer().await;
    let err = h
        .core
        .settlement()
        .sell(&SellOrder::new(seller.user_id, asset.id, 1, Amount::from_minor(100)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RwaError::Conflict(ConflictReason::InsufficientHoldings {
            requested: 1,
            held: 0
        })
    );
    assert!(h.core.reconciler().pending().await.unwrap().is_empty());
}

// -- association ------------------------------------------------------------

#[tokio::test]
async fn association_is_idempotent() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.verified_buyer().await;
    let settlement = h.core.settlement();
    let token_id = asset.token_id().unwrap();

    let first = settlement
        .associate_token(&buyer.account, token_id, &buyer.key)
        .await
        .unwrap();
    assert!(matches!(first, Association::Associated(_)));
    let second = settlement
        .associate_token(&buyer.account, token_id, &buyer.key)
        .await
        .unwrap();
    assert_eq!(second, Association::AlreadyAssociated);
}

#[tokio::test]
async fn treasury_association_is_refused() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let err = h
        .core
        .settlement()
        .associate_token(
            &LedgerAccountId::new("0.0.2").unwrap(),
            asset.token_id().unwrap(),
            &rwa_ledger::SignerKey::generate(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RwaError::Validation(_)));
}

#[tokio::test]
async fn association_must_be_signed_by_holder() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.verified_buyer().await;
    let err = h
        .core
        .settlement()
        .associate_token(
            &buyer.account,
            asset.token_id().unwrap(),
            &rwa_ledger::SignerKey::generate(),
        )
        .await
        .unwrap_err();
    assert_ledger_kind(&err, |k| {
        matches!(k, LedgerFailureKind::Rejected { code } if code == "INVALID_SIGNATURE")
    });
}

// -- portfolio --------------------------------------------------------------

#[tokio::test]
async fn prune_only_removes_empty_positions() {
    let h = Harness::new();
    let asset = h.approved_asset(1_000, 0, 100).await;
    let buyer = h.ready_buyer(&asset).await;
    let settlement = h.core.settlement();
    let portfolio = h.core.portfolio();
    settlement
        .buy(&BuyOrder::market(buyer.user_id, asset.id, 3))
        .await
        .unwrap();

    let err = portfolio.prune(buyer.user_id, asset.id).await.unwrap_err();
    assert!(matches!(err, RwaError::Validation(_)));

    settlement
        .sell(&SellOrder::new(buyer.user_id, asset.id, 3, Amount::from_minor(100)))
        .await
        .unwrap();
    assert!(portfolio.holdings(buyer.user_id).await.unwrap().is_empty());
    assert_eq!(portfolio.entries(buyer.user_id).await.unwrap().len(), 1);

    portfolio.prune(buyer.user_id, asset.id).await.unwrap();
    assert!(portfolio.entries(buyer.user_id).await.unwrap().is_empty());
    let err = portfolio.prune(buyer.user_id, asset.id).await.unwrap_err();
    assert!(matches!(err, RwaError::NotFound { .. }));
}

#[tokio::test]
async fn rebuild_matches_committed_entries() {
    let h = Harness::new();
    let a = h.approved_asset(1_000, 0, 100).await;
    let b = h.approved_asset(500, 0, 300).await;
    let buyer = h.verified_buyer().await;
    h.associate(&buyer, &a).await;
    h.associate(&buyer, &b).await;
    let settlement = h.core.settlement();
    for (asset, qty) in [(&a, 5), (&b, 2), (&a, 1)] {
        settlement
            .buy(&BuyOrder::market(buyer.user_id, asset.id, qty))
            .await
            .unwrap();
    }
    settlement
        .sell(&SellOrder::new(buyer.user_id, a.id, 2, Amount::from_minor(100)))
        .await
        .unwrap();

    let mut committed = h.core.portfolio().entries(buyer.user_id).await.unwrap();
    let mut rebuilt = h.core.portfolio().rebuild(buyer.user_id).await.unwrap();
    committed.sort_by_key(|e| e.asset_id.0);
    rebuilt.sort_by_key(|e| e.asset_id.0);
    let quantities = |v: &[rwa_state::PortfolioEntry]| {
        v.iter().map(|e| (e.asset_id, e.quantity)).collect::<Vec<_>>()
    };
    assert_eq!(quantities(&committed), quantities(&rebuilt));

    let total = h.core.portfolio().total_value(buyer.user_id).await.unwrap();
    assert_eq!(total, Amount::from_minor(4 * 100 + 2 * 300));
}

// -- invariants -------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever sequence of buys is attempted, sold inventory equals the
    /// sum of holdings, equals what left the treasury on the ledger.
    #[test]
    fn buys_conserve_supply(
        supply in 1u64..200,
        reserved_pct in 0u64..50,
        orders in prop::collection::vec((0usize..3, 1u64..60), 1..12),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let h = Harness::new();
            let reserved = supply * reserved_pct / 100;
            let asset = h.approved_asset(supply, reserved, 100).await;
            let buyers = [
                h.ready_buyer(&asset).await,
                h.ready_buyer(&asset).await,
                h.ready_buyer(&asset).await,
            ];

            for (who, qty) in orders {
                let result = h
                    .core
                    .settlement()
                    .buy(&BuyOrder::market(buyers[who].user_id, asset.id, qty))
                    .await;
                if let Err(e) = result {
                    assert!(matches!(
                        e,
                        RwaError::Conflict(ConflictReason::InsufficientAvailability { .. })
                    ));
                }
            }

            let current = h.asset(asset.id).await;
            current.check_invariants().unwrap();
            let token_id = current.token_id().unwrap();
            let mut held = 0;
            for buyer in &buyers {
                let on_ledger = h.ledger.balance(token_id, &buyer.account);
                let entries = h.core.portfolio().entries(buyer.user_id).await.unwrap();
                let local: u64 = entries.iter().map(|e| e.quantity).sum();
                assert_eq!(on_ledger, local);
                held += local;
            }
            assert_eq!(held + current.tokenization.available_tokens, supply - reserved);
            let treasury = h.ledger.balance(token_id, &current.ledger_ref.as_ref().unwrap().treasury_account_id);
            assert_eq!(treasury, supply - held);
        });
    }
}
