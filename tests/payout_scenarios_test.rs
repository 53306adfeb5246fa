mod common;

use common::{harness, wallet};
use rust_decimal_macros::dec;
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::events::LedgerEvent;
use wallet_ledger::domain::money::Balance;
use wallet_ledger::domain::payout::PayoutState;
use wallet_ledger::domain::ports::ProcessorStatus;
use wallet_ledger::domain::transaction::{TransactionStatus, TransactionType};
use wallet_ledger::domain::wallet::Balances;
use wallet_ledger::error::LedgerError;

fn balances(available: rust_decimal::Decimal, pending: rust_decimal::Decimal, lifetime: rust_decimal::Decimal) -> Balances {
    Balances {
        available: Balance(available),
        pending: Balance(pending),
        lifetime_earned: Balance(lifetime),
    }
}

#[tokio::test]
async fn test_sale_then_settled_payout() {
    let h = harness(LedgerConfig::default());
    let alice = h.funded("alice", dec!(1000)).await;
    assert_eq!(
        h.ledger.get_balance(&alice).await.unwrap(),
        balances(dec!(900), dec!(0), dec!(900))
    );

    let id = h.ledger.request_payout(&alice, dec!(900), "key-1").await.unwrap();
    assert_eq!(
        h.ledger.get_balance(&alice).await.unwrap(),
        balances(dec!(0), dec!(900), dec!(900))
    );

    let reference = h.ledger.get_payout(id).await.unwrap().processor_reference.unwrap();
    h.ledger
        .handle_settlement_signal(&reference, ProcessorStatus::Settled)
        .await
        .unwrap();
    assert_eq!(
        h.ledger.get_balance(&alice).await.unwrap(),
        balances(dec!(0), dec!(0), dec!(900))
    );
    assert_eq!(h.ledger.get_payout(id).await.unwrap().state.display_label(), "paid");
    h.ledger.reconcile_wallet(&alice).await.unwrap();
}

#[tokio::test]
async fn test_failed_payout_is_reversed() {
    let h = harness(LedgerConfig::default());
    let alice = h.funded("alice", dec!(1000)).await;

    let id = h.ledger.request_payout(&alice, dec!(900), "key-2").await.unwrap();
    let reference = h.ledger.get_payout(id).await.unwrap().processor_reference.unwrap();
    h.ledger
        .handle_settlement_signal(&reference, ProcessorStatus::Failed)
        .await
        .unwrap();

    assert_eq!(
        h.ledger.get_balance(&alice).await.unwrap(),
        balances(dec!(900), dec!(0), dec!(900))
    );
    let history = h.ledger.get_transaction_history(&alice, 10, 0, None).await.unwrap();
    assert_eq!(history[0].r#type, TransactionType::PayoutReversal);
    assert_eq!(history[0].status, TransactionStatus::Completed);
    assert_eq!(history[1].r#type, TransactionType::PayoutDebit);
    assert_eq!(history[1].status, TransactionStatus::Failed);
    assert_eq!(history[0].linked_transaction(), Some(history[1].id));
    assert_eq!(h.ledger.get_payout(id).await.unwrap().state.display_label(), "returned");
    h.ledger.reconcile_wallet(&alice).await.unwrap();
}

#[tokio::test]
async fn test_payout_below_minimum_never_reaches_ledger() {
    let h = harness(LedgerConfig::default());
    let alice = h.funded("alice", dec!(1000)).await;
    let before = h.ledger.get_transaction_history(&alice, 100, 0, None).await.unwrap();

    let result = h.ledger.request_payout(&alice, dec!(50), "key-3").await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));

    let payout = h.ledger.find_payout(&alice, "key-3").await.unwrap().unwrap();
    assert_eq!(payout.state, PayoutState::Rejected);
    assert_eq!(payout.debit_transaction, None);
    assert_eq!(
        h.ledger.get_transaction_history(&alice, 100, 0, None).await.unwrap(),
        before
    );
    assert_eq!(
        h.ledger.get_balance(&alice).await.unwrap(),
        balances(dec!(900), dec!(0), dec!(900))
    );
}

#[tokio::test]
async fn test_duplicate_callbacks_settle_once() {
    let h = harness(LedgerConfig::default());
    let alice = h.funded("alice", dec!(1000)).await;
    let id = h.ledger.request_payout(&alice, dec!(400), "key-1").await.unwrap();
    let reference = h.ledger.get_payout(id).await.unwrap().processor_reference.unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let ledger = h.ledger.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .handle_settlement_signal(&reference, ProcessorStatus::Settled)
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().state, PayoutState::Settled);
    }

    // A retried request with the same key changes nothing either.
    assert_eq!(
        h.ledger.request_payout(&alice, dec!(400), "key-1").await.unwrap(),
        id
    );
    let debits = h
        .ledger
        .get_transaction_history(&alice, 100, 0, Some(TransactionType::PayoutDebit))
        .await
        .unwrap();
    assert_eq!(debits.len(), 1);
    assert_eq!(h.processor.transfers(), 1);
    assert_eq!(
        h.ledger.get_balance(&alice).await.unwrap(),
        balances(dec!(500), dec!(0), dec!(900))
    );
}

#[tokio::test]
async fn test_payout_events_follow_state_machine() {
    let h = harness(LedgerConfig::default());
    let alice = h.funded("alice", dec!(1000)).await;
    let mut events = h.notifier.subscribe();

    let id = h.ledger.request_payout(&alice, dec!(300), "key-1").await.unwrap();
    let reference = h.ledger.get_payout(id).await.unwrap().processor_reference.unwrap();
    h.ledger
        .handle_settlement_signal(&reference, ProcessorStatus::Settled)
        .await
        .unwrap();

    let mut states = Vec::new();
    let mut resolved = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            LedgerEvent::PayoutStateChanged { payout } => states.push(payout.state),
            LedgerEvent::TransactionResolved { transaction } => {
                assert_eq!(transaction.status, TransactionStatus::Completed);
                resolved += 1;
            }
            _ => {}
        }
    }
    assert_eq!(
        states,
        vec![
            PayoutState::Validating,
            PayoutState::Debited,
            PayoutState::Submitted,
            PayoutState::Settled
        ]
    );
    assert_eq!(resolved, 1);
}

#[tokio::test]
async fn test_unknown_wallet_and_reference() {
    let h = harness(LedgerConfig::default());
    assert!(matches!(
        h.ledger.request_payout(&wallet("ghost"), dec!(100), "k").await,
        Err(LedgerError::WalletNotFound(_))
    ));
    assert!(matches!(
        h.ledger
            .handle_settlement_signal("PRC-404", ProcessorStatus::Settled)
            .await,
        Err(LedgerError::NotFound(_))
    ));
}
