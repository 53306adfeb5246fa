mod common;

use common::harness;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::fee::{FeeRate, compute_net};
use wallet_ledger::domain::money::Balance;
use wallet_ledger::domain::payout::PayoutState;
use wallet_ledger::domain::ports::ProcessorStatus;
use wallet_ledger::error::LedgerError;

fn random_amount(rng: &mut StdRng, max_minor: i64) -> Decimal {
    Decimal::new(rng.gen_range(1..=max_minor), 2)
}

#[tokio::test]
async fn test_random_operation_sequences_keep_invariants() {
    for seed in 0..10u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let h = harness(LedgerConfig::default());
        let alice = h.funded("alice", Decimal::new(rng.gen_range(100_00..5_000_00), 2)).await;
        let mut submitted = Vec::new();

        for step in 0..60 {
            match rng.gen_range(0..4) {
                0 => {
                    h.ledger
                        .credit_sale(&alice, random_amount(&mut rng, 2_000_00), &format!("sale-{seed}-{step}"))
                        .await
                        .unwrap();
                }
                1 => match h
                    .ledger
                    .request_payout(&alice, random_amount(&mut rng, 3_000_00), &format!("key-{step}"))
                    .await
                {
                    Ok(id) => submitted.push(id),
                    Err(LedgerError::Validation(_)) | Err(LedgerError::InsufficientFunds { .. }) => {}
                    Err(e) => panic!("seed {seed} step {step}: unexpected {e}"),
                },
                _ if !submitted.is_empty() => {
                    let id = submitted.swap_remove(rng.gen_range(0..submitted.len()));
                    let reference = h.ledger.get_payout(id).await.unwrap().processor_reference.unwrap();
                    let status = if rng.gen_bool(0.5) {
                        ProcessorStatus::Settled
                    } else {
                        ProcessorStatus::Failed
                    };
                    let payout = h.ledger.handle_settlement_signal(&reference, status).await.unwrap();
                    assert!(matches!(payout.state, PayoutState::Settled | PayoutState::Reversed));
                }
                _ => {}
            }

            let balances = h.ledger.get_balance(&alice).await.unwrap();
            assert!(balances.is_consistent(), "seed {seed} step {step}: {balances}");
            // The cache always folds back out of the log.
            assert_eq!(h.ledger.reconcile_wallet(&alice).await.unwrap(), balances);
        }
    }
}

#[test]
fn test_fee_split_is_exact_for_random_amounts() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..1_000 {
        let gross = Balance(Decimal::new(rng.gen_range(0..10_000_000), 2));
        let rate = FeeRate::from_permille(rng.gen_range(0..=1000)).unwrap();
        let split = compute_net(gross, rate).unwrap();
        assert_eq!(split.net + split.fee, gross);
        assert!(!split.net.is_negative() && !split.fee.is_negative());
        assert!(split.net.0.scale() <= 2);
    }
}
