//! Folds a wallet's ledger into its published balances.

use crate::domain::money::Balance;
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::domain::wallet::{Balances, Wallet};
use crate::error::{LedgerError, Result};

/// Recomputes balances from the full log of one wallet.
///
/// - `lifetime_earned`: completed sale credits minus completed fee debits.
/// - `pending`: payout debits still pending.
/// - `available`: lifetime earned, minus every payout debit whatever its
///   status, plus completed reversals.
pub fn project(entries: &[Transaction]) -> Result<Balances> {
    let mut balances = Balances::default();
    let mut paid_out = Balance::ZERO;
    let mut reversed = Balance::ZERO;
    let mut last_id = None;

    for tx in entries {
        if last_id.is_some_and(|last| tx.id <= last) {
            return Err(LedgerError::Storage(format!(
                "ledger for wallet {} is out of order at entry {}",
                tx.wallet_id, tx.id
            )));
        }
        last_id = Some(tx.id);

        let completed = tx.status == TransactionStatus::Completed;
        match tx.r#type {
            TransactionType::SaleCredit if completed => balances.lifetime_earned += tx.amount,
            TransactionType::FeeDebit if completed => balances.lifetime_earned -= tx.amount,
            TransactionType::PayoutDebit => {
                paid_out += tx.amount;
                if tx.status == TransactionStatus::Pending {
                    balances.pending += tx.amount;
                }
            }
            TransactionType::PayoutReversal if completed => reversed += tx.amount,
            _ => {}
        }
    }

    balances.available = balances.lifetime_earned - paid_out + reversed;
    Ok(balances)
}

/// Compares the wallet's cached balances with its ledger.
pub fn check(wallet: &Wallet, entries: &[Transaction]) -> Result<Balances> {
    let recomputed = project(entries)?;
    if recomputed != wallet.balances {
        return Err(LedgerError::LedgerDrift {
            wallet_id: wallet.user_id.clone(),
            cached: wallet.balances,
            recomputed,
        });
    }
    Ok(recomputed)
}
