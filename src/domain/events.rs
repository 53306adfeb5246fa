use super::payout::PayoutRequest;
use super::transaction::Transaction;
use super::wallet::{Balances, WalletId};
use serde::Serialize;

/// Changes published to real-time listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    BalanceChanged {
        wallet_id: WalletId,
        balances: Balances,
    },
    TransactionResolved {
        transaction: Transaction,
    },
    PayoutStateChanged {
        payout: PayoutRequest,
    },
    LedgerDriftDetected {
        wallet_id: WalletId,
        cached: Balances,
        recomputed: Balances,
    },
    /// Audit record of a halted wallet being rebuilt from its log.
    LedgerRepaired {
        wallet_id: WalletId,
        previous: Balances,
        restored: Balances,
        reason: String,
    },
}

impl LedgerEvent {
    pub fn wallet_id(&self) -> &WalletId {
        match self {
            Self::BalanceChanged { wallet_id, .. }
            | Self::LedgerDriftDetected { wallet_id, .. }
            | Self::LedgerRepaired { wallet_id, .. } => wallet_id,
            Self::TransactionResolved { transaction } => &transaction.wallet_id,
            Self::PayoutStateChanged { payout } => &payout.wallet_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BalanceChanged { .. } => "balance_changed",
            Self::TransactionResolved { .. } => "transaction_resolved",
            Self::PayoutStateChanged { .. } => "payout_state_changed",
            Self::LedgerDriftDetected { .. } => "ledger_drift_detected",
            Self::LedgerRepaired { .. } => "ledger_repaired",
        }
    }
}
