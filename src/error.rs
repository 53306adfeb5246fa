use crate::domain::money::Balance;
use crate::domain::wallet::{Balances, WalletId};
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the settlement adapter.
#[derive(Error, Debug, Diagnostic)]
pub enum AdapterError {
    #[error("Bank account verification failed: {0}")]
    #[diagnostic(code(wallet_ledger::adapter::verification))]
    Verification(String),

    #[error("Payout submission failed: {0}")]
    #[diagnostic(code(wallet_ledger::adapter::submission))]
    Submission(String),

    #[error("Status lookup failed: {0}")]
    #[diagnostic(code(wallet_ledger::adapter::status))]
    Status(String),

    #[error("Settlement provider did not answer within {0:?}")]
    #[diagnostic(code(wallet_ledger::adapter::timeout))]
    Timeout(Duration),
}

#[derive(Error, Debug, Diagnostic)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(wallet_ledger::validation))]
    Validation(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    #[diagnostic(code(wallet_ledger::insufficient_funds))]
    InsufficientFunds {
        requested: Balance,
        available: Balance,
    },

    #[error("Invalid state: {0}")]
    #[diagnostic(code(wallet_ledger::invalid_state))]
    InvalidState(String),

    #[error("Wallet {0} not found")]
    #[diagnostic(code(wallet_ledger::not_found))]
    WalletNotFound(WalletId),

    #[error("{0} not found")]
    #[diagnostic(code(wallet_ledger::not_found))]
    NotFound(String),

    #[error("Wallet {0} is busy, retry the operation")]
    #[diagnostic(code(wallet_ledger::concurrency_conflict))]
    ConcurrencyConflict(WalletId),

    #[error("Ledger drift on wallet {wallet_id}: cached [{cached}], ledger [{recomputed}]")]
    #[diagnostic(
        code(wallet_ledger::ledger_drift),
        help("the wallet is halted until it is repaired from its transaction log")
    )]
    LedgerDrift {
        wallet_id: WalletId,
        cached: Balances,
        recomputed: Balances,
    },

    #[error("Wallet {0} is halted pending reconciliation")]
    #[diagnostic(code(wallet_ledger::wallet_halted))]
    WalletHalted(WalletId),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(wallet_ledger::config))]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    #[diagnostic(code(wallet_ledger::storage))]
    Storage(String),
}

impl LedgerError {
    /// True when the operation was refused before it changed any state.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InsufficientFunds { .. }
                | Self::InvalidState(_)
                | Self::WalletNotFound(_)
                | Self::NotFound(_)
                | Self::WalletHalted(_)
                | Self::Adapter(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
