use super::money::{Amount, Balance};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a wallet; identical to the owning user's id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(user_id: impl Into<String>) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(LedgerError::Validation("wallet id must not be empty".into()));
        }
        // Stores key a wallet's rows by `<id>\0`, so ids must not carry control characters.
        if user_id.chars().any(char::is_control) {
            return Err(LedgerError::Validation(format!(
                "wallet id {user_id:?} must not contain control characters"
            )));
        }
        Ok(Self(user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    #[default]
    Active,
    /// Cached balances disagreed with the ledger; mutations are refused until repaired.
    Halted,
}

/// The three published balances of a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub available: Balance,
    pub pending: Balance,
    pub lifetime_earned: Balance,
}

impl Balances {
    /// Checks `available >= 0`, `pending >= 0` and `available + pending <= lifetime_earned`.
    pub fn is_consistent(&self) -> bool {
        !self.available.is_negative()
            && !self.pending.is_negative()
            && self.available + self.pending <= self.lifetime_earned
    }
}

impl fmt::Display for Balances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "available={} pending={} lifetime_earned={}",
            self.available, self.pending, self.lifetime_earned
        )
    }
}

/// Verified payout destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    /// Name returned by the verification provider; empty until verified.
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
    pub bank_name: String,
}

impl BankDetails {
    pub fn is_verified(&self) -> bool {
        !self.account_name.trim().is_empty()
    }
}

/// A creator's wallet with its cached balances.
///
/// The balances are a cache of the ledger fold and are only ever changed by
/// the operations below, each of which preserves [`Balances::is_consistent`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub user_id: WalletId,
    pub balances: Balances,
    pub bank_details: Option<BankDetails>,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: WalletId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balances: Balances::default(),
            bank_details: None,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.status == WalletStatus::Halted
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Adds a net sale credit to available funds and lifetime earnings.
    pub fn credit(&mut self, net: Amount) {
        self.balances.available += net;
        self.balances.lifetime_earned += net;
        self.touch();
    }

    /// Moves funds from available to pending for an in-flight payout.
    pub fn reserve(&mut self, amount: Amount) -> Result<()> {
        let requested = Balance::from(amount);
        if self.balances.available < requested {
            return Err(LedgerError::InsufficientFunds {
                requested,
                available: self.balances.available,
            });
        }
        self.balances.available -= amount;
        self.balances.pending += amount;
        self.touch();
        Ok(())
    }

    /// Removes settled payout funds from pending; they have left the wallet.
    pub fn settle(&mut self, amount: Amount) -> Result<()> {
        if self.balances.pending < Balance::from(amount) {
            return Err(LedgerError::InvalidState(format!(
                "wallet {} has {} pending, cannot settle {amount}",
                self.user_id, self.balances.pending
            )));
        }
        self.balances.pending -= amount;
        self.touch();
        Ok(())
    }

    /// Returns failed payout funds from pending to available.
    pub fn release(&mut self, amount: Amount) -> Result<()> {
        if self.balances.pending < Balance::from(amount) {
            return Err(LedgerError::InvalidState(format!(
                "wallet {} has {} pending, cannot release {amount}",
                self.user_id, self.balances.pending
            )));
        }
        self.balances.pending -= amount;
        self.balances.available += amount;
        self.touch();
        Ok(())
    }

    pub fn set_bank_details(&mut self, details: BankDetails) {
        self.bank_details = Some(details);
        self.touch();
    }

    /// Replaces the cached balances with a freshly projected set and lifts any halt.
    pub fn restore(&mut self, balances: Balances) {
        self.balances = balances;
        self.status = WalletStatus::Active;
        self.touch();
    }

    pub fn halt(&mut self) {
        self.status = WalletStatus::Halted;
        self.touch();
    }
}
