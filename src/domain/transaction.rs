use super::money::Amount;
use super::wallet::WalletId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata key linking a reversal to the payout debit it returns.
pub const META_LINKED_TRANSACTION: &str = "linked_transaction";
/// Metadata key linking a payout entry to its payout request.
pub const META_PAYOUT_REQUEST: &str = "payout_request";
/// Metadata key carrying the caller's reference for a sale.
pub const META_SOURCE_REFERENCE: &str = "source_reference";

/// Ledger sequence number; strictly increasing in append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    SaleCredit,
    FeeDebit,
    PayoutDebit,
    PayoutReversal,
}

impl TransactionType {
    pub fn is_credit(&self) -> bool {
        matches!(self, Self::SaleCredit | Self::PayoutReversal)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SaleCredit => "sale-credit",
            Self::FeeDebit => "fee-debit",
            Self::PayoutDebit => "payout-debit",
            Self::PayoutReversal => "payout-reversal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An entry in the append-only ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub amount: Amount,
    pub r#type: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub reference: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn linked_transaction(&self) -> Option<TransactionId> {
        self.metadata
            .get(META_LINKED_TRANSACTION)
            .and_then(|v| v.parse().ok())
            .map(TransactionId)
    }

    pub fn payout_request(&self) -> Option<u64> {
        self.metadata
            .get(META_PAYOUT_REQUEST)
            .and_then(|v| v.parse().ok())
    }
}

/// A ledger entry that has not been assigned an id yet.
///
/// The amount is unvalidated; the log rejects non-positive values on append.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub wallet_id: WalletId,
    pub amount: Decimal,
    pub r#type: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub reference: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl TransactionDraft {
    pub fn new(
        wallet_id: WalletId,
        r#type: TransactionType,
        amount: Decimal,
        status: TransactionStatus,
    ) -> Self {
        Self {
            wallet_id,
            amount,
            r#type,
            status,
            description: String::new(),
            reference: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Materializes the draft once the log has validated it and picked an id.
    pub fn into_transaction(self, id: TransactionId, amount: Amount, at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            wallet_id: self.wallet_id,
            amount,
            r#type: self.r#type,
            status: self.status,
            description: self.description,
            reference: self.reference,
            metadata: self.metadata,
            created_at: at,
            updated_at: at,
        }
    }
}
