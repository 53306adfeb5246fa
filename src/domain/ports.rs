use super::events::LedgerEvent;
use super::money::Amount;
use super::payout::{PayoutDraft, PayoutRequest, PayoutRequestId, PayoutState};
use super::transaction::{Transaction, TransactionDraft, TransactionId};
use super::wallet::{BankDetails, Wallet, WalletId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn store(&self, wallet: Wallet) -> Result<()>;
    async fn get(&self, wallet_id: &WalletId) -> Result<Option<Wallet>>;
    async fn get_all(&self) -> Result<Vec<Wallet>>;
}

/// Durable side of the transaction log.
///
/// Stores are not expected to enforce ledger rules; `TransactionLog` does.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Assigns consecutive ids to `drafts` and persists them all or none.
    async fn append(&self, drafts: Vec<(TransactionDraft, Amount)>) -> Result<Vec<Transaction>>;
    /// Overwrites an existing entry (status resolution only).
    async fn update(&self, tx: Transaction) -> Result<()>;
    async fn get(&self, tx_id: TransactionId) -> Result<Option<Transaction>>;
    /// All entries of a wallet in append order.
    async fn for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Creates the request unless one already exists for `(wallet_id, idempotency_key)`.
    ///
    /// Returns the stored request and whether it was created by this call.
    async fn insert_if_absent(&self, draft: PayoutDraft) -> Result<(PayoutRequest, bool)>;
    async fn update(&self, payout: PayoutRequest) -> Result<()>;
    async fn get(&self, id: PayoutRequestId) -> Result<Option<PayoutRequest>>;
    async fn find_by_key(&self, wallet_id: &WalletId, key: &str) -> Result<Option<PayoutRequest>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<PayoutRequest>>;
    async fn in_states(&self, states: &[PayoutState]) -> Result<Vec<PayoutRequest>>;
}

/// Marker written before a locked wallet mutation and cleared after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightMarker {
    pub wallet_id: WalletId,
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait InFlightStore: Send + Sync {
    async fn put(&self, marker: InFlightMarker) -> Result<()>;
    async fn remove(&self, wallet_id: &WalletId) -> Result<()>;
    async fn all(&self) -> Result<Vec<InFlightMarker>>;
}

/// Status reported by the payment processor for a submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorStatus {
    Pending,
    Settled,
    Failed,
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Contract expected from the payment processor and bank verification provider.
///
/// Calls may be slow, duplicated, or lost. `submit_payout` must deduplicate on
/// the idempotency key and return the same reference for a repeated key.
#[async_trait]
pub trait SettlementAdapter: Send + Sync {
    async fn verify_account(&self, account_number: &str, bank_code: &str) -> Result<String>;
    async fn submit_payout(
        &self,
        idempotency_key: &str,
        amount: Amount,
        bank_details: &BankDetails,
    ) -> Result<String>;
    async fn get_payout_status(&self, processor_reference: &str) -> Result<ProcessorStatus>;
}

/// Receives ledger events. Delivery is the implementor's concern and must not block.
pub trait EventNotifier: Send + Sync {
    fn publish(&self, event: LedgerEvent);
}

pub type WalletStoreBox = Box<dyn WalletStore>;
pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type PayoutStoreBox = Box<dyn PayoutStore>;
pub type InFlightStoreBox = Box<dyn InFlightStore>;
pub type SettlementAdapterBox = Box<dyn SettlementAdapter>;
pub type EventNotifierBox = Box<dyn EventNotifier>;
