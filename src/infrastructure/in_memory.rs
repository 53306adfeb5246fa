use crate::domain::money::Amount;
use crate::domain::payout::{PayoutDraft, PayoutRequest, PayoutRequestId, PayoutState};
use crate::domain::ports::{InFlightMarker, InFlightStore, PayoutStore, TransactionStore, WalletStore};
use crate::domain::transaction::{Transaction, TransactionDraft, TransactionId};
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for wallets.
///
/// Uses `Arc<RwLock<HashMap<WalletId, Wallet>>>` to allow shared concurrent access.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    wallets: Arc<RwLock<HashMap<WalletId, Wallet>>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn store(&self, wallet: Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        wallets.insert(wallet.user_id.clone(), wallet);
        Ok(())
    }

    async fn get(&self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(wallet_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        let wallets = self.wallets.read().await;
        let mut all: Vec<Wallet> = wallets.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}

#[derive(Default)]
struct Ledger {
    entries: BTreeMap<TransactionId, Transaction>,
    by_wallet: HashMap<WalletId, Vec<TransactionId>>,
    next_id: u64,
}

/// A thread-safe in-memory transaction log.
///
/// Ids come from a counter guarded by the same lock as the entries, so a batch
/// always receives consecutive ids.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn append(&self, drafts: Vec<(TransactionDraft, Amount)>) -> Result<Vec<Transaction>> {
        let mut ledger = self.ledger.write().await;
        let now = Utc::now();
        let mut appended = Vec::with_capacity(drafts.len());
        for (draft, amount) in drafts {
            ledger.next_id += 1;
            let id = TransactionId(ledger.next_id);
            let tx = draft.into_transaction(id, amount, now);
            ledger
                .by_wallet
                .entry(tx.wallet_id.clone())
                .or_default()
                .push(id);
            ledger.entries.insert(id, tx.clone());
            appended.push(tx);
        }
        Ok(appended)
    }

    async fn update(&self, tx: Transaction) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        match ledger.entries.get_mut(&tx.id) {
            Some(entry) => {
                *entry = tx;
                Ok(())
            }
            None => Err(LedgerError::NotFound(format!("transaction {}", tx.id))),
        }
    }

    async fn get(&self, tx_id: TransactionId) -> Result<Option<Transaction>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.entries.get(&tx_id).cloned())
    }

    async fn for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .by_wallet
            .get(wallet_id)
            .into_iter()
            .flatten()
            .filter_map(|id| ledger.entries.get(id).cloned())
            .collect())
    }
}

#[derive(Default)]
struct Payouts {
    requests: BTreeMap<PayoutRequestId, PayoutRequest>,
    by_key: HashMap<(WalletId, String), PayoutRequestId>,
    next_id: u64,
}

/// A thread-safe in-memory payout request store with a unique
/// `(wallet, idempotency key)` index.
#[derive(Default, Clone)]
pub struct InMemoryPayoutStore {
    payouts: Arc<RwLock<Payouts>>,
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn insert_if_absent(&self, draft: PayoutDraft) -> Result<(PayoutRequest, bool)> {
        let mut payouts = self.payouts.write().await;
        let key = (draft.wallet_id.clone(), draft.idempotency_key.clone());
        if let Some(existing) = payouts.by_key.get(&key).and_then(|id| payouts.requests.get(id)) {
            return Ok((existing.clone(), false));
        }
        payouts.next_id += 1;
        let id = PayoutRequestId(payouts.next_id);
        let request = PayoutRequest::from_draft(id, draft);
        payouts.by_key.insert(key, id);
        payouts.requests.insert(id, request.clone());
        Ok((request, true))
    }

    async fn update(&self, payout: PayoutRequest) -> Result<()> {
        let mut payouts = self.payouts.write().await;
        match payouts.requests.get_mut(&payout.id) {
            Some(entry) => {
                *entry = payout;
                Ok(())
            }
            None => Err(LedgerError::NotFound(format!("payout request {}", payout.id))),
        }
    }

    async fn get(&self, id: PayoutRequestId) -> Result<Option<PayoutRequest>> {
        let payouts = self.payouts.read().await;
        Ok(payouts.requests.get(&id).cloned())
    }

    async fn find_by_key(&self, wallet_id: &WalletId, key: &str) -> Result<Option<PayoutRequest>> {
        let payouts = self.payouts.read().await;
        Ok(payouts
            .by_key
            .get(&(wallet_id.clone(), key.to_string()))
            .and_then(|id| payouts.requests.get(id))
            .cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PayoutRequest>> {
        let payouts = self.payouts.read().await;
        Ok(payouts
            .requests
            .values()
            .find(|p| p.processor_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn in_states(&self, states: &[PayoutState]) -> Result<Vec<PayoutRequest>> {
        let payouts = self.payouts.read().await;
        Ok(payouts
            .requests
            .values()
            .filter(|p| states.contains(&p.state))
            .cloned()
            .collect())
    }
}

/// In-memory in-flight markers. Only useful for tests: markers do not survive
/// the process, so crash detection needs a persistent store.
#[derive(Default, Clone)]
pub struct InMemoryInFlightStore {
    markers: Arc<RwLock<HashMap<WalletId, InFlightMarker>>>,
}

impl InMemoryInFlightStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InFlightStore for InMemoryInFlightStore {
    async fn put(&self, marker: InFlightMarker) -> Result<()> {
        let mut markers = self.markers.write().await;
        markers.insert(marker.wallet_id.clone(), marker);
        Ok(())
    }

    async fn remove(&self, wallet_id: &WalletId) -> Result<()> {
        let mut markers = self.markers.write().await;
        markers.remove(wallet_id);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<InFlightMarker>> {
        let markers = self.markers.read().await;
        Ok(markers.values().cloned().collect())
    }
}
