use crate::domain::money::Amount;
use crate::domain::payout::{PayoutDraft, PayoutRequest, PayoutRequestId, PayoutState};
use crate::domain::ports::{InFlightMarker, InFlightStore, PayoutStore, TransactionStore, WalletStore};
use crate::domain::transaction::{Transaction, TransactionDraft, TransactionId};
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Column Family for wallet rows, keyed by user id.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for ledger entries, keyed by big-endian transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family indexing ledger entries by `wallet_id \0 transaction id`.
pub const CF_WALLET_TRANSACTIONS: &str = "wallet_transactions";
/// Column Family for payout requests, keyed by big-endian request id.
pub const CF_PAYOUTS: &str = "payouts";
/// Column Family for the unique `wallet_id \0 idempotency_key` index.
pub const CF_PAYOUT_KEYS: &str = "payout_keys";
/// Column Family for in-flight operation markers, keyed by user id.
pub const CF_IN_FLIGHT: &str = "in_flight";
/// Column Family for id sequences.
pub const CF_META: &str = "meta";

const SEQ_TRANSACTIONS: &[u8] = b"seq:transactions";
const SEQ_PAYOUTS: &[u8] = b"seq:payouts";

const ALL_CFS: [&str; 7] = [
    CF_WALLETS,
    CF_TRANSACTIONS,
    CF_WALLET_TRANSACTIONS,
    CF_PAYOUTS,
    CF_PAYOUT_KEYS,
    CF_IN_FLIGHT,
    CF_META,
];

/// A persistent store implementation using RocksDB.
///
/// Implements every store port over separate Column Families. Writes that
/// touch more than one key go through a `WriteBatch` so they land atomically,
/// and id allocation is serialized by `sequence_lock`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    sequence_lock: Arc<Mutex<()>>,
}

fn composite_key(wallet_id: &WalletId, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(wallet_id.as_str().len() + 1 + suffix.len());
    key.extend_from_slice(wallet_id.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(suffix);
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            sequence_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Storage(format!("column family {name} not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(decode(&value)?);
        }
        Ok(values)
    }

    fn sequence(&self, key: &[u8]) -> Result<u64> {
        let current = self.db.get_cf(self.cf(CF_META)?, key)?;
        match current {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::Storage("corrupt sequence value".into()))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn store(&self, wallet: Wallet) -> Result<()> {
        let value = encode(&wallet)?;
        self.db
            .put_cf(self.cf(CF_WALLETS)?, wallet.user_id.as_str().as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
        self.read(CF_WALLETS, wallet_id.as_str().as_bytes())
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        self.read_all(CF_WALLETS)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn append(&self, drafts: Vec<(TransactionDraft, Amount)>) -> Result<Vec<Transaction>> {
        let _seq = self
            .sequence_lock
            .lock()
            .map_err(|_| LedgerError::Storage("sequence lock poisoned".into()))?;

        let mut next = self.sequence(SEQ_TRANSACTIONS)?;
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        let mut appended = Vec::with_capacity(drafts.len());
        for (draft, amount) in drafts {
            next += 1;
            let tx = draft.into_transaction(TransactionId(next), amount, now);
            let id_key = next.to_be_bytes();
            batch.put_cf(self.cf(CF_TRANSACTIONS)?, id_key, encode(&tx)?);
            batch.put_cf(
                self.cf(CF_WALLET_TRANSACTIONS)?,
                composite_key(&tx.wallet_id, &id_key),
                b"",
            );
            appended.push(tx);
        }
        batch.put_cf(self.cf(CF_META)?, SEQ_TRANSACTIONS, next.to_be_bytes());
        self.db.write(batch)?;
        Ok(appended)
    }

    async fn update(&self, tx: Transaction) -> Result<()> {
        let key = tx.id.0.to_be_bytes();
        if self.db.get_pinned_cf(self.cf(CF_TRANSACTIONS)?, key)?.is_none() {
            return Err(LedgerError::NotFound(format!("transaction {}", tx.id)));
        }
        self.db.put_cf(self.cf(CF_TRANSACTIONS)?, key, encode(&tx)?)?;
        Ok(())
    }

    async fn get(&self, tx_id: TransactionId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, &tx_id.0.to_be_bytes())
    }

    async fn for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        let prefix = composite_key(wallet_id, &[]);
        let index = self.cf(CF_WALLET_TRANSACTIONS)?;
        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(index, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_key = &key[prefix.len()..];
            let tx: Option<Transaction> = self.read(CF_TRANSACTIONS, id_key)?;
            match tx {
                Some(tx) => entries.push(tx),
                None => {
                    return Err(LedgerError::Storage(format!(
                        "index for wallet {wallet_id} points at a missing transaction"
                    )));
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl PayoutStore for RocksDBStore {
    async fn insert_if_absent(&self, draft: PayoutDraft) -> Result<(PayoutRequest, bool)> {
        let _seq = self
            .sequence_lock
            .lock()
            .map_err(|_| LedgerError::Storage("sequence lock poisoned".into()))?;

        let index_key = composite_key(&draft.wallet_id, draft.idempotency_key.as_bytes());
        if let Some(id_bytes) = self.db.get_cf(self.cf(CF_PAYOUT_KEYS)?, &index_key)? {
            let existing: Option<PayoutRequest> = self.read(CF_PAYOUTS, &id_bytes)?;
            return existing
                .map(|p| (p, false))
                .ok_or_else(|| LedgerError::Storage("idempotency index is dangling".into()));
        }

        let next = self.sequence(SEQ_PAYOUTS)? + 1;
        let request = PayoutRequest::from_draft(PayoutRequestId(next), draft);
        let id_key = next.to_be_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAYOUTS)?, id_key, encode(&request)?);
        batch.put_cf(self.cf(CF_PAYOUT_KEYS)?, index_key, id_key);
        batch.put_cf(self.cf(CF_META)?, SEQ_PAYOUTS, id_key);
        self.db.write(batch)?;
        Ok((request, true))
    }

    async fn update(&self, payout: PayoutRequest) -> Result<()> {
        let key = payout.id.0.to_be_bytes();
        if self.db.get_pinned_cf(self.cf(CF_PAYOUTS)?, key)?.is_none() {
            return Err(LedgerError::NotFound(format!("payout request {}", payout.id)));
        }
        self.db.put_cf(self.cf(CF_PAYOUTS)?, key, encode(&payout)?)?;
        Ok(())
    }

    async fn get(&self, id: PayoutRequestId) -> Result<Option<PayoutRequest>> {
        self.read(CF_PAYOUTS, &id.0.to_be_bytes())
    }

    async fn find_by_key(&self, wallet_id: &WalletId, key: &str) -> Result<Option<PayoutRequest>> {
        let index_key = composite_key(wallet_id, key.as_bytes());
        match self.db.get_cf(self.cf(CF_PAYOUT_KEYS)?, index_key)? {
            Some(id_bytes) => self.read(CF_PAYOUTS, &id_bytes),
            None => Ok(None),
        }
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PayoutRequest>> {
        let all: Vec<PayoutRequest> = self.read_all(CF_PAYOUTS)?;
        Ok(all
            .into_iter()
            .find(|p| p.processor_reference.as_deref() == Some(reference)))
    }

    async fn in_states(&self, states: &[PayoutState]) -> Result<Vec<PayoutRequest>> {
        let all: Vec<PayoutRequest> = self.read_all(CF_PAYOUTS)?;
        Ok(all.into_iter().filter(|p| states.contains(&p.state)).collect())
    }
}

#[async_trait]
impl InFlightStore for RocksDBStore {
    async fn put(&self, marker: InFlightMarker) -> Result<()> {
        let value = encode(&marker)?;
        self.db
            .put_cf(self.cf(CF_IN_FLIGHT)?, marker.wallet_id.as_str().as_bytes(), value)?;
        Ok(())
    }

    async fn remove(&self, wallet_id: &WalletId) -> Result<()> {
        self.db
            .delete_cf(self.cf(CF_IN_FLIGHT)?, wallet_id.as_str().as_bytes())?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<InFlightMarker>> {
        self.read_all(CF_IN_FLIGHT)
    }
}
