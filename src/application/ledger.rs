use crate::domain::money::Amount;
use crate::domain::ports::{TransactionStoreBox, WalletStore};
use crate::domain::transaction::{Transaction, TransactionDraft, TransactionId, TransactionStatus};
use crate::domain::wallet::WalletId;
use crate::error::{LedgerError, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Outcome of resolving a pending entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The entry moved from pending to the requested status.
    Resolved(Transaction),
    /// The entry already held the requested status; nothing changed.
    Unchanged(Transaction),
}

impl Resolution {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Resolved(tx) | Self::Unchanged(tx) => tx,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// The append-only ledger.
///
/// Enforces the ledger rules on top of a dumb `TransactionStore`: positive
/// amounts, known wallets, and single, final resolution of pending entries.
pub struct TransactionLog {
    store: TransactionStoreBox,
    wallets: Arc<dyn WalletStore>,
}

impl TransactionLog {
    pub fn new(store: TransactionStoreBox, wallets: Arc<dyn WalletStore>) -> Self {
        Self { store, wallets }
    }

    pub async fn append(&self, draft: TransactionDraft) -> Result<Transaction> {
        let mut appended = self.append_all(vec![draft]).await?;
        appended
            .pop()
            .ok_or_else(|| LedgerError::Storage("append returned no entry".into()))
    }

    /// Appends every draft atomically, in order.
    pub async fn append_all(&self, drafts: Vec<TransactionDraft>) -> Result<Vec<Transaction>> {
        let mut validated = Vec::with_capacity(drafts.len());
        let mut known: HashSet<WalletId> = HashSet::new();
        for draft in drafts {
            let amount = Amount::new(draft.amount)?;
            if !known.contains(&draft.wallet_id) {
                if self.wallets.get(&draft.wallet_id).await?.is_none() {
                    return Err(LedgerError::Validation(format!(
                        "cannot append to unknown wallet {}",
                        draft.wallet_id
                    )));
                }
                known.insert(draft.wallet_id.clone());
            }
            validated.push((draft, amount));
        }

        let appended = self.store.append(validated).await?;
        for tx in &appended {
            debug!(
                tx_id = %tx.id,
                wallet_id = %tx.wallet_id,
                kind = %tx.r#type,
                status = %tx.status,
                amount = %tx.amount,
                "ledger entry appended"
            );
        }
        Ok(appended)
    }

    /// Moves a pending entry to `completed` or `failed`.
    ///
    /// Resolving a terminal entry to the status it already holds is a no-op so
    /// that duplicate processor callbacks are harmless.
    pub async fn resolve(
        &self,
        tx_id: TransactionId,
        final_status: TransactionStatus,
        reference: Option<String>,
    ) -> Result<Resolution> {
        if !final_status.is_terminal() {
            return Err(LedgerError::Validation(format!(
                "transaction {tx_id} can only be resolved to completed or failed"
            )));
        }

        let mut tx = self
            .store
            .get(tx_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {tx_id}")))?;

        if tx.status == final_status {
            return Ok(Resolution::Unchanged(tx));
        }
        if tx.status.is_terminal() {
            return Err(LedgerError::InvalidState(format!(
                "transaction {tx_id} is already {}, cannot become {final_status}",
                tx.status
            )));
        }

        tx.status = final_status;
        if reference.is_some() {
            tx.reference = reference;
        }
        tx.updated_at = Utc::now();
        self.store.update(tx.clone()).await?;
        debug!(tx_id = %tx.id, status = %tx.status, "ledger entry resolved");
        Ok(Resolution::Resolved(tx))
    }

    pub async fn get(&self, tx_id: TransactionId) -> Result<Option<Transaction>> {
        self.store.get(tx_id).await
    }

    /// Every entry of the wallet, oldest first.
    pub async fn history(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        self.store.for_wallet(wallet_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionType;
    use crate::domain::wallet::Wallet;
    use crate::infrastructure::in_memory::{InMemoryTransactionStore, InMemoryWalletStore};
    use rust_decimal_macros::dec;

    async fn log_with_wallet(id: &str) -> (TransactionLog, WalletId) {
        let wallets = InMemoryWalletStore::new();
        let wallet_id = WalletId::new(id).unwrap();
        wallets.store(Wallet::new(wallet_id.clone())).await.unwrap();
        let log = TransactionLog::new(Box::new(InMemoryTransactionStore::new()), Arc::new(wallets));
        (log, wallet_id)
    }

    fn pending_debit(wallet_id: &WalletId, amount: rust_decimal::Decimal) -> TransactionDraft {
        TransactionDraft::new(
            wallet_id.clone(),
            TransactionType::PayoutDebit,
            amount,
            TransactionStatus::Pending,
        )
    }

    #[tokio::test]
    async fn test_append_rejects_non_positive_amounts() {
        let (log, wallet_id) = log_with_wallet("alice").await;
        for amount in [dec!(0), dec!(-5)] {
            let result = log.append(pending_debit(&wallet_id, amount)).await;
            assert!(matches!(result, Err(LedgerError::Validation(_))));
        }
        assert!(log.history(&wallet_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_rejects_unknown_wallet() {
        let (log, _) = log_with_wallet("alice").await;
        let stranger = WalletId::new("mallory").unwrap();
        let result = log.append(pending_debit(&stranger, dec!(5))).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let (log, wallet_id) = log_with_wallet("alice").await;
        let result = log
            .append_all(vec![
                pending_debit(&wallet_id, dec!(5)),
                pending_debit(&wallet_id, dec!(0)),
            ])
            .await;
        assert!(result.is_err());
        assert!(log.history(&wallet_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let (log, wallet_id) = log_with_wallet("alice").await;
        let tx = log.append(pending_debit(&wallet_id, dec!(5))).await.unwrap();

        let first = log
            .resolve(tx.id, TransactionStatus::Completed, Some("PRC-1".into()))
            .await
            .unwrap();
        assert!(first.is_resolved());
        assert_eq!(first.transaction().reference.as_deref(), Some("PRC-1"));

        // Duplicate callback: same status is a no-op.
        let again = log
            .resolve(tx.id, TransactionStatus::Completed, None)
            .await
            .unwrap();
        assert!(!again.is_resolved());
        assert_eq!(again.transaction().reference.as_deref(), Some("PRC-1"));

        // Conflicting callback: different terminal status is refused.
        let conflict = log.resolve(tx.id, TransactionStatus::Failed, None).await;
        assert!(matches!(conflict, Err(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_completed_entries_are_immutable() {
        let (log, wallet_id) = log_with_wallet("alice").await;
        let credit = log
            .append(TransactionDraft::new(
                wallet_id.clone(),
                TransactionType::SaleCredit,
                dec!(10),
                TransactionStatus::Completed,
            ))
            .await
            .unwrap();
        assert!(matches!(
            log.resolve(credit.id, TransactionStatus::Failed, None).await,
            Err(LedgerError::InvalidState(_))
        ));
        assert!(matches!(
            log.resolve(credit.id, TransactionStatus::Pending, None).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            log.resolve(TransactionId(404), TransactionStatus::Failed, None).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
