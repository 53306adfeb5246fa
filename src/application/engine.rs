use crate::application::guard::ConcurrencyGuard;
use crate::application::ledger::TransactionLog;
use crate::application::projector;
use crate::config::LedgerConfig;
use crate::domain::events::LedgerEvent;
use crate::domain::fee::{FeeRate, compute_net};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{
    EventNotifierBox, InFlightStoreBox, PayoutStoreBox, SettlementAdapterBox,
    TransactionStoreBox, WalletStore, WalletStoreBox,
};
use crate::domain::transaction::{
    META_SOURCE_REFERENCE, Transaction, TransactionDraft, TransactionId, TransactionStatus,
    TransactionType,
};
use crate::domain::wallet::{BankDetails, Balances, Wallet, WalletId};
use crate::error::{AdapterError, LedgerError, Result};
use crate::infrastructure::in_memory::{
    InMemoryInFlightStore, InMemoryPayoutStore, InMemoryTransactionStore, InMemoryWalletStore,
};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// The storage backends a ledger runs on.
pub struct LedgerStores {
    pub wallets: WalletStoreBox,
    pub transactions: TransactionStoreBox,
    pub payouts: PayoutStoreBox,
    pub in_flight: InFlightStoreBox,
}

impl LedgerStores {
    pub fn in_memory() -> Self {
        Self {
            wallets: Box::new(InMemoryWalletStore::new()),
            transactions: Box::new(InMemoryTransactionStore::new()),
            payouts: Box::new(InMemoryPayoutStore::new()),
            in_flight: Box::new(InMemoryInFlightStore::new()),
        }
    }

    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb(store: crate::infrastructure::rocksdb::RocksDBStore) -> Self {
        Self {
            wallets: Box::new(store.clone()),
            transactions: Box::new(store.clone()),
            payouts: Box::new(store.clone()),
            in_flight: Box::new(store),
        }
    }
}

/// Entry point of the wallet subsystem.
///
/// `WalletLedger` credits sales, serves balance and history reads, verifies
/// payout destinations and drives payouts through their state machine. All
/// balance mutations of a wallet go through its `ConcurrencyGuard` lock; reads
/// are served from the cached balances without locking.
pub struct WalletLedger {
    pub(crate) config: LedgerConfig,
    pub(crate) fee_rate: FeeRate,
    pub(crate) wallets: Arc<dyn WalletStore>,
    pub(crate) log: TransactionLog,
    pub(crate) payouts: PayoutStoreBox,
    pub(crate) guard: ConcurrencyGuard,
    pub(crate) adapter: SettlementAdapterBox,
    pub(crate) notifier: EventNotifierBox,
}

impl WalletLedger {
    /// Creates a new `WalletLedger` instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Fee rate, payout floor and timeouts; validated here.
    /// * `stores` - Persistence for wallets, ledger entries, payouts and in-flight markers.
    /// * `adapter` - The external payment processor.
    /// * `notifier` - Destination of change events.
    pub fn new(
        config: LedgerConfig,
        stores: LedgerStores,
        adapter: SettlementAdapterBox,
        notifier: EventNotifierBox,
    ) -> Result<Self> {
        config.validate()?;
        let fee_rate = config.fee_rate()?;
        let wallets: Arc<dyn WalletStore> = Arc::from(stores.wallets);
        let guard = ConcurrencyGuard::new(stores.in_flight, config.lock_timeout, config.lock_attempts);
        Ok(Self {
            fee_rate,
            log: TransactionLog::new(stores.transactions, wallets.clone()),
            wallets,
            payouts: stores.payouts,
            guard,
            adapter,
            notifier,
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Runs `work` under the wallet's lock, first rolling the wallet forward if
    /// an earlier operation left its in-flight marker behind.
    pub(crate) async fn locked<T>(
        &self,
        wallet_id: &WalletId,
        operation: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let _lock = self.guard.acquire(wallet_id).await?;
        if let Some(marker) = self.guard.stale_marker(wallet_id).await? {
            warn!(
                wallet_id = %wallet_id,
                interrupted = %marker.operation,
                started_at = %marker.started_at,
                "found interrupted operation, rolling wallet forward"
            );
            self.roll_forward(wallet_id, &marker.operation).await?;
            self.guard.clear_marker(wallet_id).await?;
        }
        self.guard.run_marked(wallet_id, operation, work).await
    }

    /// Bounds an adapter call by the configured timeout.
    pub(crate) async fn call_adapter<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.adapter_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(self.config.adapter_timeout).into()),
        }
    }

    pub(crate) fn publish(&self, event: LedgerEvent) {
        self.notifier.publish(event);
    }

    pub(crate) async fn load_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.wallets
            .get(wallet_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.clone()))
    }

    pub(crate) async fn load_active_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        let wallet = self.load_wallet(wallet_id).await?;
        if wallet.is_halted() {
            return Err(LedgerError::WalletHalted(wallet_id.clone()));
        }
        Ok(wallet)
    }

    /// Creates the wallet if it does not exist yet.
    pub async fn open_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.locked(wallet_id, "open_wallet", async {
            if let Some(existing) = self.wallets.get(wallet_id).await? {
                return Ok(existing);
            }
            let wallet = Wallet::new(wallet_id.clone());
            self.wallets.store(wallet.clone()).await?;
            info!(wallet_id = %wallet_id, "wallet opened");
            Ok(wallet)
        })
        .await
    }

    /// Credits a sale to the creator, net of the platform fee.
    ///
    /// The gross amount is recorded as a `sale-credit` and the platform's cut
    /// as a paired `fee-debit` sharing the same reference. A repeated
    /// `source_reference` returns the original credit instead of paying twice.
    pub async fn credit_sale(
        &self,
        wallet_id: &WalletId,
        gross: Decimal,
        source_reference: &str,
    ) -> Result<TransactionId> {
        if source_reference.trim().is_empty() {
            return Err(LedgerError::Validation("sale reference must not be empty".into()));
        }
        let split = compute_net(Balance(gross), self.fee_rate)?;
        let gross = Amount::new(gross)?;

        let (sale, balances) = self
            .locked(wallet_id, "credit_sale", async {
                let mut wallet = match self.wallets.get(wallet_id).await? {
                    Some(wallet) => wallet,
                    None => {
                        let wallet = Wallet::new(wallet_id.clone());
                        self.wallets.store(wallet.clone()).await?;
                        info!(wallet_id = %wallet_id, "wallet opened on first credit");
                        wallet
                    }
                };
                if wallet.is_halted() {
                    return Err(LedgerError::WalletHalted(wallet_id.clone()));
                }

                let history = self.log.history(wallet_id).await?;
                if let Some(previous) = history.iter().find(|tx| {
                    tx.r#type == TransactionType::SaleCredit
                        && tx.reference.as_deref() == Some(source_reference)
                }) {
                    info!(
                        wallet_id = %wallet_id,
                        source_reference,
                        tx_id = %previous.id,
                        "duplicate sale ignored"
                    );
                    return Ok((previous.clone(), None));
                }

                let mut drafts = vec![
                    TransactionDraft::new(
                        wallet_id.clone(),
                        TransactionType::SaleCredit,
                        gross.value(),
                        TransactionStatus::Completed,
                    )
                    .describe("Sale proceeds")
                    .with_reference(source_reference)
                    .with_meta(META_SOURCE_REFERENCE, source_reference),
                ];
                if split.fee > Balance::ZERO {
                    drafts.push(
                        TransactionDraft::new(
                            wallet_id.clone(),
                            TransactionType::FeeDebit,
                            split.fee.0,
                            TransactionStatus::Completed,
                        )
                        .describe(format!("Platform fee ({}\u{2030})", self.fee_rate.permille()))
                        .with_reference(source_reference)
                        .with_meta(META_SOURCE_REFERENCE, source_reference),
                    );
                }
                let mut appended = self.log.append_all(drafts).await?;
                let sale = appended.remove(0);

                if split.net > Balance::ZERO {
                    wallet.credit(Amount::new(split.net.0)?);
                }
                self.wallets.store(wallet.clone()).await?;
                Ok((sale, Some(wallet.balances)))
            })
            .await?;

        if let Some(balances) = balances {
            info!(
                wallet_id = %wallet_id,
                tx_id = %sale.id,
                gross = %gross,
                net = %split.net,
                fee = %split.fee,
                "sale credited"
            );
            self.publish(LedgerEvent::BalanceChanged {
                wallet_id: wallet_id.clone(),
                balances,
            });
        }
        Ok(sale.id)
    }

    /// Published balances, served from the wallet's cache.
    ///
    /// If the cache cannot be read, the balances are folded from the ledger instead.
    pub async fn get_balance(&self, wallet_id: &WalletId) -> Result<Balances> {
        match self.wallets.get(wallet_id).await {
            Ok(Some(wallet)) => Ok(wallet.balances),
            Ok(None) => Err(LedgerError::WalletNotFound(wallet_id.clone())),
            Err(e) => {
                warn!(wallet_id = %wallet_id, error = %e, "balance cache unreadable, projecting from ledger");
                projector::project(&self.log.history(wallet_id).await?)
            }
        }
    }

    pub async fn get_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.load_wallet(wallet_id).await
    }

    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        self.wallets.get_all().await
    }

    /// Ledger entries of a wallet, newest first.
    pub async fn get_transaction_history(
        &self,
        wallet_id: &WalletId,
        limit: usize,
        offset: usize,
        type_filter: Option<TransactionType>,
    ) -> Result<Vec<Transaction>> {
        self.load_wallet(wallet_id).await?;
        let history = self.log.history(wallet_id).await?;
        Ok(history
            .into_iter()
            .rev()
            .filter(|tx| type_filter.is_none_or(|t| tx.r#type == t))
            .skip(offset)
            .take(limit)
            .collect())
    }

    pub async fn get_transaction(&self, tx_id: TransactionId) -> Result<Transaction> {
        self.log
            .get(tx_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {tx_id}")))
    }

    /// Verifies a bank account with the provider and stores it as the payout destination.
    pub async fn verify_bank_account(
        &self,
        wallet_id: &WalletId,
        account_number: &str,
        bank_code: &str,
        bank_name: &str,
    ) -> Result<String> {
        let account_number = account_number.trim();
        let bank_code = bank_code.trim();
        if account_number.is_empty() || !account_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(LedgerError::Validation(format!(
                "account number {account_number:?} must be digits only"
            )));
        }
        if bank_code.is_empty() {
            return Err(LedgerError::Validation("bank code must not be empty".into()));
        }
        self.load_wallet(wallet_id).await?;

        let account_name = match self
            .call_adapter(self.adapter.verify_account(account_number, bank_code))
            .await
        {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => {
                return Err(AdapterError::Verification("provider returned no account name".into()).into());
            }
            Err(e) => {
                warn!(wallet_id = %wallet_id, bank_code, error = %e, "bank account verification failed");
                return Err(e);
            }
        };

        let details = BankDetails {
            account_name: account_name.clone(),
            account_number: account_number.to_string(),
            bank_code: bank_code.to_string(),
            bank_name: bank_name.trim().to_string(),
        };
        self.locked(wallet_id, "verify_bank_account", async {
            let mut wallet = self.load_wallet(wallet_id).await?;
            wallet.set_bank_details(details);
            self.wallets.store(wallet).await
        })
        .await?;

        info!(wallet_id = %wallet_id, bank_code, bank_name = %bank_name.trim(), "bank account verified");
        Ok(account_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::notifier::BroadcastNotifier;
    use crate::infrastructure::simulated::SimulatedSettlement;
    use rust_decimal_macros::dec;

    fn ledger() -> (WalletLedger, SimulatedSettlement, BroadcastNotifier) {
        let adapter = SimulatedSettlement::new();
        let notifier = BroadcastNotifier::new(64);
        let ledger = WalletLedger::new(
            LedgerConfig::default(),
            LedgerStores::in_memory(),
            Box::new(adapter.clone()),
            Box::new(notifier.clone()),
        )
        .unwrap();
        (ledger, adapter, notifier)
    }

    fn wallet(id: &str) -> WalletId {
        WalletId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_credit_sale_applies_fee() {
        let (ledger, _, _) = ledger();
        let alice = wallet("alice");
        ledger.credit_sale(&alice, dec!(1000), "sale-1").await.unwrap();

        let balances = ledger.get_balance(&alice).await.unwrap();
        assert_eq!(balances.available, Balance(dec!(900)));
        assert_eq!(balances.pending, Balance::ZERO);
        assert_eq!(balances.lifetime_earned, Balance(dec!(900)));

        let history = ledger.get_transaction_history(&alice, 10, 0, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].r#type, TransactionType::FeeDebit);
        assert_eq!(history[0].amount.value(), dec!(100));
        assert_eq!(history[1].r#type, TransactionType::SaleCredit);
        assert_eq!(history[1].amount.value(), dec!(1000));
    }

    #[tokio::test]
    async fn test_duplicate_sale_reference_is_credited_once() {
        let (ledger, _, _) = ledger();
        let alice = wallet("alice");
        let first = ledger.credit_sale(&alice, dec!(100), "sale-1").await.unwrap();
        let second = ledger.credit_sale(&alice, dec!(100), "sale-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            ledger.get_balance(&alice).await.unwrap().available,
            Balance(dec!(90))
        );
    }

    #[tokio::test]
    async fn test_credit_sale_rejects_bad_input() {
        let (ledger, _, _) = ledger();
        let alice = wallet("alice");
        for gross in [dec!(0), dec!(-10), dec!(0.001)] {
            let result = ledger.credit_sale(&alice, gross, "sale-x").await;
            assert!(matches!(result, Err(LedgerError::Validation(_))), "{gross}");
        }
        assert!(matches!(
            ledger.credit_sale(&alice, dec!(10), " ").await,
            Err(LedgerError::Validation(_))
        ));
        // Nothing was created along the way.
        assert!(matches!(
            ledger.get_balance(&alice).await,
            Err(LedgerError::WalletNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_credit_publishes_balance_event() {
        let (ledger, _, notifier) = ledger();
        let mut events = notifier.subscribe();
        ledger.credit_sale(&wallet("alice"), dec!(50), "s").await.unwrap();

        match events.recv().await.unwrap() {
            LedgerEvent::BalanceChanged { wallet_id, balances } => {
                assert_eq!(wallet_id, wallet("alice"));
                assert_eq!(balances.available, Balance(dec!(45)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_history_paging_and_filter() {
        let (ledger, _, _) = ledger();
        let alice = wallet("alice");
        for i in 1..=5 {
            ledger
                .credit_sale(&alice, dec!(10), &format!("sale-{i}"))
                .await
                .unwrap();
        }

        let sales = ledger
            .get_transaction_history(&alice, 2, 1, Some(TransactionType::SaleCredit))
            .await
            .unwrap();
        let refs: Vec<_> = sales.iter().map(|t| t.reference.clone().unwrap()).collect();
        assert_eq!(refs, vec!["sale-4", "sale-3"]);

        let all = ledger.get_transaction_history(&alice, 100, 0, None).await.unwrap();
        assert_eq!(all.len(), 10);
        assert!(all.windows(2).all(|w| w[0].id > w[1].id));

        assert!(matches!(
            ledger.get_transaction_history(&wallet("nobody"), 10, 0, None).await,
            Err(LedgerError::WalletNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_bank_account() {
        let (ledger, adapter, _) = ledger();
        let alice = wallet("alice");
        adapter.register_account("0123456789", "058", "ALICE CREATOR");
        ledger.open_wallet(&alice).await.unwrap();

        let name = ledger
            .verify_bank_account(&alice, "0123456789", "058", "GTBank")
            .await
            .unwrap();
        assert_eq!(name, "ALICE CREATOR");

        let details = ledger.get_wallet(&alice).await.unwrap().bank_details.unwrap();
        assert!(details.is_verified());
        assert_eq!(details.bank_name, "GTBank");
    }

    #[tokio::test]
    async fn test_verify_bank_account_failures_leave_wallet_untouched() {
        let (ledger, _, _) = ledger();
        let alice = wallet("alice");
        ledger.open_wallet(&alice).await.unwrap();

        assert!(matches!(
            ledger.verify_bank_account(&alice, "12ab", "058", "").await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            ledger.verify_bank_account(&alice, "9999999999", "058", "").await,
            Err(LedgerError::Adapter(AdapterError::Verification(_)))
        ));
        assert!(ledger.get_wallet(&alice).await.unwrap().bank_details.is_none());
    }

    #[derive(Clone, Default)]
    struct FlakyWallets {
        inner: InMemoryWalletStore,
        broken: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl WalletStore for FlakyWallets {
        async fn store(&self, wallet: Wallet) -> Result<()> {
            self.inner.store(wallet).await
        }

        async fn get(&self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(LedgerError::Storage("cache offline".into()));
            }
            self.inner.get(wallet_id).await
        }

        async fn get_all(&self) -> Result<Vec<Wallet>> {
            self.inner.get_all().await
        }
    }

    #[tokio::test]
    async fn test_balance_read_falls_back_to_ledger() {
        let wallets = FlakyWallets::default();
        let stores = LedgerStores {
            wallets: Box::new(wallets.clone()),
            ..LedgerStores::in_memory()
        };
        let ledger = WalletLedger::new(
            LedgerConfig::default(),
            stores,
            Box::new(SimulatedSettlement::new()),
            Box::new(BroadcastNotifier::new(8)),
        )
        .unwrap();
        let alice = wallet("alice");
        ledger.credit_sale(&alice, dec!(1000), "sale-1").await.unwrap();

        wallets.broken.store(true, std::sync::atomic::Ordering::SeqCst);
        let balances = ledger.get_balance(&alice).await.unwrap();
        assert_eq!(balances.available, Balance(dec!(900)));
        assert_eq!(balances.lifetime_earned, Balance(dec!(900)));
    }

    #[tokio::test]
    async fn test_open_wallet_is_idempotent() {
        let (ledger, _, _) = ledger();
        let alice = wallet("alice");
        let first = ledger.open_wallet(&alice).await.unwrap();
        ledger.credit_sale(&alice, dec!(10), "s").await.unwrap();
        let second = ledger.open_wallet(&alice).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.balances.available, Balance(dec!(9)));
    }
}
