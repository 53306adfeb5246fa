#![allow(dead_code)]

use rust_decimal::Decimal;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use wallet_ledger::application::engine::{LedgerStores, WalletLedger};
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::wallet::WalletId;
use wallet_ledger::infrastructure::notifier::BroadcastNotifier;
use wallet_ledger::infrastructure::simulated::SimulatedSettlement;

pub const ACCOUNT: &str = "0123456789";
pub const BANK: &str = "058";

pub struct Harness {
    pub ledger: Arc<WalletLedger>,
    pub processor: SimulatedSettlement,
    pub notifier: BroadcastNotifier,
}

pub fn harness(config: LedgerConfig) -> Harness {
    let processor = SimulatedSettlement::new();
    processor.register_account(ACCOUNT, BANK, "TEST CREATOR");
    let notifier = BroadcastNotifier::new(1024);
    let ledger = WalletLedger::new(
        config,
        LedgerStores::in_memory(),
        Box::new(processor.clone()),
        Box::new(notifier.clone()),
    )
    .unwrap();
    Harness {
        ledger: Arc::new(ledger),
        processor,
        notifier,
    }
}

pub fn wallet(id: &str) -> WalletId {
    WalletId::new(id).unwrap()
}

impl Harness {
    /// A wallet credited with one sale of `gross` and a verified bank account.
    pub async fn funded(&self, id: &str, gross: Decimal) -> WalletId {
        let wallet_id = wallet(id);
        self.ledger
            .credit_sale(&wallet_id, gross, &format!("{id}-opening-sale"))
            .await
            .unwrap();
        self.ledger
            .verify_bank_account(&wallet_id, ACCOUNT, BANK, "Test Bank")
            .await
            .unwrap();
        wallet_id
    }
}

/// Writes a ledger command file for the CLI.
pub fn commands_csv(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "type, wallet, amount, reference, account, bank, bank_name").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file.flush().unwrap();
    file
}
