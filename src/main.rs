use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wallet_ledger::application::engine::{LedgerStores, WalletLedger};
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::ports::ProcessorStatus;
use wallet_ledger::domain::wallet::WalletId;
use wallet_ledger::error::LedgerError;
use wallet_ledger::infrastructure::notifier::TracingNotifier;
use wallet_ledger::infrastructure::simulated::SimulatedSettlement;
use wallet_ledger::interfaces::csv::command_reader::{CommandReader, CommandType, LedgerCommand};
use wallet_ledger::interfaces::csv::wallet_writer::WalletWriter;

#[derive(Clone, Copy, ValueEnum)]
enum Settlement {
    Settled,
    Failed,
    Pending,
}

impl From<Settlement> for ProcessorStatus {
    fn from(value: Settlement) -> Self {
        match value {
            Settlement::Settled => ProcessorStatus::Settled,
            Settlement::Failed => ProcessorStatus::Failed,
            Settlement::Pending => ProcessorStatus::Pending,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input ledger commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON file with ledger settings; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    fee_rate_permille: Option<u16>,

    #[arg(long)]
    minimum_payout: Option<Decimal>,

    #[arg(long)]
    adapter_timeout_ms: Option<u64>,

    /// Outcome the simulated processor reports for payouts without a callback.
    #[arg(long, value_enum, default_value = "settled")]
    settlement: Settlement,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Cli {
    fn ledger_config(&self) -> wallet_ledger::error::Result<LedgerConfig> {
        let mut config = match &self.config {
            Some(path) => LedgerConfig::from_file(path)?,
            None => LedgerConfig::default(),
        };
        if let Some(permille) = self.fee_rate_permille {
            config.fee_rate_permille = permille;
        }
        if let Some(minimum) = self.minimum_payout {
            config.minimum_payout = minimum;
        }
        if let Some(ms) = self.adapter_timeout_ms {
            config.adapter_timeout = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

fn stores(db_path: Option<PathBuf>) -> Result<LedgerStores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = wallet_ledger::infrastructure::rocksdb::RocksDBStore::open(path)?;
            Ok(LedgerStores::rocksdb(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(LedgerStores::in_memory())
        }
        None => Ok(LedgerStores::in_memory()),
    }
}

async fn apply(
    ledger: &WalletLedger,
    processor: &SimulatedSettlement,
    command: &LedgerCommand,
) -> wallet_ledger::error::Result<()> {
    if command.command == CommandType::Reconcile && command.wallet.is_empty() {
        ledger.run_reconciliation().await?;
        return Ok(());
    }
    let wallet_id = WalletId::new(command.wallet.as_str())?;
    match command.command {
        CommandType::Sale => {
            ledger
                .credit_sale(&wallet_id, command.amount()?, &command.reference)
                .await?;
        }
        CommandType::Bank => {
            ledger
                .verify_bank_account(&wallet_id, &command.account, &command.bank, &command.bank_name)
                .await?;
        }
        CommandType::Payout => {
            ledger
                .request_payout(&wallet_id, command.amount()?, &command.reference)
                .await?;
        }
        CommandType::Settle | CommandType::Fail => {
            let status = if command.command == CommandType::Settle {
                ProcessorStatus::Settled
            } else {
                ProcessorStatus::Failed
            };
            let reference = ledger
                .find_payout(&wallet_id, &command.reference)
                .await?
                .and_then(|payout| payout.processor_reference)
                .ok_or_else(|| {
                    LedgerError::NotFound(format!("submitted payout {}", command.reference))
                })?;
            processor.resolve(&reference, status);
            ledger.handle_settlement_signal(&reference, status).await?;
        }
        CommandType::Cancel => {
            let payout = ledger
                .find_payout(&wallet_id, &command.reference)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("payout {}", command.reference)))?;
            ledger.cancel_payout(payout.id).await?;
        }
        CommandType::Reconcile => {
            ledger.reconcile_wallet(&wallet_id).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .into_diagnostic()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = cli.ledger_config()?;
    let processor = SimulatedSettlement::new();
    processor.accept_any_account();
    processor.set_default_outcome(cli.settlement.into());

    let ledger = WalletLedger::new(
        config,
        stores(cli.db_path.clone())?,
        Box::new(processor.clone()),
        Box::new(TracingNotifier),
    )?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (row, command) in reader.commands().enumerate() {
        match command {
            Ok(command) => {
                if let Err(e) = apply(&ledger, &processor, &command).await {
                    warn!(row = row + 1, command = ?command.command, error = %e, "command rejected");
                    eprintln!("Error processing command on row {}: {}", row + 1, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command on row {}: {}", row + 1, e);
            }
        }
    }

    let report = ledger.run_reconciliation().await?;
    for wallet_id in &report.drifted {
        eprintln!("Wallet {wallet_id} halted: ledger drift detected");
    }

    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(ledger.list_wallets().await?)?;

    Ok(())
}
