use crate::domain::money::Balance;
use crate::domain::wallet::{Wallet, WalletStatus};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    wallet: &'a str,
    available: String,
    pending: String,
    lifetime_earned: String,
    status: &'static str,
}

fn minor_units(balance: Balance) -> String {
    format!("{:.2}", balance.0)
}

/// Writes the wallet balance report as CSV.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: impl IntoIterator<Item = Wallet>) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(WalletRow {
                wallet: wallet.user_id.as_str(),
                available: minor_units(wallet.balances.available),
                pending: minor_units(wallet.balances.pending),
                lifetime_earned: minor_units(wallet.balances.lifetime_earned),
                status: match wallet.status {
                    WalletStatus::Active => "active",
                    WalletStatus::Halted => "halted",
                },
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
