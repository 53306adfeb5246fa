use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    /// Credit a sale: `wallet`, `amount` (gross), `reference` (sale id).
    Sale,
    /// Verify a payout destination: `wallet`, `account`, `bank`, optional `bank_name`.
    Bank,
    /// Request a payout: `wallet`, `amount`, `reference` (idempotency key).
    Payout,
    /// Processor callback confirming the payout with this idempotency key.
    Settle,
    /// Processor callback failing the payout with this idempotency key.
    Fail,
    /// Cancel the payout with this idempotency key.
    Cancel,
    /// Check one wallet, or run a full sweep when `wallet` is empty.
    Reconcile,
}

/// One row of a command file.
///
/// Columns not used by a command may be left empty or omitted.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct LedgerCommand {
    #[serde(rename = "type")]
    pub command: CommandType,
    #[serde(default)]
    pub wallet: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub bank: String,
    #[serde(default)]
    pub bank_name: String,
}

impl LedgerCommand {
    pub fn amount(&self) -> Result<Decimal> {
        self.amount.ok_or_else(|| {
            LedgerError::Validation(format!("{:?} command requires an amount", self.command))
        })
    }
}

/// Reads ledger commands from a CSV source.
///
/// Whitespace is trimmed and short rows are accepted; missing trailing
/// columns deserialize as empty.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows, so large files are streamed.
    pub fn commands(mut self) -> impl Iterator<Item = Result<LedgerCommand>> {
        let headers = self.reader.headers().cloned().unwrap_or_default();
        self.reader.into_records().map(move |record| {
            let mut record = record?;
            while record.len() < headers.len() {
                record.push_field("");
            }
            record
                .deserialize(Some(&headers))
                .map_err(LedgerError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "type, wallet, amount, reference, account, bank, bank_name\n\
                    sale, alice, 1000, order-1,,\n\
                    bank, alice, , , 0123456789, 058, GTBank\n\
                    payout, alice, 900.50, key-1\n\
                    reconcile";
        let commands: Vec<_> = CommandReader::new(data.as_bytes())
            .commands()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].command, CommandType::Sale);
        assert_eq!(commands[0].amount().unwrap(), dec!(1000));
        assert_eq!(commands[1].account, "0123456789");
        assert_eq!(commands[1].amount, None);
        assert_eq!(commands[1].bank, "058");
        assert_eq!(commands[1].bank_name, "GTBank");
        assert_eq!(commands[2].amount().unwrap(), dec!(900.50));
        assert_eq!(commands[2].reference, "key-1");
        assert_eq!(commands[2].bank, "");
        assert_eq!(commands[3].command, CommandType::Reconcile);
        assert_eq!(commands[3].wallet, "");
    }

    #[test]
    fn test_bank_name_column_is_optional() {
        let data = "type, wallet, amount, reference, account, bank\n\
                    bank, alice, , , 0123456789, 058";
        let command = CommandReader::new(data.as_bytes())
            .commands()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(command.bank, "058");
        assert_eq!(command.bank_name, "");
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "type, wallet, amount, reference\n\
                    refund, alice, 1, r\n\
                    sale, alice, lots, r";
        let results: Vec<_> = CommandReader::new(data.as_bytes()).commands().collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_err()));
    }

    #[test]
    fn test_missing_amount_is_a_validation_error() {
        let data = "type, wallet\nsale, alice";
        let command = CommandReader::new(data.as_bytes())
            .commands()
            .next()
            .unwrap()
            .unwrap();
        assert!(matches!(command.amount(), Err(LedgerError::Validation(_))));
    }
}
