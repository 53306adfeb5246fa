use crate::domain::fee::FeeRate;
use crate::domain::money::{Amount, Balance};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of the ledger core.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Platform share of each sale, in parts per thousand.
    pub fee_rate_permille: u16,
    /// Smallest payout a creator may request.
    pub minimum_payout: Decimal,
    /// Upper bound on any single settlement adapter call.
    #[serde(with = "millis")]
    pub adapter_timeout: Duration,
    /// How long one attempt to take a wallet lock may wait.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    /// Lock attempts before giving up with a concurrency conflict.
    pub lock_attempts: u32,
    /// Period of the background reconciliation sweep.
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fee_rate_permille: FeeRate::DEFAULT.permille(),
            minimum_payout: dec!(100),
            adapter_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(2),
            lock_attempts: 3,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl LedgerConfig {
    /// Reads a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        FeeRate::from_permille(self.fee_rate_permille)
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        Amount::new(self.minimum_payout).map_err(|e| LedgerError::Config(e.to_string()))?;
        if self.lock_attempts == 0 {
            return Err(LedgerError::Config("lock_attempts must be at least 1".into()));
        }
        if self.adapter_timeout.is_zero()
            || self.lock_timeout.is_zero()
            || self.sweep_interval.is_zero()
        {
            return Err(LedgerError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn fee_rate(&self) -> Result<FeeRate> {
        FeeRate::from_permille(self.fee_rate_permille)
    }

    pub fn minimum_payout(&self) -> Balance {
        Balance(self.minimum_payout)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
