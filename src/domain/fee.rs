use super::money::{Balance, MINOR_UNIT_SCALE};
use crate::error::{LedgerError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// The platform's revenue share, in parts per thousand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct FeeRate(u16);

impl FeeRate {
    pub const PERMILLE: u16 = 1000;
    pub const DEFAULT: Self = Self(100);

    pub fn from_permille(permille: u16) -> Result<Self> {
        if permille > Self::PERMILLE {
            return Err(LedgerError::Validation(format!(
                "fee rate {permille}\u{2030} exceeds {}\u{2030}",
                Self::PERMILLE
            )));
        }
        Ok(Self(permille))
    }

    pub fn permille(&self) -> u16 {
        self.0
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u16> for FeeRate {
    type Error = LedgerError;

    fn try_from(value: u16) -> Result<Self> {
        Self::from_permille(value)
    }
}

impl From<FeeRate> for u16 {
    fn from(rate: FeeRate) -> Self {
        rate.0
    }
}

/// Result of splitting a gross sale between the creator and the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub net: Balance,
    pub fee: Balance,
}

/// Splits `gross` into the creator's net share and the platform fee.
///
/// The net share is rounded down to the smallest currency unit and the fee is
/// whatever remains, so `net + fee == gross` and the creator is never
/// over-credited.
pub fn compute_net(gross: Balance, rate: FeeRate) -> Result<FeeSplit> {
    if gross.is_negative() {
        return Err(LedgerError::Validation(format!(
            "gross amount must not be negative, got {gross}"
        )));
    }
    let keep = Decimal::from(FeeRate::PERMILLE - rate.permille());
    let net = (gross.0 * keep / Decimal::from(FeeRate::PERMILLE))
        .round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::ToZero);
    Ok(FeeSplit {
        net: Balance(net),
        fee: Balance(gross.0 - net),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_rate_is_ten_percent() {
        let split = compute_net(Balance(dec!(1000)), FeeRate::default()).unwrap();
        assert_eq!(split.net, Balance(dec!(900)));
        assert_eq!(split.fee, Balance(dec!(100)));
    }

    #[test]
    fn test_zero_gross() {
        let split = compute_net(Balance::ZERO, FeeRate::default()).unwrap();
        assert_eq!(split.net, Balance::ZERO);
        assert_eq!(split.fee, Balance::ZERO);
    }

    #[test]
    fn test_net_rounds_down() {
        // 10% of 0.05 is 0.005: creator gets 0.04, fee absorbs the half unit.
        let split = compute_net(Balance(dec!(0.05)), FeeRate::default()).unwrap();
        assert_eq!(split.net, Balance(dec!(0.04)));
        assert_eq!(split.fee, Balance(dec!(0.01)));
    }

    #[test]
    fn test_rate_bounds() {
        assert!(FeeRate::from_permille(0).is_ok());
        assert!(FeeRate::from_permille(1000).is_ok());
        assert!(matches!(
            FeeRate::from_permille(1001),
            Err(LedgerError::Validation(_))
        ));

        let all_fee = compute_net(Balance(dec!(42.42)), FeeRate::from_permille(1000).unwrap())
            .unwrap();
        assert_eq!(all_fee.net, Balance::ZERO);
        assert_eq!(all_fee.fee, Balance(dec!(42.42)));
    }

    #[test]
    fn test_negative_gross_rejected() {
        assert!(matches!(
            compute_net(Balance(dec!(-1)), FeeRate::default()),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_split_is_exact_for_random_amounts() {
        let mut rng = rand::thread_rng();
        for _ in 0..1_000 {
            let cents: i64 = rng.gen_range(0..10_000_000);
            let gross = Balance(Decimal::new(cents, 2));
            let rate = FeeRate::from_permille(rng.gen_range(0..=1000)).unwrap();
            let split = compute_net(gross, rate).unwrap();
            assert_eq!(split.net + split.fee, gross);
            assert!(!split.net.is_negative());
            assert!(!split.fee.is_negative());
        }
    }
}
