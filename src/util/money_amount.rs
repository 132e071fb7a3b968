use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A price-like value in human-readable currency format.
/// Accepts strings like "$0.01", "1,000", or raw numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        bounds::MIN_STR,
        bounds::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
}

mod bounds {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        // Remove anything that isn't digit, dot, minus
        static CLEANUP: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("valid cleanup regex"));
        let cleaned = CLEANUP.replace_all(input, "").to_string();

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *bounds::MIN || parsed > *bounds::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }

    /// Convert to atomic token units at the given decimal precision.
    ///
    /// Rounds half-to-even at the atomic boundary and clamps the result to
    /// `[1, u64::MAX]`, so any positive price maps to at least one atomic
    /// unit.
    pub fn atomic(&self, decimals: u8) -> Result<u64, MoneyAmountParseError> {
        let multiplier = 10u64
            .checked_pow(u32::from(decimals))
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let scaled = self
            .0
            .checked_mul(Decimal::from(multiplier))
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let rounded = scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        let value = rounded.to_u64().unwrap_or(u64::MAX);
        Ok(value.max(1))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cent_to_atomic() {
        let amount = MoneyAmount::parse("$0.01").unwrap();
        assert_eq!(amount.atomic(6).unwrap(), 10_000);
    }

    #[test]
    fn test_whole_dollar_to_atomic() {
        let amount = MoneyAmount::parse("1").unwrap();
        assert_eq!(amount.atomic(6).unwrap(), 1_000_000);
    }

    #[test]
    fn test_strips_commas_and_symbols() {
        let amount = MoneyAmount::parse("$1,000").unwrap();
        assert_eq!(amount.atomic(6).unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_rounds_half_to_even() {
        // 0.0000005 USDC is half an atomic unit at 6 decimals; banker's
        // rounding takes it to zero, and the clamp floor raises it to one.
        let amount = MoneyAmount::parse("0.0000005").unwrap();
        assert_eq!(amount.atomic(6).unwrap(), 1);

        // 0.0000015 rounds up to 2.
        let amount = MoneyAmount::parse("0.0000015").unwrap();
        assert_eq!(amount.atomic(6).unwrap(), 2);
    }

    #[test]
    fn test_sub_atomic_clamps_to_one() {
        let amount = MoneyAmount::parse("0.0000001").unwrap();
        assert_eq!(amount.atomic(6).unwrap(), 1);
    }

    #[test]
    fn test_zero_decimals() {
        let amount = MoneyAmount::parse("42").unwrap();
        assert_eq!(amount.atomic(0).unwrap(), 42);
    }

    #[test]
    fn test_negative_rejected() {
        assert!(matches!(
            MoneyAmount::parse("-1"),
            Err(MoneyAmountParseError::Negative)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            MoneyAmount::parse("price"),
            Err(MoneyAmountParseError::InvalidFormat)
        ));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            MoneyAmount::parse("1000000000"),
            Err(MoneyAmountParseError::OutOfRange)
        ));
    }
}
