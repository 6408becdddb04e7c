//! Dollar amounts with precise decimal arithmetic
//!
//! Penalties are the only currency values the core produces. They are
//! always Canadian dollars and always rounded half-away-from-zero to cents,
//! so the type carries no currency code.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Neg, Sub};
use thiserror::Error;

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Overflow during calculation")]
    Overflow,
}

/// A Canadian-dollar amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Creates a new amount, keeping full precision until [`Money::round_currency`]
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Creates an amount from cents
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// Parses a decimal string such as `"12.50"`
    pub fn parse(value: &str) -> Result<Self, MoneyError> {
        value
            .parse::<Decimal>()
            .map(Self)
            .map_err(|e| MoneyError::InvalidAmount(format!("{value}: {e}")))
    }

    pub fn zero() -> Self {
        Self(dec!(0))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Rounds to cents, half away from zero
    pub fn round_currency(&self) -> Self {
        Self(round_half_away(self.0, 2))
    }

    /// True when the amount has no more than two decimal places
    pub fn has_cent_precision(&self) -> bool {
        self.0.normalize().scale() <= 2
    }

    pub fn checked_mul(&self, factor: Decimal) -> Result<Money, MoneyError> {
        self.0
            .checked_mul(factor)
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }
}

/// Rounds a decimal half away from zero at `dp` places
pub fn round_half_away(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a decimal half away from zero to a whole integer
///
/// Returns `None` when the value does not fit in an `i64`.
pub fn round_to_i64(value: Decimal) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    round_half_away(value, 0).to_i64()
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;

    fn mul(self, factor: Decimal) -> Money {
        Money(self.0 * factor)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_currency_half_away_from_zero() {
        assert_eq!(Money::new(dec!(0.125)).round_currency().amount(), dec!(0.13));
        assert_eq!(Money::new(dec!(-0.125)).round_currency().amount(), dec!(-0.13));
        assert_eq!(Money::new(dec!(2.674)).round_currency().amount(), dec!(2.67));
    }

    #[test]
    fn test_cent_precision() {
        assert!(Money::parse("10.50").unwrap().has_cent_precision());
        assert!(Money::parse("10.500").unwrap().has_cent_precision());
        assert!(!Money::parse("10.505").unwrap().has_cent_precision());
    }

    #[test]
    fn test_round_to_i64() {
        assert_eq!(round_to_i64(dec!(2454.48)), Some(2454));
        assert_eq!(round_to_i64(dec!(2.5)), Some(3));
        assert_eq!(round_to_i64(dec!(-2.5)), Some(-3));
    }
}
