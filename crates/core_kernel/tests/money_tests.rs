//! Unit tests for the Money module
//!
//! Tests cover rounding, arithmetic and parsing of CAD amounts.

use core_kernel::{round_half_away, round_to_i64, Money, MoneyError};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_from_cents() {
        assert_eq!(Money::from_cents(10050).amount(), dec!(100.50));
    }

    #[test]
    fn test_parse_invalid_amount() {
        assert!(matches!(Money::parse("twelve"), Err(MoneyError::InvalidAmount(_))));
    }

    #[test]
    fn test_zero() {
        assert!(Money::zero().is_zero());
        assert!(!Money::zero().is_negative());
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_penalty_multiplication() {
        // 1,000 litres short at $0.45
        let penalty = Money::new(dec!(1000)) * dec!(0.45);
        assert_eq!(penalty.round_currency().amount(), dec!(450.00));
    }

    #[test]
    fn test_sum_of_amounts() {
        let total: Money = [dec!(1.10), dec!(2.20), dec!(3.30)]
            .into_iter()
            .map(Money::new)
            .sum();
        assert_eq!(total.amount(), dec!(6.60));
    }

    #[test]
    fn test_negation_and_subtraction() {
        let a = Money::new(dec!(10));
        let b = Money::new(dec!(25));
        assert!((a - b).is_negative());
        assert_eq!((-a).amount(), dec!(-10));
    }

    #[test]
    fn test_checked_mul_overflow() {
        let huge = Money::new(Decimal::MAX);
        assert_eq!(huge.checked_mul(dec!(2)), Err(MoneyError::Overflow));
    }
}

mod rounding {
    use super::*;

    #[test]
    fn test_half_away_from_zero_at_cents() {
        assert_eq!(round_half_away(dec!(1.005), 2), dec!(1.01));
        assert_eq!(round_half_away(dec!(-1.005), 2), dec!(-1.01));
        assert_eq!(round_half_away(dec!(1.004), 2), dec!(1.00));
    }

    #[test]
    fn test_integer_rounding() {
        assert_eq!(round_to_i64(dec!(2454.5)), Some(2455));
        assert_eq!(round_to_i64(dec!(-0.5)), Some(-1));
        assert_eq!(round_to_i64(Decimal::MAX), None);
    }

    #[test]
    fn test_display_uses_two_places() {
        assert_eq!(Money::new(dec!(600)).to_string(), "$600.00");
    }
}

proptest! {
    #[test]
    fn prop_round_currency_is_idempotent(cents in -1_000_000_000i64..1_000_000_000i64, extra in 0u32..100) {
        let raw = Decimal::new(cents * 100 + i64::from(extra), 4);
        let once = Money::new(raw).round_currency();
        prop_assert_eq!(once, once.round_currency());
        prop_assert!(once.has_cent_precision());
    }

    #[test]
    fn prop_rounding_is_symmetric(value in -10_000_000i64..10_000_000i64) {
        let raw = Decimal::new(value, 3);
        prop_assert_eq!(round_half_away(-raw, 2), -round_half_away(raw, 2));
    }
}
