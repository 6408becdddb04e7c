//! Property-Based Test Generators
//!
//! Proptest strategies for ledger operation sequences, transfer terms and
//! child record version chains.

use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::{CompliancePeriod, EntityGroupId};
use domain_compliance::{ActionType, ChildRecord, FuelCategory};
use uuid::Uuid;

use crate::builders::ChildChainBuilder;

/// One step of a generated ledger history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    /// Committed adjustment; negative values debit
    Adjust(i64),
    /// Reservation of the given signed units
    Reserve(i64),
    /// Confirms the n-th outstanding reservation, modulo the count
    Confirm(usize),
    /// Releases the n-th outstanding reservation, modulo the count
    Release(usize),
}

/// Non-zero compliance unit amounts
pub fn units_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![-5_000i64..=-1, 1i64..=5_000]
}

pub fn ledger_op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        3 => units_strategy().prop_map(LedgerOp::Adjust),
        3 => units_strategy().prop_map(LedgerOp::Reserve),
        1 => any::<usize>().prop_map(LedgerOp::Confirm),
        1 => any::<usize>().prop_map(LedgerOp::Release),
    ]
}

pub fn ledger_history_strategy(max_len: usize) -> impl Strategy<Value = Vec<LedgerOp>> {
    prop::collection::vec(ledger_op_strategy(), 0..max_len)
}

/// Compliance periods the calculator supports
pub fn period_strategy() -> impl Strategy<Value = CompliancePeriod> {
    (2019i32..=2030).prop_filter_map("valid period", |year| CompliancePeriod::new(year).ok())
}

pub fn fuel_category_strategy() -> impl Strategy<Value = FuelCategory> {
    prop_oneof![
        Just(FuelCategory::Gasoline),
        Just(FuelCategory::Diesel),
        Just(FuelCategory::JetFuel),
    ]
}

/// Litres with up to two decimal places
pub fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

/// Transfer prices: non-negative, at most two decimal places
pub fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

/// Version chains for up to `groups` entity groups, interleaved by group
///
/// Each chain starts with a create, carries zero to three updates and is
/// deleted about a third of the time.
pub fn child_chains_strategy(groups: usize) -> impl Strategy<Value = Vec<ChildRecord>> {
    prop::collection::vec((any::<u128>(), 0i32..4, prop::bool::weighted(0.33)), 1..=groups.max(1)).prop_map(
        |chains| {
            let mut builder = ChildChainBuilder::for_report(1);
            for (seed, updates, deleted) in chains {
                builder = builder.chain(EntityGroupId::from_uuid(Uuid::from_u128(seed)), updates, deleted);
            }
            builder.build()
        },
    )
}

/// Whether a generated chain ended in a delete
pub fn is_deleted(records: &[ChildRecord], group: EntityGroupId) -> bool {
    records
        .iter()
        .filter(|r| r.group_uuid == group)
        .max_by_key(|r| r.version)
        .is_some_and(|r| r.action_type == ActionType::Delete)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_units_are_non_zero(units in units_strategy()) {
            prop_assert_ne!(units, 0);
        }

        #[test]
        fn prop_prices_have_cent_precision(price in price_strategy()) {
            prop_assert!(price.scale() <= 2);
            prop_assert!(!price.is_sign_negative());
        }

        #[test]
        fn prop_chains_start_with_create(records in child_chains_strategy(5)) {
            for record in records.iter().filter(|r| r.version == 0) {
                prop_assert_eq!(record.action_type, ActionType::Create);
            }
        }
    }
}
