//! Assertion helpers for ledger and report invariants

use std::collections::BTreeMap;

use core_kernel::EntityGroupId;
use domain_compliance::{effective_set, ChildRecord};
use domain_ledger::BalanceView;

/// Available = committed - reserved, and never negative
pub fn assert_balance_consistent(view: &BalanceView) {
    assert_eq!(
        view.available_units,
        view.committed_units - view.reserved_units,
        "available must equal committed minus reserved for {}",
        view.organization_id
    );
    assert!(
        view.available_units >= 0,
        "{} has negative available balance {}",
        view.organization_id,
        view.available_units
    );
}

/// Stored view and a full replay agree on every figure
pub fn assert_replay_matches(stored: &BalanceView, replayed: &BalanceView) {
    assert!(
        stored.same_figures(replayed),
        "stored balance {stored:?} differs from replay {replayed:?}"
    );
}

/// At most one effective record per group, and none for deleted groups
pub fn assert_effective_set_sound(records: &[ChildRecord]) {
    let effective = effective_set(records);
    let mut seen: BTreeMap<EntityGroupId, usize> = BTreeMap::new();
    for record in &effective {
        *seen.entry(record.group_uuid).or_default() += 1;
        assert_ne!(
            record.action_type,
            domain_compliance::ActionType::Delete,
            "deleted group {} is effective",
            record.group_uuid
        );
    }
    for (group, count) in seen {
        assert_eq!(count, 1, "group {group} has {count} effective records");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::ChildChainBuilder;
    use core_kernel::OrganizationId;

    #[test]
    fn test_balance_identity() {
        assert_balance_consistent(&BalanceView::new(OrganizationId::new(1), 100, 40));
    }

    #[test]
    #[should_panic(expected = "negative available")]
    fn test_negative_available_panics() {
        assert_balance_consistent(&BalanceView::new(OrganizationId::new(1), 10, 40));
    }

    #[test]
    fn test_effective_set_of_deleted_chain_is_empty() {
        let records = ChildChainBuilder::for_report(1).chain(EntityGroupId::new(), 1, true).build();
        assert_effective_set_sound(&records);
        assert!(effective_set(&records).is_empty());
    }
}
