//! Ledger entries and balance read model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{OrganizationId, TransactionId};

/// Lifecycle of a ledger entry
///
/// A `Reserved` entry is eventually confirmed into an `Adjustment` or voided
/// as `Released`. `Adjustment` and `Released` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionAction {
    Reserved,
    Adjustment,
    Released,
}

impl TransactionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionAction::Reserved => "Reserved",
            TransactionAction::Adjustment => "Adjustment",
            TransactionAction::Released => "Released",
        }
    }
}

impl fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Reserved" => Ok(TransactionAction::Reserved),
            "Adjustment" => Ok(TransactionAction::Adjustment),
            "Released" => Ok(TransactionAction::Released),
            other => Err(format!("unknown transaction action: {other}")),
        }
    }
}

/// A ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub action: TransactionAction,
    /// Signed; negative means debit
    pub compliance_units: i64,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl Transaction {
    pub fn is_debit(&self) -> bool {
        self.compliance_units < 0
    }

    pub fn is_reserved(&self) -> bool {
        self.action == TransactionAction::Reserved
    }
}

/// Entry to append; the store assigns id and timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub organization_id: OrganizationId,
    pub action: TransactionAction,
    pub compliance_units: i64,
}

/// Read filter for `by_org`
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub action: Option<TransactionAction>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl TransactionFilter {
    pub fn with_action(action: TransactionAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.action.map_or(true, |a| a == transaction.action)
            && self.created_before.map_or(true, |cutoff| transaction.create_date < cutoff)
    }
}

/// Which side of the ledger a sum covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitSign {
    #[default]
    Any,
    Debits,
    Credits,
}

impl UnitSign {
    pub fn admits(&self, units: i64) -> bool {
        match self {
            UnitSign::Any => true,
            UnitSign::Debits => units < 0,
            UnitSign::Credits => units > 0,
        }
    }
}

/// Aggregate query pushed down to the store
#[derive(Debug, Clone)]
pub struct UnitSumQuery {
    pub organization_id: OrganizationId,
    pub action: TransactionAction,
    pub sign: UnitSign,
    /// Exclusive upper bound on `create_date`
    pub created_before: Option<DateTime<Utc>>,
}

impl UnitSumQuery {
    pub fn new(organization_id: OrganizationId, action: TransactionAction) -> Self {
        Self {
            organization_id,
            action,
            sign: UnitSign::Any,
            created_before: None,
        }
    }

    pub fn debits(mut self) -> Self {
        self.sign = UnitSign::Debits;
        self
    }

    pub fn before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        transaction.organization_id == self.organization_id
            && transaction.action == self.action
            && self.sign.admits(transaction.compliance_units)
            && self.created_before.map_or(true, |cutoff| transaction.create_date < cutoff)
    }
}

/// Balance read model for one organization
///
/// Maintained by the ledger after every mutation. Reporting queries read it;
/// admission decisions never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub organization_id: OrganizationId,
    pub committed_units: i64,
    /// Magnitude of outstanding negative reservations
    pub reserved_units: i64,
    pub available_units: i64,
    pub computed_at: DateTime<Utc>,
}

impl BalanceView {
    pub fn new(organization_id: OrganizationId, committed_units: i64, reserved_units: i64) -> Self {
        Self {
            organization_id,
            committed_units,
            reserved_units,
            available_units: committed_units - reserved_units,
            computed_at: Utc::now(),
        }
    }

    /// Balance figures only, ignoring when they were computed
    pub fn same_figures(&self, other: &BalanceView) -> bool {
        self.organization_id == other.organization_id
            && self.committed_units == other.committed_units
            && self.reserved_units == other.reserved_units
            && self.available_units == other.available_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: TransactionAction, units: i64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: TransactionId::new(1),
            organization_id: OrganizationId::new(1),
            action,
            compliance_units: units,
            create_date: now,
            update_date: now,
        }
    }

    #[test]
    fn test_action_parse_round_trip() {
        for action in [TransactionAction::Reserved, TransactionAction::Adjustment, TransactionAction::Released] {
            assert_eq!(action.as_str().parse::<TransactionAction>().unwrap(), action);
        }
        assert!("Pending".parse::<TransactionAction>().is_err());
    }

    #[test]
    fn test_sum_query_matching() {
        let query = UnitSumQuery::new(OrganizationId::new(1), TransactionAction::Reserved).debits();
        assert!(query.matches(&entry(TransactionAction::Reserved, -10)));
        assert!(!query.matches(&entry(TransactionAction::Reserved, 10)));
        assert!(!query.matches(&entry(TransactionAction::Adjustment, -10)));
    }

    #[test]
    fn test_sum_query_cutoff_is_exclusive() {
        let tx = entry(TransactionAction::Adjustment, 5);
        let query = UnitSumQuery::new(OrganizationId::new(1), TransactionAction::Adjustment).before(tx.create_date);
        assert!(!query.matches(&tx));
    }

    #[test]
    fn test_balance_view_available() {
        let view = BalanceView::new(OrganizationId::new(1), 50_000, 17_639);
        assert_eq!(view.available_units, 32_361);
    }
}
