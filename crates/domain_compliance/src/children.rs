//! Report child records and their version chains
//!
//! Fuel supplies, exports, notional transfers, other uses and allocation
//! agreements are never updated in place. Each write appends a row to the
//! record's entity group with the next version and an action type; the
//! effective set of a report is derived from those chains.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use validator::{Validate, ValidationError};

use core_kernel::{ChildRecordId, ComplianceReportId, EntityGroupId};

use crate::error::ComplianceError;
use crate::reference::FuelCategory;

/// Which child table a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChildKind {
    FuelSupply,
    FuelExport,
    NotionalTransfer,
    OtherUses,
    AllocationAgreement,
}

impl ChildKind {
    pub const ALL: [ChildKind; 5] = [
        ChildKind::FuelSupply,
        ChildKind::FuelExport,
        ChildKind::NotionalTransfer,
        ChildKind::OtherUses,
        ChildKind::AllocationAgreement,
    ];

    /// Also the name of the kind's table
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::FuelSupply => "fuel_supply",
            ChildKind::FuelExport => "fuel_export",
            ChildKind::NotionalTransfer => "notional_transfer",
            ChildKind::OtherUses => "other_uses",
            ChildKind::AllocationAgreement => "allocation_agreement",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a version did to its entity group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "CREATE",
            ActionType::Update => "UPDATE",
            ActionType::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(ActionType::Create),
            "UPDATE" => Ok(ActionType::Update),
            "DELETE" => Ok(ActionType::Delete),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

/// Direction of a notional transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotionalDirection {
    Received,
    Transferred,
}

/// Direction of an allocation agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationDirection {
    Purchased,
    Sold,
}

/// A quantity of one fuel type supplied under a provision of the act
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FuelLine {
    pub fuel_type_id: i32,
    pub fuel_category: FuelCategory,
    pub end_use_id: Option<i32>,
    #[validate(length(min = 1, max = 500))]
    pub provision_of_the_act: String,
    /// Set when the CI comes from an approved fuel code
    pub fuel_code_id: Option<i32>,
    /// Carbon intensity entered by the supplier; the fuel type default applies when absent
    #[validate(custom(function = "non_negative"))]
    pub ci_of_fuel: Option<Decimal>,
    #[validate(custom(function = "non_negative"))]
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 20))]
    pub units: String,
}

fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        return Err(ValidationError::new("negative").with_message("must not be negative".into()));
    }
    Ok(())
}

/// Business fields of a child record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChildPayload {
    FuelSupply(FuelLine),
    FuelExport(FuelLine),
    NotionalTransfer {
        legal_name: String,
        fuel_category: FuelCategory,
        quantity: Decimal,
        direction: NotionalDirection,
    },
    OtherUses {
        fuel_type_id: i32,
        fuel_category: FuelCategory,
        quantity: Decimal,
        expected_use: String,
    },
    AllocationAgreement {
        partner: String,
        direction: AllocationDirection,
        line: FuelLine,
    },
}

impl ChildPayload {
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildPayload::FuelSupply(_) => ChildKind::FuelSupply,
            ChildPayload::FuelExport(_) => ChildKind::FuelExport,
            ChildPayload::NotionalTransfer { .. } => ChildKind::NotionalTransfer,
            ChildPayload::OtherUses { .. } => ChildKind::OtherUses,
            ChildPayload::AllocationAgreement { .. } => ChildKind::AllocationAgreement,
        }
    }

    /// Fuel line the compliance-unit formula applies to
    pub fn fuel_line(&self) -> Option<&FuelLine> {
        match self {
            ChildPayload::FuelSupply(line) | ChildPayload::FuelExport(line) => Some(line),
            ChildPayload::AllocationAgreement { line, .. } => Some(line),
            ChildPayload::NotionalTransfer { .. } | ChildPayload::OtherUses { .. } => None,
        }
    }

    pub fn fuel_category(&self) -> FuelCategory {
        match self {
            ChildPayload::FuelSupply(line) | ChildPayload::FuelExport(line) => line.fuel_category,
            ChildPayload::AllocationAgreement { line, .. } => line.fuel_category,
            ChildPayload::NotionalTransfer { fuel_category, .. } => *fuel_category,
            ChildPayload::OtherUses { fuel_category, .. } => *fuel_category,
        }
    }

    /// Fuel type used for ordering keyed sums; notional transfers have none
    pub fn fuel_type_id(&self) -> i32 {
        match self {
            ChildPayload::FuelSupply(line) | ChildPayload::FuelExport(line) => line.fuel_type_id,
            ChildPayload::AllocationAgreement { line, .. } => line.fuel_type_id,
            ChildPayload::OtherUses { fuel_type_id, .. } => *fuel_type_id,
            ChildPayload::NotionalTransfer { .. } => 0,
        }
    }

    /// Quantity with the sign its direction implies
    pub fn signed_quantity(&self) -> Decimal {
        match self {
            ChildPayload::FuelSupply(line) | ChildPayload::FuelExport(line) => line.quantity,
            ChildPayload::OtherUses { quantity, .. } => *quantity,
            ChildPayload::NotionalTransfer { quantity, direction, .. } => match direction {
                NotionalDirection::Received => *quantity,
                NotionalDirection::Transferred => -*quantity,
            },
            ChildPayload::AllocationAgreement { line, direction, .. } => match direction {
                AllocationDirection::Purchased => line.quantity,
                AllocationDirection::Sold => -line.quantity,
            },
        }
    }

    /// Rejects negative quantities and empty required text
    pub fn validate(&self) -> Result<(), ComplianceError> {
        let quantity = match self {
            ChildPayload::FuelSupply(_) | ChildPayload::FuelExport(_) => None,
            ChildPayload::AllocationAgreement { partner, .. } => {
                if partner.trim().is_empty() {
                    return Err(ComplianceError::validation("allocation partner is required"));
                }
                None
            }
            ChildPayload::NotionalTransfer { quantity, legal_name, .. } => {
                if legal_name.trim().is_empty() {
                    return Err(ComplianceError::validation("trading partner legal name is required"));
                }
                Some(*quantity)
            }
            ChildPayload::OtherUses { quantity, .. } => Some(*quantity),
        };
        if let Some(quantity) = quantity {
            non_negative(&quantity)
                .map_err(|_| ComplianceError::validation(format!("{} quantity must not be negative", self.kind())))?;
        }
        if let Some(line) = self.fuel_line() {
            line.validate()
                .map_err(|e| ComplianceError::validation(format!("{}: {e}", self.kind())))?;
        }
        Ok(())
    }
}

/// Values derived on write by the compliance-unit formula
///
/// Frozen with the record so later reference-table changes do not move a
/// submitted report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedUnits {
    pub target_ci: Decimal,
    pub eer: Decimal,
    pub ci_of_fuel: Decimal,
    pub uci: Option<Decimal>,
    pub energy_density: Decimal,
    /// MJ
    pub energy: Decimal,
    pub compliance_units: i64,
}

/// One version of one child entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub id: ChildRecordId,
    pub report_id: ComplianceReportId,
    pub group_uuid: EntityGroupId,
    pub version: i32,
    pub action_type: ActionType,
    /// Materialized membership in the report's effective set
    pub is_effective: bool,
    pub payload: ChildPayload,
    pub derived: Option<DerivedUnits>,
    pub create_date: DateTime<Utc>,
}

impl ChildRecord {
    pub fn kind(&self) -> ChildKind {
        self.payload.kind()
    }

    /// Compliance units this record contributes, zero when none were derived
    pub fn compliance_units(&self) -> i64 {
        self.derived.as_ref().map_or(0, |d| d.compliance_units)
    }
}

/// A child row to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewChildRecord {
    pub report_id: ComplianceReportId,
    pub group_uuid: EntityGroupId,
    pub version: i32,
    pub action_type: ActionType,
    pub payload: ChildPayload,
    pub derived: Option<DerivedUnits>,
}

impl NewChildRecord {
    /// Version 0 of a new entity group
    pub fn create(report_id: ComplianceReportId, payload: ChildPayload, derived: Option<DerivedUnits>) -> Self {
        Self {
            report_id,
            group_uuid: EntityGroupId::new(),
            version: 0,
            action_type: ActionType::Create,
            payload,
            derived,
        }
    }

    /// Copy of an existing version attached to another report
    pub fn carried_forward(record: &ChildRecord, report_id: ComplianceReportId) -> Self {
        Self {
            report_id,
            group_uuid: record.group_uuid,
            version: record.version,
            action_type: record.action_type,
            payload: record.payload.clone(),
            derived: record.derived.clone(),
        }
    }

    /// Next version of a group, checked against the version the caller last saw
    pub fn next_version(
        head: &ChildRecord,
        expected_version: i32,
        action_type: ActionType,
        payload: ChildPayload,
        derived: Option<DerivedUnits>,
    ) -> Result<Self, ComplianceError> {
        if head.version != expected_version {
            return Err(ComplianceError::conflict(format!(
                "{} {} is at version {}, not {expected_version}; reload and retry",
                head.kind(),
                head.group_uuid,
                head.version
            )));
        }
        if head.action_type == ActionType::Delete {
            return Err(ComplianceError::invalid_state(format!(
                "{} {} has been deleted",
                head.kind(),
                head.group_uuid
            )));
        }
        if payload.kind() != head.kind() {
            return Err(ComplianceError::validation(format!(
                "cannot replace a {} with a {}",
                head.kind(),
                payload.kind()
            )));
        }
        Ok(Self {
            report_id: head.report_id,
            group_uuid: head.group_uuid,
            version: head.version + 1,
            action_type,
            payload,
            derived,
        })
    }
}

/// Highest version of the given entity group among `records`
pub fn group_head(records: &[ChildRecord], group: EntityGroupId) -> Option<&ChildRecord> {
    records
        .iter()
        .filter(|r| r.group_uuid == group)
        .max_by_key(|r| (r.version, r.id))
}

/// Effective set of a report's child records
///
/// For each entity group the highest version wins; a group whose head is a
/// DELETE contributes nothing. Output is ordered by group, then kind.
pub fn effective_set(records: &[ChildRecord]) -> Vec<&ChildRecord> {
    let mut heads: BTreeMap<EntityGroupId, &ChildRecord> = BTreeMap::new();
    for record in records {
        match heads.get(&record.group_uuid) {
            Some(head) if (head.version, head.id) >= (record.version, record.id) => {}
            _ => {
                heads.insert(record.group_uuid, record);
            }
        }
    }
    heads
        .into_values()
        .filter(|head| head.action_type != ActionType::Delete)
        .collect()
}

/// Ids of the records in the effective set
pub fn effective_ids(records: &[ChildRecord]) -> Vec<ChildRecordId> {
    let mut ids: Vec<ChildRecordId> = effective_set(records).into_iter().map(|r| r.id).collect();
    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn supply(quantity: Decimal) -> ChildPayload {
        ChildPayload::FuelSupply(FuelLine {
            fuel_type_id: 1,
            fuel_category: FuelCategory::Diesel,
            end_use_id: None,
            provision_of_the_act: "Default carbon intensity".into(),
            fuel_code_id: None,
            ci_of_fuel: None,
            quantity,
            units: "L".into(),
        })
    }

    fn record(id: i64, group: EntityGroupId, version: i32, action_type: ActionType, quantity: Decimal) -> ChildRecord {
        ChildRecord {
            id: ChildRecordId::new(id),
            report_id: ComplianceReportId::new(1),
            group_uuid: group,
            version,
            action_type,
            is_effective: false,
            payload: supply(quantity),
            derived: None,
            create_date: Utc::now(),
        }
    }

    #[test]
    fn test_fuel_line_field_rules() {
        assert!(supply(dec!(0)).validate().is_ok());
        assert!(matches!(supply(dec!(-1)).validate(), Err(ComplianceError::Validation(_))));

        let mut line = match supply(dec!(10)) {
            ChildPayload::FuelSupply(line) => line,
            _ => unreachable!(),
        };
        line.ci_of_fuel = Some(dec!(-0.5));
        assert!(line.validate().is_err());
        line.ci_of_fuel = Some(dec!(12.5));
        line.units = String::new();
        let errors = line.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("units"));
    }

    #[test]
    fn test_update_supersedes_create() {
        let group = EntityGroupId::new();
        let records = vec![
            record(1, group, 0, ActionType::Create, dec!(100)),
            record(2, group, 1, ActionType::Update, dec!(150)),
        ];
        let effective = effective_set(&records);
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].payload.signed_quantity(), dec!(150));
    }

    #[test]
    fn test_stale_version_conflicts() {
        let group = EntityGroupId::new();
        let records = vec![
            record(1, group, 0, ActionType::Create, dec!(100)),
            record(2, group, 1, ActionType::Update, dec!(150)),
        ];
        let head = group_head(&records, group).unwrap();
        let err = NewChildRecord::next_version(head, 0, ActionType::Update, supply(dec!(1)), None).unwrap_err();
        assert!(matches!(err, ComplianceError::Conflict(_)));

        let next = NewChildRecord::next_version(head, 1, ActionType::Delete, supply(dec!(150)), None).unwrap();
        assert_eq!(next.version, 2);
    }

    #[test]
    fn test_negative_quantity_rejected() {
        assert!(supply(dec!(-1)).validate().is_err());
        assert!(supply(dec!(0)).validate().is_ok());
    }

    #[test]
    fn test_signed_quantities() {
        let transferred = ChildPayload::NotionalTransfer {
            legal_name: "Partner Ltd".into(),
            fuel_category: FuelCategory::Gasoline,
            quantity: dec!(40),
            direction: NotionalDirection::Transferred,
        };
        assert_eq!(transferred.signed_quantity(), dec!(-40));
    }
}
