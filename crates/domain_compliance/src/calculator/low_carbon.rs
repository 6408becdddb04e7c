//! Low-carbon-fuel target, lines 12 to 22

use core_kernel::Money;
use rust_decimal::Decimal;

use super::CalculatorSettings;
use crate::children::{ChildKind, ChildRecord};
use crate::summary::{LowCarbonLines, ReportSummary};

/// Ledger balances the summary projects from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceInputs {
    /// Committed units at the start of the compliance period
    pub at_period_start: i64,
    /// Committed units at the period's compliance deadline
    pub at_deadline: i64,
}

pub(super) fn low_carbon_lines(
    children: &[&ChildRecord],
    parent: Option<&ReportSummary>,
    balances: BalanceInputs,
    settings: &CalculatorSettings,
) -> LowCarbonLines {
    let mut credits = 0i64;
    let mut debits = 0i64;
    let mut supply_units = 0i64;
    let mut export_units = 0i64;

    for child in children {
        let units = child.compliance_units();
        match child.kind() {
            ChildKind::FuelSupply | ChildKind::AllocationAgreement => {
                supply_units += units;
                if units > 0 {
                    credits += units;
                } else {
                    debits += units;
                }
            }
            ChildKind::FuelExport => {
                export_units += units;
                debits += units;
            }
            ChildKind::NotionalTransfer | ChildKind::OtherUses => {}
        }
    }

    let line_12 = credits;
    let line_13 = debits.abs();
    let line_14 = line_12 - line_13;
    let (line_15, line_16) = parent.map_or((0, 0), |p| (p.low_carbon.line_18, p.low_carbon.line_19));
    let line_17 = balances.at_period_start;
    // Net debits are not issued; they reach the ledger through line 20
    let line_18 = supply_units.max(0);
    let line_19 = export_units;
    let line_20 = line_14 - parent.map_or(0, |p| p.low_carbon.line_14);
    let line_22 = balances.at_deadline + line_20;
    let line_21 = if line_22 < 0 {
        Money::new(Decimal::from(line_22.unsigned_abs()) * settings.low_carbon_penalty_per_unit).round_currency()
    } else {
        Money::zero()
    };

    LowCarbonLines {
        line_12,
        line_13,
        line_14,
        line_15,
        line_16,
        line_17,
        line_18,
        line_19,
        line_20,
        line_21,
        line_22,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::{ActionType, ChildPayload, DerivedUnits, FuelLine};
    use crate::reference::FuelCategory;
    use core_kernel::{ChildRecordId, ComplianceReportId, EntityGroupId};

    #[test]
    fn test_supplemental_reports_only_the_change() {
        let mut parent = ReportSummary::empty(ComplianceReportId::new(1));
        parent.low_carbon.line_14 = 800;
        parent.low_carbon.line_18 = 1_000;
        parent.low_carbon.line_19 = -200;

        let lines = low_carbon_lines(
            &[],
            Some(&parent),
            BalanceInputs {
                at_period_start: 5_000,
                at_deadline: 6_000,
            },
            &CalculatorSettings::default(),
        );
        assert_eq!((lines.line_15, lines.line_16), (1_000, -200));
        assert_eq!(lines.line_20, -800);
        assert_eq!(lines.line_22, 5_200);
        assert_eq!(lines.line_21, Money::zero());
    }

    #[test]
    fn test_deficit_penalty() {
        let lines = low_carbon_lines(
            &[],
            None,
            BalanceInputs {
                at_period_start: 0,
                at_deadline: -3,
            },
            &CalculatorSettings::default(),
        );
        assert_eq!(lines.line_21, Money::from_cents(180_000));
    }

    fn fuel_record(kind: fn(FuelLine) -> ChildPayload, units: i64) -> ChildRecord {
        ChildRecord {
            id: ChildRecordId::new(units.abs()),
            report_id: ComplianceReportId::new(1),
            group_uuid: EntityGroupId::new(),
            version: 0,
            action_type: ActionType::Create,
            is_effective: true,
            payload: kind(FuelLine {
                fuel_type_id: 1,
                fuel_category: FuelCategory::Diesel,
                end_use_id: None,
                provision_of_the_act: "Default carbon intensity".into(),
                fuel_code_id: None,
                ci_of_fuel: None,
                quantity: Decimal::from(units.abs()),
                units: "L".into(),
            }),
            derived: Some(DerivedUnits {
                ci_of_fuel: Decimal::ZERO,
                energy_density: Decimal::ZERO,
                energy: Decimal::ZERO,
                eer: Decimal::ONE,
                uci: None,
                target_ci: Decimal::ZERO,
                compliance_units: units,
            }),
            create_date: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_net_supply_debits_issue_nothing() {
        let records = [fuel_record(ChildPayload::FuelSupply, 50), fuel_record(ChildPayload::FuelSupply, -250)];
        let children: Vec<&ChildRecord> = records.iter().collect();
        let lines = low_carbon_lines(
            &children,
            None,
            BalanceInputs {
                at_period_start: 1_000,
                at_deadline: 1_000,
            },
            &CalculatorSettings::default(),
        );
        assert_eq!((lines.line_12, lines.line_13, lines.line_14), (50, 250, -200));
        assert_eq!(lines.line_18, 0);
        assert_eq!(lines.line_20, -200);
        assert_eq!(lines.line_22, 800);
    }
}
