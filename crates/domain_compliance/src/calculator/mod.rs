//! Summary calculator
//!
//! A pure function of the report, its effective child records, the
//! previously assessed report of its group and the reference tables.
//! Records are put in canonical order (fuel category, fuel type, action
//! type, entity group) before any sum so rounding is reproducible.
//!
//! # Line locks
//!
//! | Version | Initiator | Lines 7 and 9 | Lines 15 and 16 |
//! |---|---|---|---|
//! | 0 | any | supplier input | 0 |
//! | ≥ 1 | Supplier, Government | parent's 6 and 8, locked | parent's 18 and 19 |
//! | ≥ 1 | Analyst adjustment, period ≥ lock year | parent's 6 and 8, locked | parent's 18 and 19 |
//! | ≥ 1 | Analyst adjustment, earlier period | prefilled, editable | parent's 18 and 19 |

mod low_carbon;
mod renewable;
mod settings;

pub use low_carbon::BalanceInputs;
pub use settings::CalculatorSettings;

use std::time::Instant;
use tracing::{debug, instrument};

use core_kernel::{ComplianceReportId, CompliancePeriod};

use crate::children::ChildRecord;
use crate::error::ComplianceError;
use crate::reference::{CategoryValues, ReferenceData};
use crate::status::SupplementalInitiator;
use crate::summary::{ReportSummary, SummaryInputs};

/// Everything one summary computation reads
#[derive(Debug, Clone)]
pub struct CalculationInput<'a> {
    pub report_id: ComplianceReportId,
    pub period: CompliancePeriod,
    pub version: i32,
    pub initiator: Option<SupplementalInitiator>,
    /// The report's effective child records
    pub children: &'a [ChildRecord],
    pub reference: &'a ReferenceData,
    /// Latest assessed report of the group; ignored for version 0
    pub parent: Option<&'a ReportSummary>,
    pub inputs: CategoryValues<SummaryInputs>,
    pub balances: BalanceInputs,
}

/// Computes 22-line summaries
#[derive(Debug, Clone, Default)]
pub struct SummaryCalculator {
    settings: CalculatorSettings,
}

impl SummaryCalculator {
    pub fn new(settings: CalculatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CalculatorSettings {
        &self.settings
    }

    /// Whether lines 7 and 9 of a version are locked to its parent's lines 6 and 8
    pub fn retention_lines_locked(
        &self,
        version: i32,
        initiator: Option<SupplementalInitiator>,
        period: CompliancePeriod,
        has_parent: bool,
    ) -> bool {
        if version < 1 || !has_parent {
            return false;
        }
        match initiator {
            Some(SupplementalInitiator::Supplier) | Some(SupplementalInitiator::Government) => true,
            Some(SupplementalInitiator::AnalystAdjustment) => period.is_at_least(self.settings.analyst_line_lock_year),
            None => false,
        }
    }

    /// Computes an unlocked summary
    ///
    /// Checks `deadline` between phases; nothing is written by the
    /// calculator, so an aborted run leaves the stored snapshot untouched.
    #[instrument(skip(self, input), fields(report_id = %input.report_id, children = input.children.len()))]
    pub fn calculate(
        &self,
        input: &CalculationInput<'_>,
        deadline: Option<Instant>,
    ) -> Result<ReportSummary, ComplianceError> {
        let parent = if input.version >= 1 { input.parent } else { None };

        let mut ordered: Vec<&ChildRecord> = input.children.iter().collect();
        ordered.sort_by_key(|c| {
            (
                c.payload.fuel_category(),
                c.payload.fuel_type_id(),
                c.action_type,
                c.group_uuid,
                c.version,
            )
        });
        check_deadline(deadline, "ordering")?;

        let locked = self.retention_lines_locked(input.version, input.initiator, input.period, parent.is_some());
        let renewable = renewable::renewable_lines(
            &ordered,
            input.reference,
            &input.inputs,
            parent.filter(|_| locked).map(|p| &p.renewable),
            input.period,
            &self.settings,
        )?;
        check_deadline(deadline, "renewable target")?;

        let low_carbon = low_carbon::low_carbon_lines(&ordered, parent, input.balances, &self.settings);
        check_deadline(deadline, "low carbon target")?;

        debug!(line_20 = low_carbon.line_20, line_22 = low_carbon.line_22, "summary computed");
        Ok(ReportSummary {
            report_id: input.report_id,
            renewable,
            low_carbon,
            inputs: input.inputs,
            is_locked: false,
            lines_7_and_9_locked: locked,
            computed_at: None,
        })
    }
}

fn check_deadline(deadline: Option<Instant>, phase: &'static str) -> Result<(), ComplianceError> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(ComplianceError::DeadlineExceeded { phase }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(year: i32) -> CompliancePeriod {
        CompliancePeriod::new(year).unwrap()
    }

    #[test]
    fn test_retention_lock_rules() {
        let calc = SummaryCalculator::default();
        assert!(!calc.retention_lines_locked(0, None, period(2025), false));
        assert!(calc.retention_lines_locked(1, Some(SupplementalInitiator::Supplier), period(2024), true));
        assert!(calc.retention_lines_locked(2, Some(SupplementalInitiator::Government), period(2024), true));
        assert!(!calc.retention_lines_locked(1, Some(SupplementalInitiator::AnalystAdjustment), period(2024), true));
        assert!(calc.retention_lines_locked(1, Some(SupplementalInitiator::AnalystAdjustment), period(2025), true));
        assert!(!calc.retention_lines_locked(1, Some(SupplementalInitiator::Supplier), period(2025), false));
    }

    #[test]
    fn test_passed_deadline_aborts() {
        let calc = SummaryCalculator::default();
        let reference = ReferenceData::default();
        let input = CalculationInput {
            report_id: ComplianceReportId::new(1),
            period: period(2024),
            version: 0,
            initiator: None,
            children: &[],
            reference: &reference,
            parent: None,
            inputs: CategoryValues::default(),
            balances: BalanceInputs::default(),
        };
        let err = calc.calculate(&input, Some(Instant::now())).unwrap_err();
        assert!(matches!(err, ComplianceError::DeadlineExceeded { phase: "ordering" }));
        assert!(calc.calculate(&input, None).is_ok());
    }

    #[test]
    fn test_calculate_is_deterministic() {
        let calc = SummaryCalculator::default();
        let reference = ReferenceData::default();
        let input = CalculationInput {
            report_id: ComplianceReportId::new(1),
            period: period(2024),
            version: 0,
            initiator: None,
            children: &[],
            reference: &reference,
            parent: None,
            inputs: CategoryValues::default(),
            balances: BalanceInputs {
                at_period_start: 100,
                at_deadline: 120,
            },
        };
        let first = calc.calculate(&input, None).unwrap();
        assert_eq!(first, calc.calculate(&input, None).unwrap());
        assert_eq!(first.computed_at, None);
    }
}
