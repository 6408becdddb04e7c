//! The 22-line compliance report summary

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{ComplianceReportId, Money};

use crate::error::ComplianceError;
use crate::reference::CategoryValues;

/// Renewable-fuel target lines for one fuel category, in litres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenewableLines {
    /// Fossil-derived base fuel supplied
    pub line_1: Decimal,
    /// Eligible renewable fuel supplied
    pub line_2: Decimal,
    /// Total tracked fuel supplied
    pub line_3: Decimal,
    /// Eligible renewable fuel required
    pub line_4: Decimal,
    /// Net notionally transferred
    pub line_5: Decimal,
    /// Retained for the next period
    pub line_6: Decimal,
    /// Previously retained
    pub line_7: Decimal,
    /// Obligation deferred
    pub line_8: Decimal,
    /// Obligation added
    pub line_9: Decimal,
    /// Net renewable fuel supplied
    pub line_10: Decimal,
    /// Non-compliance penalty
    pub line_11: Money,
}

/// Low-carbon-fuel target lines, in compliance units unless noted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LowCarbonLines {
    pub line_12: i64,
    pub line_13: i64,
    pub line_14: i64,
    pub line_15: i64,
    pub line_16: i64,
    pub line_17: i64,
    pub line_18: i64,
    pub line_19: i64,
    /// Balance change from assessment
    pub line_20: i64,
    /// Non-compliance penalty
    pub line_21: Money,
    pub line_22: i64,
}

/// Supplier-entered values for lines 6 to 9 of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryInputs {
    pub retained: Option<Decimal>,
    pub previously_retained: Option<Decimal>,
    pub deferred: Option<Decimal>,
    pub obligation_added: Option<Decimal>,
}

impl SummaryInputs {
    pub fn validate(&self) -> Result<(), ComplianceError> {
        let fields = [
            ("line 6", self.retained),
            ("line 7", self.previously_retained),
            ("line 8", self.deferred),
            ("line 9", self.obligation_added),
        ];
        for (name, value) in fields {
            if value.is_some_and(|v| v.is_sign_negative() && !v.is_zero()) {
                return Err(ComplianceError::validation(format!("{name} must not be negative")));
            }
        }
        Ok(())
    }

    /// Lines 7 and 9 taken from another summary's lines 6 and 8
    pub fn carry_retention(&mut self, from: &RenewableLines) {
        self.previously_retained = Some(from.line_6);
        self.obligation_added = Some(from.line_8);
    }
}

/// Summary snapshot of one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub report_id: ComplianceReportId,
    pub renewable: CategoryValues<RenewableLines>,
    pub low_carbon: LowCarbonLines,
    pub inputs: CategoryValues<SummaryInputs>,
    /// Stored values are returned verbatim while set
    pub is_locked: bool,
    pub lines_7_and_9_locked: bool,
    pub computed_at: Option<DateTime<Utc>>,
}

impl ReportSummary {
    /// Blank, unlocked summary
    pub fn empty(report_id: ComplianceReportId) -> Self {
        Self {
            report_id,
            renewable: CategoryValues::default(),
            low_carbon: LowCarbonLines::default(),
            inputs: CategoryValues::default(),
            is_locked: false,
            lines_7_and_9_locked: false,
            computed_at: None,
        }
    }

    pub fn line_20(&self) -> i64 {
        self.low_carbon.line_20
    }

    /// Total penalty across the renewable and low-carbon targets
    pub fn total_penalty(&self) -> Money {
        self.renewable.iter().map(|(_, lines)| lines.line_11).sum::<Money>() + self.low_carbon.line_21
    }

    /// Same computed lines, ignoring lock flags and timestamps
    pub fn same_lines(&self, other: &ReportSummary) -> bool {
        self.renewable == other.renewable && self.low_carbon == other.low_carbon
    }

    /// Sets `computed_at`, keeping `previous`'s stamp when nothing else changed
    pub fn stamped(mut self, previous: Option<&ReportSummary>, now: DateTime<Utc>) -> Self {
        self.computed_at = match previous {
            Some(p) if ReportSummary { computed_at: p.computed_at, ..self.clone() } == *p => p.computed_at,
            _ => Some(now),
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_negative_inputs_rejected() {
        let inputs = SummaryInputs {
            retained: Some(dec!(-5)),
            ..SummaryInputs::default()
        };
        assert!(inputs.validate().is_err());
        assert!(SummaryInputs::default().validate().is_ok());
    }

    #[test]
    fn test_total_penalty() {
        let mut summary = ReportSummary::empty(ComplianceReportId::new(1));
        summary.renewable.diesel.line_11 = Money::new(dec!(45.00));
        summary.low_carbon.line_21 = Money::new(dec!(600.00));
        assert_eq!(summary.total_penalty(), Money::new(dec!(645.00)));
    }

    #[test]
    fn test_stamp_kept_while_unchanged() {
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let now = Utc::now();
        let stored = ReportSummary::empty(ComplianceReportId::new(1)).stamped(None, earlier);
        assert_eq!(stored.computed_at, Some(earlier));

        let same = ReportSummary::empty(ComplianceReportId::new(1)).stamped(Some(&stored), now);
        assert_eq!(same, stored);

        let mut changed = ReportSummary::empty(ComplianceReportId::new(1));
        changed.low_carbon.line_20 = -5;
        assert_eq!(changed.stamped(Some(&stored), now).computed_at, Some(now));
    }
}
