//! Renewable-fuel target, lines 1 to 11 per fuel category

use rust_decimal::Decimal;

use core_kernel::{round_half_away, CompliancePeriod, Money};

use super::CalculatorSettings;
use crate::children::{ChildPayload, ChildRecord};
use crate::error::ComplianceError;
use crate::reference::{CategoryValues, FuelCategory, ReferenceData};
use crate::summary::{RenewableLines, SummaryInputs};

/// Litres supplied per category, split by fossil origin
#[derive(Debug, Default, Clone, Copy)]
struct Volumes {
    fossil: Decimal,
    renewable: Decimal,
    notional: Decimal,
}

/// Sums supplied volumes; `children` must already be in canonical order
fn volumes(
    children: &[&ChildRecord],
    reference: &ReferenceData,
) -> Result<CategoryValues<Volumes>, ComplianceError> {
    let mut totals: CategoryValues<Volumes> = CategoryValues::default();
    for child in children {
        let category = child.payload.fuel_category();
        let quantity = child.payload.signed_quantity();
        let fossil = match &child.payload {
            ChildPayload::FuelExport(_) => continue,
            ChildPayload::NotionalTransfer { .. } => {
                totals.get_mut(category).notional += quantity;
                continue;
            }
            ChildPayload::FuelSupply(line) | ChildPayload::AllocationAgreement { line, .. } => {
                reference.fuel_type(line.fuel_type_id)?.fossil_derived
            }
            ChildPayload::OtherUses { fuel_type_id, .. } => reference.fuel_type(*fuel_type_id)?.fossil_derived,
        };
        let entry = totals.get_mut(category);
        if fossil {
            entry.fossil += quantity;
        } else {
            entry.renewable += quantity;
        }
    }
    Ok(totals)
}

fn litres(value: Decimal) -> Decimal {
    round_half_away(value, 0)
}

/// Lines 1 to 11 for one category
fn category_lines(
    category: FuelCategory,
    volumes: Volumes,
    inputs: &SummaryInputs,
    locked_from: Option<&RenewableLines>,
    period: CompliancePeriod,
    settings: &CalculatorSettings,
) -> RenewableLines {
    let line_1 = litres(volumes.fossil);
    let line_2 = litres(volumes.renewable);
    let line_3 = line_1 + line_2;
    let line_4 = litres(line_3 * settings.target_fraction(category, period));
    let line_5 = litres(volumes.notional);

    // Whole litres, never above the fraction of line 4
    let cap = (line_4 * settings.retention_cap_fraction()).floor().max(Decimal::ZERO);
    let supplied = line_2 + line_5;
    let excess = (supplied - line_4).max(Decimal::ZERO);
    let deficiency = (line_4 - supplied).max(Decimal::ZERO);

    let line_6 = inputs.retained.unwrap_or_default().min(excess).min(cap);
    let line_8 = inputs.deferred.unwrap_or_default().min(deficiency).min(cap);
    let (line_7, line_9) = match locked_from {
        Some(parent) => (parent.line_6, parent.line_8),
        None => (
            inputs.previously_retained.unwrap_or_default(),
            inputs.obligation_added.unwrap_or_default(),
        ),
    };

    let line_10 = line_2 + line_5 - line_6 + line_7 + line_8 - line_9;
    let shortfall = (line_4 - line_10).max(Decimal::ZERO);
    let line_11 = Money::new(shortfall * *settings.penalty_rates.get(category)).round_currency();

    RenewableLines {
        line_1,
        line_2,
        line_3,
        line_4,
        line_5,
        line_6,
        line_7,
        line_8,
        line_9,
        line_10,
        line_11,
    }
}

/// Lines 1 to 11 for every category
///
/// `locked_from` carries the assessed parent's lines when lines 7 and 9
/// are locked to its lines 6 and 8.
pub(super) fn renewable_lines(
    children: &[&ChildRecord],
    reference: &ReferenceData,
    inputs: &CategoryValues<SummaryInputs>,
    locked_from: Option<&CategoryValues<RenewableLines>>,
    period: CompliancePeriod,
    settings: &CalculatorSettings,
) -> Result<CategoryValues<RenewableLines>, ComplianceError> {
    let volumes = volumes(children, reference)?;
    Ok(CategoryValues::from_fn(|category| {
        category_lines(
            category,
            *volumes.get(category),
            inputs.get(category),
            locked_from.map(|parent| parent.get(category)),
            period,
            settings,
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn period() -> CompliancePeriod {
        CompliancePeriod::new(2024).unwrap()
    }

    fn volumes(fossil: Decimal, renewable: Decimal, notional: Decimal) -> Volumes {
        Volumes {
            fossil,
            renewable,
            notional,
        }
    }

    #[test]
    fn test_diesel_shortfall_penalty() {
        let lines = category_lines(
            FuelCategory::Diesel,
            volumes(dec!(960000), dec!(30000), Decimal::ZERO),
            &SummaryInputs::default(),
            None,
            period(),
            &CalculatorSettings::default(),
        );
        assert_eq!(lines.line_3, dec!(990000));
        assert_eq!(lines.line_4, dec!(39600));
        assert_eq!(lines.line_10, dec!(30000));
        // 9,600 L short at $0.45
        assert_eq!(lines.line_11, Money::new(dec!(4320.00)));
    }

    #[test]
    fn test_retention_clamped_to_cap() {
        let inputs = SummaryInputs {
            retained: Some(dec!(1000)),
            ..SummaryInputs::default()
        };
        let lines = category_lines(
            FuelCategory::Gasoline,
            volumes(dec!(95000), dec!(10000), Decimal::ZERO),
            &inputs,
            None,
            period(),
            &CalculatorSettings::default(),
        );
        // L4 = 5,250; cap = 262.5 floors to 262; excess = 4,750
        assert_eq!(lines.line_4, dec!(5250));
        assert_eq!(lines.line_6, dec!(262));
        assert!(lines.line_6 <= lines.line_4 * dec!(0.05));
        assert_eq!(lines.line_11, Money::zero());
    }

    #[test]
    fn test_locked_lines_ignore_inputs() {
        let inputs = SummaryInputs {
            previously_retained: Some(dec!(50)),
            obligation_added: Some(dec!(60)),
            ..SummaryInputs::default()
        };
        let parent = RenewableLines {
            line_6: dec!(8),
            line_8: dec!(2),
            ..RenewableLines::default()
        };
        let lines = category_lines(
            FuelCategory::Gasoline,
            volumes(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            &inputs,
            Some(&parent),
            period(),
            &CalculatorSettings::default(),
        );
        assert_eq!((lines.line_7, lines.line_9), (dec!(8), dec!(2)));
    }
}
