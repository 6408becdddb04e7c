//! Per-record compliance-unit formula
//!
//! ```text
//! units = round((TCI × EER − (RCI + UCI)) × (Q × ED) / 1_000_000)
//! ```
//!
//! UCI is left out for periods before the legislation transition year.
//! Exports are debits: the result is negated and never positive.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{round_half_away, round_to_i64, CompliancePeriod};

use crate::calculator::CalculatorSettings;
use crate::children::{AllocationDirection, ChildPayload, DerivedUnits, FuelLine};
use crate::error::ComplianceError;
use crate::reference::ReferenceData;

const MJ_PER_TONNE_CREDIT: Decimal = dec!(1000000);

/// Inputs of the formula for one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitFormula {
    pub target_ci: Decimal,
    pub eer: Decimal,
    pub ci_of_fuel: Decimal,
    pub uci: Option<Decimal>,
    pub quantity: Decimal,
    pub energy_density: Decimal,
}

impl UnitFormula {
    /// Q × ED, rejected once it reaches `max_energy`
    pub fn energy(&self, max_energy: Decimal) -> Result<Decimal, ComplianceError> {
        let energy = self
            .quantity
            .checked_mul(self.energy_density)
            .ok_or(ComplianceError::QuantityOutOfRange {
                field: "quantity",
                value: self.quantity,
            })?;
        if energy.abs() >= max_energy {
            return Err(ComplianceError::QuantityOutOfRange {
                field: "quantity",
                value: self.quantity,
            });
        }
        Ok(energy)
    }

    /// Compliance units before any export or allocation sign is applied
    pub fn compliance_units(&self, max_energy: Decimal) -> Result<i64, ComplianceError> {
        let energy = self.energy(max_energy)?;
        let intensity_gap = self.target_ci * self.eer - (self.ci_of_fuel + self.uci.unwrap_or(Decimal::ZERO));
        let overflow = || ComplianceError::QuantityOutOfRange {
            field: "quantity",
            value: self.quantity,
        };
        let raw = intensity_gap.checked_mul(energy).ok_or_else(overflow)? / MJ_PER_TONNE_CREDIT;
        round_to_i64(raw).ok_or_else(overflow)
    }
}

/// Builds the formula inputs for a fuel line from the reference tables
///
/// A fuel-code CI wins over the supplier's CI, which wins over the fuel type default.
pub fn formula_for(
    line: &FuelLine,
    reference: &ReferenceData,
    period: CompliancePeriod,
    settings: &CalculatorSettings,
) -> Result<UnitFormula, ComplianceError> {
    let fuel_type = reference.fuel_type(line.fuel_type_id)?;
    let ci_of_fuel = match line.fuel_code_id {
        Some(code) => reference.fuel_code_ci(code)?,
        None => line.ci_of_fuel.unwrap_or(fuel_type.default_ci),
    };
    let uci = settings
        .includes_uci(period)
        .then(|| reference.uci(line.fuel_type_id, line.end_use_id));
    Ok(UnitFormula {
        target_ci: reference.target_ci(line.fuel_category, period)?,
        eer: reference.eer(line.fuel_type_id, line.end_use_id),
        ci_of_fuel,
        uci,
        quantity: line.quantity,
        energy_density: fuel_type.energy_density,
    })
}

/// Derives the frozen unit fields for a child payload
///
/// Notional transfers and other uses carry no compliance units.
pub fn derive_units(
    payload: &ChildPayload,
    reference: &ReferenceData,
    period: CompliancePeriod,
    settings: &CalculatorSettings,
) -> Result<Option<DerivedUnits>, ComplianceError> {
    let Some(line) = payload.fuel_line() else {
        return Ok(None);
    };
    let formula = formula_for(line, reference, period, settings)?;
    let energy = formula.energy(settings.max_energy)?;
    let units = formula.compliance_units(settings.max_energy)?;
    let compliance_units = match payload {
        ChildPayload::FuelExport(_) => (-units).min(0),
        ChildPayload::AllocationAgreement {
            direction: AllocationDirection::Sold,
            ..
        } => -units,
        _ => units,
    };
    Ok(Some(DerivedUnits {
        target_ci: formula.target_ci,
        eer: formula.eer,
        ci_of_fuel: formula.ci_of_fuel,
        uci: formula.uci,
        energy_density: formula.energy_density,
        energy: round_half_away(energy, 2),
        compliance_units,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(quantity: Decimal) -> UnitFormula {
        UnitFormula {
            target_ci: dec!(78.68),
            eer: dec!(1.0),
            ci_of_fuel: dec!(10.5),
            uci: Some(Decimal::ZERO),
            quantity,
            energy_density: dec!(36),
        }
    }

    #[test]
    fn test_million_litres_of_low_ci_fuel() {
        assert_eq!(formula(dec!(1000000)).compliance_units(dec!(9999999999)).unwrap(), 2454);
    }

    #[test]
    fn test_energy_bound_names_quantity() {
        let err = formula(dec!(277777778)).compliance_units(dec!(9999999999)).unwrap_err();
        match err {
            ComplianceError::QuantityOutOfRange { field, .. } => assert_eq!(field, "quantity"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(formula(dec!(277777777)).compliance_units(dec!(9999999999)).is_ok());
    }

    #[test]
    fn test_high_ci_fuel_is_a_debit() {
        let f = UnitFormula {
            ci_of_fuel: dec!(94.0),
            ..formula(dec!(1000))
        };
        // (78.68 - 94.0) × 36000 / 1e6 = -0.55152
        assert_eq!(f.compliance_units(dec!(9999999999)).unwrap(), -1);
    }
}
