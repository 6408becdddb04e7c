//! Regulatory constants the calculator reads

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use core_kernel::CompliancePeriod;

use crate::reference::{CategoryValues, FuelCategory};

/// Constants regulators change between periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorSettings {
    /// Renewable share required of gasoline-class fuel
    pub gasoline_percent: Decimal,
    /// Renewable share required of diesel-class fuel
    pub diesel_percent: Decimal,
    /// Renewable share required of jet fuel, from the keyed year onwards
    pub jet_fuel_schedule: BTreeMap<i32, Decimal>,
    /// $ per litre of renewable shortfall
    pub penalty_rates: CategoryValues<Decimal>,
    /// CAD per compliance unit of deficit
    pub low_carbon_penalty_per_unit: Decimal,
    /// Retention and deferral cap as a share of line 4
    pub retention_cap_percent: Decimal,
    /// First period whose records carry an additional use intensity
    pub transition_year: i32,
    /// First period in which analyst adjustments lock lines 7 and 9
    pub analyst_line_lock_year: i32,
    /// Records whose energy reaches this bound are rejected
    pub max_energy: Decimal,
}

impl Default for CalculatorSettings {
    fn default() -> Self {
        Self {
            gasoline_percent: dec!(5),
            diesel_percent: dec!(4),
            jet_fuel_schedule: BTreeMap::from([(2028, dec!(1)), (2029, dec!(2)), (2030, dec!(3))]),
            penalty_rates: CategoryValues {
                gasoline: dec!(0.30),
                diesel: dec!(0.45),
                jet_fuel: dec!(0.50),
            },
            low_carbon_penalty_per_unit: dec!(600),
            retention_cap_percent: dec!(5),
            transition_year: 2024,
            analyst_line_lock_year: 2025,
            max_energy: dec!(9999999999),
        }
    }
}

impl CalculatorSettings {
    /// Renewable target for a category, as a fraction
    pub fn target_fraction(&self, category: FuelCategory, period: CompliancePeriod) -> Decimal {
        let percent = match category {
            FuelCategory::Gasoline => self.gasoline_percent,
            FuelCategory::Diesel => self.diesel_percent,
            FuelCategory::JetFuel => self
                .jet_fuel_schedule
                .range(..=period.year())
                .next_back()
                .map(|(_, percent)| *percent)
                .unwrap_or(Decimal::ZERO),
        };
        percent / dec!(100)
    }

    pub fn retention_cap_fraction(&self) -> Decimal {
        self.retention_cap_percent / dec!(100)
    }

    /// Whether records of this period include the additional use intensity
    pub fn includes_uci(&self, period: CompliancePeriod) -> bool {
        period.is_at_least(self.transition_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_fuel_schedule_steps() {
        let settings = CalculatorSettings::default();
        let target = |year| settings.target_fraction(FuelCategory::JetFuel, CompliancePeriod::new(year).unwrap());
        assert_eq!(target(2025), Decimal::ZERO);
        assert_eq!(target(2028), dec!(0.01));
        assert_eq!(target(2035), dec!(0.03));
    }

    #[test]
    fn test_uci_transition() {
        let settings = CalculatorSettings::default();
        assert!(!settings.includes_uci(CompliancePeriod::new(2023).unwrap()));
        assert!(settings.includes_uci(CompliancePeriod::new(2024).unwrap()));
    }
}
