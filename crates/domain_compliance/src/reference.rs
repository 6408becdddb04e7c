//! Reference tables read by the calculator
//!
//! Target carbon intensities, energy effectiveness ratios, additional use
//! intensities, fuel codes and fuel types. The core never writes them.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use core_kernel::CompliancePeriod;

use crate::error::ComplianceError;

/// Fuel category a renewable target applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FuelCategory {
    Gasoline,
    Diesel,
    JetFuel,
}

impl FuelCategory {
    pub const ALL: [FuelCategory; 3] = [FuelCategory::Gasoline, FuelCategory::Diesel, FuelCategory::JetFuel];

    pub fn as_str(&self) -> &'static str {
        match self {
            FuelCategory::Gasoline => "Gasoline",
            FuelCategory::Diesel => "Diesel",
            FuelCategory::JetFuel => "Jet fuel",
        }
    }
}

impl fmt::Display for FuelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per fuel category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryValues<T> {
    pub gasoline: T,
    pub diesel: T,
    pub jet_fuel: T,
}

impl<T> CategoryValues<T> {
    pub fn get(&self, category: FuelCategory) -> &T {
        match category {
            FuelCategory::Gasoline => &self.gasoline,
            FuelCategory::Diesel => &self.diesel,
            FuelCategory::JetFuel => &self.jet_fuel,
        }
    }

    pub fn get_mut(&mut self, category: FuelCategory) -> &mut T {
        match category {
            FuelCategory::Gasoline => &mut self.gasoline,
            FuelCategory::Diesel => &mut self.diesel,
            FuelCategory::JetFuel => &mut self.jet_fuel,
        }
    }

    /// Builds the values category by category
    pub fn from_fn(mut f: impl FnMut(FuelCategory) -> T) -> Self {
        Self {
            gasoline: f(FuelCategory::Gasoline),
            diesel: f(FuelCategory::Diesel),
            jet_fuel: f(FuelCategory::JetFuel),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(FuelCategory, &T) -> U) -> CategoryValues<U> {
        CategoryValues::from_fn(|category| f(category, self.get(category)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (FuelCategory, &T)> {
        FuelCategory::ALL.into_iter().map(move |category| (category, self.get(category)))
    }
}

/// Fuel type row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelType {
    pub id: i32,
    pub name: String,
    pub fossil_derived: bool,
    /// Default carbon intensity, gCO₂e/MJ
    pub default_ci: Decimal,
    /// MJ per unit of quantity
    pub energy_density: Decimal,
    pub units: String,
}

/// Reference tables in effect for one compliance period
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub target_ci: HashMap<FuelCategory, Decimal>,
    pub fuel_types: HashMap<i32, FuelType>,
    /// Keyed by (fuel type, end use)
    pub eer: HashMap<(i32, Option<i32>), Decimal>,
    /// Keyed by (fuel type, end use)
    pub uci: HashMap<(i32, Option<i32>), Decimal>,
    /// Carbon intensity by fuel code id
    pub fuel_codes: HashMap<i32, Decimal>,
}

impl ReferenceData {
    pub fn with_target_ci(mut self, category: FuelCategory, ci: Decimal) -> Self {
        self.target_ci.insert(category, ci);
        self
    }

    pub fn with_fuel_type(mut self, fuel_type: FuelType) -> Self {
        self.fuel_types.insert(fuel_type.id, fuel_type);
        self
    }

    pub fn with_eer(mut self, fuel_type_id: i32, end_use_id: Option<i32>, ratio: Decimal) -> Self {
        self.eer.insert((fuel_type_id, end_use_id), ratio);
        self
    }

    pub fn with_uci(mut self, fuel_type_id: i32, end_use_id: Option<i32>, intensity: Decimal) -> Self {
        self.uci.insert((fuel_type_id, end_use_id), intensity);
        self
    }

    pub fn with_fuel_code(mut self, fuel_code_id: i32, ci: Decimal) -> Self {
        self.fuel_codes.insert(fuel_code_id, ci);
        self
    }

    pub fn target_ci(&self, category: FuelCategory, period: CompliancePeriod) -> Result<Decimal, ComplianceError> {
        self.target_ci
            .get(&category)
            .copied()
            .ok_or_else(|| ComplianceError::not_found("Target carbon intensity", format!("{category} {period}")))
    }

    pub fn fuel_type(&self, id: i32) -> Result<&FuelType, ComplianceError> {
        self.fuel_types
            .get(&id)
            .ok_or_else(|| ComplianceError::not_found("Fuel type", id))
    }

    /// Ratio for the end use, falling back to the fuel type's general ratio, then 1
    pub fn eer(&self, fuel_type_id: i32, end_use_id: Option<i32>) -> Decimal {
        self.eer
            .get(&(fuel_type_id, end_use_id))
            .or_else(|| self.eer.get(&(fuel_type_id, None)))
            .copied()
            .unwrap_or(dec!(1.0))
    }

    pub fn uci(&self, fuel_type_id: i32, end_use_id: Option<i32>) -> Decimal {
        self.uci
            .get(&(fuel_type_id, end_use_id))
            .or_else(|| self.uci.get(&(fuel_type_id, None)))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn fuel_code_ci(&self, fuel_code_id: i32) -> Result<Decimal, ComplianceError> {
        self.fuel_codes
            .get(&fuel_code_id)
            .copied()
            .ok_or_else(|| ComplianceError::not_found("Fuel code", fuel_code_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eer_falls_back_to_general_then_one() {
        let data = ReferenceData::default()
            .with_eer(3, None, dec!(2.5))
            .with_eer(3, Some(7), dec!(3.8));
        assert_eq!(data.eer(3, Some(7)), dec!(3.8));
        assert_eq!(data.eer(3, Some(8)), dec!(2.5));
        assert_eq!(data.eer(4, Some(8)), dec!(1.0));
    }

    #[test]
    fn test_category_values_map() {
        let values = CategoryValues::from_fn(|c| match c {
            FuelCategory::Gasoline => 1,
            FuelCategory::Diesel => 2,
            FuelCategory::JetFuel => 3,
        });
        let doubled = values.map(|_, v| v * 2);
        assert_eq!(doubled.jet_fuel, 6);
        assert_eq!(values.iter().map(|(_, v)| v).sum::<i32>(), 6);
    }
}
