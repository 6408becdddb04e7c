//! Reference table reader
//!
//! Loads the calculator's inputs for one compliance period: target carbon
//! intensities by fuel category, fuel types with their period energy
//! density, energy effectiveness ratios, additional carbon intensities and
//! approved fuel codes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};

use core_kernel::{CompliancePeriod, DomainPort, HealthCheckResult, HealthCheckable, PortError};
use domain_compliance::{FuelCategory, FuelType, ReferenceData, ReferenceDataPort};

use crate::error::db_to_port_error;

#[derive(Debug, Clone, sqlx::FromRow)]
struct TargetRow {
    category: String,
    target_carbon_intensity: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct FuelTypeRow {
    fuel_type_id: i32,
    fuel_type: String,
    fossil_derived: bool,
    default_carbon_intensity: Option<Decimal>,
    density: Option<Decimal>,
    units: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RatioRow {
    fuel_type_id: i32,
    end_use_type_id: Option<i32>,
    value: Decimal,
}

/// Parses the `fuel_category.category` names
fn parse_category(name: &str) -> Option<FuelCategory> {
    match name {
        "Gasoline" => Some(FuelCategory::Gasoline),
        "Diesel" => Some(FuelCategory::Diesel),
        "Jet fuel" | "Jet Fuel" => Some(FuelCategory::JetFuel),
        _ => None,
    }
}

/// `ReferenceDataPort` over the LCFS reference tables
#[derive(Debug, Clone)]
pub struct PgReferenceData {
    pool: PgPool,
}

impl PgReferenceData {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PgReferenceData {}

#[async_trait]
impl ReferenceDataPort for PgReferenceData {
    #[instrument(skip(self), fields(period = %period))]
    async fn reference_data(&self, period: CompliancePeriod) -> Result<ReferenceData, PortError> {
        let year = period.year().to_string();
        let mut data = ReferenceData::default();

        let targets = sqlx::query_as::<_, TargetRow>(
            "SELECT fc.category::text AS category, t.target_carbon_intensity \
             FROM target_carbon_intensity t \
             JOIN fuel_category fc ON fc.fuel_category_id = t.fuel_category_id \
             JOIN compliance_period cp ON cp.compliance_period_id = t.compliance_period_id \
             WHERE cp.description = $1",
        )
        .bind(&year)
        .fetch_all(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        for row in targets {
            match parse_category(&row.category) {
                Some(category) => data = data.with_target_ci(category, row.target_carbon_intensity),
                None => warn!(category = %row.category, "ignoring target for unknown fuel category"),
            }
        }

        let fuel_types = sqlx::query_as::<_, FuelTypeRow>(
            "SELECT ft.fuel_type_id, ft.fuel_type, ft.fossil_derived, ft.default_carbon_intensity, \
                    ed.density, ft.units::text AS units \
             FROM fuel_type ft \
             LEFT JOIN energy_density ed ON ed.fuel_type_id = ft.fuel_type_id \
                 AND ed.compliance_period_id = (SELECT compliance_period_id FROM compliance_period WHERE description = $1)",
        )
        .bind(&year)
        .fetch_all(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        for row in fuel_types {
            data = data.with_fuel_type(FuelType {
                id: row.fuel_type_id,
                name: row.fuel_type,
                fossil_derived: row.fossil_derived,
                default_ci: row.default_carbon_intensity.unwrap_or_default(),
                energy_density: row.density.unwrap_or_default(),
                units: row.units,
            });
        }

        let ratios = sqlx::query_as::<_, RatioRow>(
            "SELECT e.fuel_type_id, e.end_use_type_id, e.ratio AS value \
             FROM energy_effectiveness_ratio e \
             JOIN compliance_period cp ON cp.compliance_period_id = e.compliance_period_id \
             WHERE cp.description = $1",
        )
        .bind(&year)
        .fetch_all(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        for row in ratios {
            data = data.with_eer(row.fuel_type_id, row.end_use_type_id, row.value);
        }

        let intensities = sqlx::query_as::<_, RatioRow>(
            "SELECT a.fuel_type_id, a.end_use_type_id, a.intensity AS value \
             FROM additional_carbon_intensity a \
             JOIN compliance_period cp ON cp.compliance_period_id = a.compliance_period_id \
             WHERE cp.description = $1",
        )
        .bind(&year)
        .fetch_all(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        for row in intensities {
            data = data.with_uci(row.fuel_type_id, row.end_use_type_id, row.value);
        }

        let fuel_codes = sqlx::query_as::<_, (i32, Decimal)>(
            "SELECT fuel_code_id, carbon_intensity FROM fuel_code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_to_port_error)?;
        for (id, ci) in fuel_codes {
            data = data.with_fuel_code(id, ci);
        }

        debug!(
            fuel_types = data.fuel_types.len(),
            eer = data.eer.len(),
            fuel_codes = data.fuel_codes.len(),
            "reference data loaded"
        );
        Ok(data)
    }
}

#[async_trait]
impl HealthCheckable for PgReferenceData {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        match sqlx::query_scalar::<_, i64>("SELECT count(*) FROM fuel_type").fetch_one(&self.pool).await {
            Ok(0) => HealthCheckResult::unhealthy("postgres-reference-data", "fuel_type table is empty"),
            Ok(_) => HealthCheckResult::healthy("postgres-reference-data", start.elapsed().as_millis() as u64),
            Err(e) => HealthCheckResult::unhealthy("postgres-reference-data", format!("Database error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names() {
        assert_eq!(parse_category("Gasoline"), Some(FuelCategory::Gasoline));
        assert_eq!(parse_category("Jet fuel"), Some(FuelCategory::JetFuel));
        assert_eq!(parse_category("Marine"), None);
    }
}
