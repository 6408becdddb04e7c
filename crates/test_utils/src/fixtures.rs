//! Pre-built Test Fixtures
//!
//! Consistent reference data, organizations, periods and callers. The
//! reference set is chosen so unit arithmetic stays in round numbers:
//! diesel targets 80 gCO2e/MJ and fossil diesel is 90 gCO2e/MJ at 10 MJ/L,
//! so every 10,000 L of fossil diesel is exactly one unit of deficit.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{AuditContext, CompliancePeriod, OrganizationId, Role, UserIdentity};
use domain_compliance::ports::mock::{MemoryDatabase, RecordingNotificationSink, StaticReferenceData};
use domain_compliance::{
    ComplianceDatabase, FuelCategory, FuelType, OrganizationProfile, ReferenceData, ReportWorkflow,
    SummaryCalculator,
};
use domain_ledger::LedgerService;

pub const FOSSIL_DIESEL: i32 = 1;
pub const BIODIESEL: i32 = 2;
pub const FOSSIL_GASOLINE: i32 = 3;
pub const ETHANOL: i32 = 4;
pub const ELECTRICITY: i32 = 5;

/// Fuel code certifying a biodiesel pathway at 5 gCO2e/MJ
pub const BIODIESEL_FUEL_CODE: i32 = 101;

/// End use with a heavy-duty EER
pub const HEAVY_DUTY_END_USE: i32 = 11;

/// Fixture for compliance periods
pub struct PeriodFixtures;

impl PeriodFixtures {
    pub fn year(year: i32) -> CompliancePeriod {
        match CompliancePeriod::new(year) {
            Ok(period) => period,
            Err(e) => panic!("fixture period {year}: {e}"),
        }
    }

    /// Before the 2024 legislation transition
    pub fn legacy() -> CompliancePeriod {
        Self::year(2023)
    }

    pub fn current() -> CompliancePeriod {
        Self::year(2024)
    }

    /// First period with the analyst L7/L9 lock
    pub fn locked_lines() -> CompliancePeriod {
        Self::year(2025)
    }
}

/// Fixture for organizations
pub struct OrganizationFixtures;

impl OrganizationFixtures {
    pub fn id(id: i64) -> OrganizationId {
        OrganizationId::new(id)
    }

    pub fn profile(id: i64) -> OrganizationProfile {
        OrganizationProfile {
            organization_id: OrganizationId::new(id),
            name: format!("Supplier {id} Ltd"),
            operating_name: format!("Supplier {id}"),
            email: Some(format!("compliance{id}@supplier.example")),
            phone: Some("250-555-0100".into()),
            service_address: "100 Fuel Way, Victoria BC".into(),
            attorney_address: None,
        }
    }
}

/// Fixture for callers
pub struct IdentityFixtures;

impl IdentityFixtures {
    pub fn supplier(organization: i64) -> UserIdentity {
        UserIdentity::supplier(format!("supplier{organization}"), OrganizationId::new(organization))
    }

    pub fn analyst() -> UserIdentity {
        UserIdentity::new("analyst", [Role::Analyst])
    }

    pub fn manager() -> UserIdentity {
        UserIdentity::new("manager", [Role::ComplianceManager])
    }

    pub fn director() -> UserIdentity {
        UserIdentity::new("director", [Role::Director])
    }

    pub fn system() -> UserIdentity {
        UserIdentity::system()
    }

    pub fn audit(user: &UserIdentity) -> AuditContext {
        AuditContext::for_user(user)
    }
}

/// Fixture for calculator reference tables
pub struct ReferenceFixtures;

impl ReferenceFixtures {
    pub fn fuel_type(id: i32, name: &str, fossil: bool, ci: Decimal, density: Decimal, units: &str) -> FuelType {
        FuelType {
            id,
            name: name.into(),
            fossil_derived: fossil,
            default_ci: ci,
            energy_density: density,
            units: units.into(),
        }
    }

    /// Reference data used by most scenarios
    pub fn standard() -> ReferenceData {
        ReferenceData::default()
            .with_target_ci(FuelCategory::Gasoline, dec!(78.68))
            .with_target_ci(FuelCategory::Diesel, dec!(80))
            .with_target_ci(FuelCategory::JetFuel, dec!(88.83))
            .with_fuel_type(Self::fuel_type(FOSSIL_DIESEL, "Fossil diesel", true, dec!(90), dec!(10), "L"))
            .with_fuel_type(Self::fuel_type(BIODIESEL, "Biodiesel", false, dec!(10.5), dec!(36), "L"))
            .with_fuel_type(Self::fuel_type(FOSSIL_GASOLINE, "Fossil gasoline", true, dec!(93.67), dec!(34.69), "L"))
            .with_fuel_type(Self::fuel_type(ETHANOL, "Ethanol", false, dec!(35), dec!(23.58), "L"))
            .with_fuel_type(Self::fuel_type(ELECTRICITY, "Electricity", false, dec!(12.14), dec!(3.6), "kWh"))
            .with_eer(ELECTRICITY, None, dec!(3.4))
            .with_eer(ELECTRICITY, Some(HEAVY_DUTY_END_USE), dec!(3.8))
            .with_uci(BIODIESEL, None, dec!(2))
            .with_fuel_code(BIODIESEL_FUEL_CODE, dec!(5))
    }
}

/// A report workflow over an in-memory database
pub struct WorkflowHarness {
    pub database: Arc<MemoryDatabase>,
    pub notifications: Arc<RecordingNotificationSink>,
    pub workflow: Arc<ReportWorkflow>,
    pub ledger: LedgerService,
}

impl WorkflowHarness {
    /// Opens one organization per `(id, opening_units)` pair
    pub fn new(organizations: &[(i64, i64)]) -> Self {
        Self::with_reference(organizations, ReferenceFixtures::standard())
    }

    pub fn with_reference(organizations: &[(i64, i64)], reference: ReferenceData) -> Self {
        let profiles: Vec<(OrganizationProfile, i64)> = organizations
            .iter()
            .map(|(id, units)| (OrganizationFixtures::profile(*id), *units))
            .collect();
        let database = Arc::new(MemoryDatabase::with_organizations(&profiles));
        let notifications = Arc::new(RecordingNotificationSink::new());
        let ledger = LedgerService::new();
        let workflow = Arc::new(ReportWorkflow::new(
            database.clone(),
            Arc::new(StaticReferenceData::new(reference)),
            notifications.clone(),
            ledger.clone(),
            SummaryCalculator::default(),
        ));
        Self {
            database,
            notifications,
            workflow,
            ledger,
        }
    }

    /// Committed and available units of `organization`
    pub async fn balances(&self, organization: i64) -> (i64, i64) {
        let mut uow = match self.database.begin_compliance(&AuditContext::new("reader")).await {
            Ok(uow) => uow,
            Err(e) => panic!("begin unit of work: {e}"),
        };
        match self.ledger.balance(uow.as_mut(), OrganizationId::new(organization)).await {
            Ok(view) => (view.committed_units, view.available_units),
            Err(e) => panic!("balance of {organization}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_reference_is_complete() {
        let data = ReferenceFixtures::standard();
        assert_eq!(data.target_ci.len(), 3);
        assert_eq!(data.fuel_types.len(), 5);
        assert_eq!(data.fuel_codes[&BIODIESEL_FUEL_CODE], dec!(5));
    }

    #[test]
    fn test_supplier_identity_is_bound() {
        let supplier = IdentityFixtures::supplier(4);
        assert_eq!(supplier.organization_id, Some(OrganizationId::new(4)));
        assert!(!supplier.is_government());
    }

    #[tokio::test]
    async fn test_harness_opens_balances() {
        let harness = WorkflowHarness::new(&[(1, 500), (2, 0)]);
        assert_eq!(harness.balances(1).await, (500, 500));
        assert_eq!(harness.balances(2).await, (0, 0));
    }
}
