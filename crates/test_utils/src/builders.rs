//! Test Data Builders
//!
//! Builders for the five child record kinds, transfer terms, issuances and
//! raw version chains. Tests set only the fields they care about.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{ChildRecordId, ComplianceReportId, EntityGroupId, OrganizationId};
use domain_compliance::{
    ActionType, AllocationDirection, ChildPayload, ChildRecord, FuelCategory, FuelLine, NotionalDirection,
};
use domain_ledger::{IssuanceKind, NewIssuance, TransferTerms};

use crate::fixtures::{BIODIESEL, FOSSIL_DIESEL};

/// Builder for a fuel line shared by supplies, exports and allocations
#[derive(Debug, Clone)]
pub struct FuelLineBuilder {
    line: FuelLine,
}

impl Default for FuelLineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FuelLineBuilder {
    /// Fossil diesel at default CI, 10,000 L
    pub fn new() -> Self {
        Self {
            line: FuelLine {
                fuel_type_id: FOSSIL_DIESEL,
                fuel_category: FuelCategory::Diesel,
                end_use_id: None,
                provision_of_the_act: "Default carbon intensity".into(),
                fuel_code_id: None,
                ci_of_fuel: None,
                quantity: dec!(10000),
                units: "L".into(),
            },
        }
    }

    /// Biodiesel at its default CI
    pub fn biodiesel() -> Self {
        Self::new().fuel_type(BIODIESEL)
    }

    pub fn fuel_type(mut self, id: i32) -> Self {
        self.line.fuel_type_id = id;
        self
    }

    pub fn category(mut self, category: FuelCategory) -> Self {
        self.line.fuel_category = category;
        self
    }

    pub fn end_use(mut self, id: i32) -> Self {
        self.line.end_use_id = Some(id);
        self
    }

    pub fn fuel_code(mut self, id: i32) -> Self {
        self.line.fuel_code_id = Some(id);
        self.line.provision_of_the_act = "Approved fuel code".into();
        self
    }

    pub fn ci(mut self, ci: Decimal) -> Self {
        self.line.ci_of_fuel = Some(ci);
        self
    }

    pub fn quantity(mut self, quantity: Decimal) -> Self {
        self.line.quantity = quantity;
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.line.units = units.into();
        self
    }

    pub fn build(self) -> FuelLine {
        self.line
    }

    pub fn fuel_supply(self) -> ChildPayload {
        ChildPayload::FuelSupply(self.line)
    }

    pub fn fuel_export(self) -> ChildPayload {
        ChildPayload::FuelExport(self.line)
    }

    pub fn allocation(self, partner: impl Into<String>, direction: AllocationDirection) -> ChildPayload {
        ChildPayload::AllocationAgreement {
            partner: partner.into(),
            direction,
            line: self.line,
        }
    }
}

/// Fossil diesel supply that debits exactly `units` under the standard fixtures
pub fn diesel_debit(units: i64) -> ChildPayload {
    FuelLineBuilder::new()
        .quantity(Decimal::from(units) * dec!(10000))
        .fuel_supply()
}

/// Builder for notional transfers
#[derive(Debug, Clone)]
pub struct NotionalTransferBuilder {
    legal_name: String,
    fuel_category: FuelCategory,
    quantity: Decimal,
    direction: NotionalDirection,
}

impl Default for NotionalTransferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NotionalTransferBuilder {
    pub fn new() -> Self {
        Self {
            legal_name: "Partner Fuels Inc".into(),
            fuel_category: FuelCategory::Diesel,
            quantity: dec!(5000),
            direction: NotionalDirection::Received,
        }
    }

    pub fn legal_name(mut self, name: impl Into<String>) -> Self {
        self.legal_name = name.into();
        self
    }

    pub fn category(mut self, category: FuelCategory) -> Self {
        self.fuel_category = category;
        self
    }

    pub fn quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn transferred(mut self) -> Self {
        self.direction = NotionalDirection::Transferred;
        self
    }

    pub fn build(self) -> ChildPayload {
        ChildPayload::NotionalTransfer {
            legal_name: self.legal_name,
            fuel_category: self.fuel_category,
            quantity: self.quantity,
            direction: self.direction,
        }
    }
}

/// Builder for other-use records
#[derive(Debug, Clone)]
pub struct OtherUsesBuilder {
    fuel_type_id: i32,
    fuel_category: FuelCategory,
    quantity: Decimal,
    expected_use: String,
}

impl Default for OtherUsesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OtherUsesBuilder {
    pub fn new() -> Self {
        Self {
            fuel_type_id: BIODIESEL,
            fuel_category: FuelCategory::Diesel,
            quantity: dec!(2000),
            expected_use: "Heating oil".into(),
        }
    }

    pub fn fuel_type(mut self, id: i32) -> Self {
        self.fuel_type_id = id;
        self
    }

    pub fn category(mut self, category: FuelCategory) -> Self {
        self.fuel_category = category;
        self
    }

    pub fn quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn expected_use(mut self, expected_use: impl Into<String>) -> Self {
        self.expected_use = expected_use.into();
        self
    }

    pub fn build(self) -> ChildPayload {
        ChildPayload::OtherUses {
            fuel_type_id: self.fuel_type_id,
            fuel_category: self.fuel_category,
            quantity: self.quantity,
            expected_use: self.expected_use,
        }
    }
}

/// Builder for transfer terms
#[derive(Debug, Clone)]
pub struct TransferTermsBuilder {
    terms: TransferTerms,
}

impl TransferTermsBuilder {
    pub fn to(organization: i64) -> Self {
        Self {
            terms: TransferTerms {
                to_organization_id: OrganizationId::new(organization),
                agreement_date: Utc::now().date_naive(),
                quantity: 100,
                price_per_unit: dec!(250.00),
            },
        }
    }

    pub fn quantity(mut self, quantity: i64) -> Self {
        self.terms.quantity = quantity;
        self
    }

    pub fn price(mut self, price: Decimal) -> Self {
        self.terms.price_per_unit = price;
        self
    }

    pub fn agreed_on(mut self, date: NaiveDate) -> Self {
        self.terms.agreement_date = date;
        self
    }

    /// Agreement dated `months` months before today
    pub fn agreed_months_ago(mut self, months: u32) -> Self {
        let today = Utc::now().date_naive();
        self.terms.agreement_date = today
            .checked_sub_months(chrono::Months::new(months))
            .unwrap_or(today);
        self
    }

    pub fn build(self) -> TransferTerms {
        self.terms
    }
}

/// Builder for initiative agreements and admin adjustments
#[derive(Debug, Clone)]
pub struct IssuanceBuilder {
    issuance: NewIssuance,
}

impl IssuanceBuilder {
    pub fn initiative_agreement(organization: i64, units: i64) -> Self {
        Self::of(IssuanceKind::InitiativeAgreement, organization, units)
    }

    pub fn admin_adjustment(organization: i64, units: i64) -> Self {
        Self::of(IssuanceKind::AdminAdjustment, organization, units)
    }

    fn of(kind: IssuanceKind, organization: i64, units: i64) -> Self {
        Self {
            issuance: NewIssuance {
                kind,
                organization_id: OrganizationId::new(organization),
                compliance_units: units,
                transaction_effective_date: None,
                gov_comment: None,
            },
        }
    }

    pub fn effective(mut self, date: NaiveDate) -> Self {
        self.issuance.transaction_effective_date = Some(date);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.issuance.gov_comment = Some(comment.into());
        self
    }

    pub fn build(self) -> NewIssuance {
        self.issuance
    }
}

/// Builds child record version chains directly, without a workflow
#[derive(Debug)]
pub struct ChildChainBuilder {
    report_id: ComplianceReportId,
    next_id: i64,
    records: Vec<ChildRecord>,
}

impl ChildChainBuilder {
    pub fn for_report(report_id: i64) -> Self {
        Self {
            report_id: ComplianceReportId::new(report_id),
            next_id: 1,
            records: Vec::new(),
        }
    }

    /// Appends a version of `group`
    pub fn version(mut self, group: EntityGroupId, version: i32, action: ActionType) -> Self {
        self.records.push(ChildRecord {
            id: ChildRecordId::new(self.next_id),
            report_id: self.report_id,
            group_uuid: group,
            version,
            action_type: action,
            is_effective: false,
            payload: FuelLineBuilder::new().quantity(Decimal::from(version + 1)).fuel_supply(),
            derived: None,
            create_date: Utc::now(),
        });
        self.next_id += 1;
        self
    }

    /// Appends a full chain: create, `updates` updates, then an optional delete
    pub fn chain(mut self, group: EntityGroupId, updates: i32, deleted: bool) -> Self {
        self = self.version(group, 0, ActionType::Create);
        for v in 1..=updates {
            self = self.version(group, v, ActionType::Update);
        }
        if deleted {
            self = self.version(group, updates + 1, ActionType::Delete);
        }
        self
    }

    pub fn build(self) -> Vec<ChildRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_compliance::ChildKind;

    #[test]
    fn test_payload_kinds() {
        assert_eq!(FuelLineBuilder::new().fuel_supply().kind(), ChildKind::FuelSupply);
        assert_eq!(FuelLineBuilder::new().fuel_export().kind(), ChildKind::FuelExport);
        assert_eq!(NotionalTransferBuilder::new().build().kind(), ChildKind::NotionalTransfer);
        assert_eq!(OtherUsesBuilder::new().build().kind(), ChildKind::OtherUses);
        assert_eq!(
            FuelLineBuilder::biodiesel()
                .allocation("Partner", AllocationDirection::Purchased)
                .kind(),
            ChildKind::AllocationAgreement
        );
    }

    #[test]
    fn test_builders_produce_valid_payloads() {
        assert!(diesel_debit(3).validate().is_ok());
        assert!(NotionalTransferBuilder::new().legal_name(" ").build().validate().is_err());
        assert!(OtherUsesBuilder::new().quantity(dec!(-1)).build().validate().is_err());
    }

    #[test]
    fn test_chain_versions() {
        let group = EntityGroupId::new();
        let records = ChildChainBuilder::for_report(1).chain(group, 2, true).build();
        let versions: Vec<_> = records.iter().map(|r| (r.version, r.action_type)).collect();
        assert_eq!(
            versions,
            vec![
                (0, ActionType::Create),
                (1, ActionType::Update),
                (2, ActionType::Update),
                (3, ActionType::Delete),
            ]
        );
    }

    #[test]
    fn test_issuance_builder() {
        let issuance = IssuanceBuilder::admin_adjustment(2, -40).comment("correction").build();
        assert_eq!(issuance.kind, IssuanceKind::AdminAdjustment);
        assert_eq!(issuance.compliance_units, -40);
    }
}
