//! Compliance report aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{
    CompliancePeriod, ComplianceReportId, OrganizationId, ReportGroupId, Role, TransactionId, UserIdentity,
};

use crate::error::ComplianceError;
use crate::status::{ReportStatus, SupplementalInitiator};

/// One version of a supplier's report for one compliance period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub id: ComplianceReportId,
    pub group_id: ReportGroupId,
    /// 0 for the original report
    pub version: i32,
    pub compliance_period: CompliancePeriod,
    pub organization_id: OrganizationId,
    pub current_status: ReportStatus,
    pub nickname: String,
    pub supplemental_initiator: Option<SupplementalInitiator>,
    /// Reservation held by the report
    pub transaction_id: Option<TransactionId>,
    /// Report id in the legacy system when ingested from it
    pub legacy_id: Option<i64>,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl ComplianceReport {
    pub fn is_supplemental(&self) -> bool {
        self.version >= 1
    }

    /// Moves the report along a legal edge of the status graph
    pub fn transition_to(&mut self, to: ReportStatus) -> Result<ReportStatus, ComplianceError> {
        let from = self.current_status;
        if !from.can_transition_to(to) {
            return Err(ComplianceError::invalid_transition(from, to));
        }
        self.current_status = to;
        self.update_date = Utc::now();
        Ok(from)
    }

    /// Checks that the caller may edit the report's children and inputs
    ///
    /// Suppliers of the organization edit drafts; analysts edit their own
    /// adjustments.
    pub fn ensure_editable_by(&self, user: &UserIdentity) -> Result<(), ComplianceError> {
        match self.current_status {
            ReportStatus::Draft => {
                user.require_role(&[Role::Supplier])?;
                user.require_org(self.organization_id)?;
                Ok(())
            }
            ReportStatus::AnalystAdjustment => {
                user.require_role(&[Role::Analyst])?;
                Ok(())
            }
            other => Err(ComplianceError::invalid_state(format!(
                "report {} is {other} and cannot be edited",
                self.id
            ))),
        }
    }

    /// Attaches the reservation created for this report
    pub fn attach_reservation(&mut self, transaction_id: TransactionId) -> Result<(), ComplianceError> {
        if let Some(existing) = self.transaction_id {
            return Err(ComplianceError::invalid_state(format!(
                "report {} already holds reservation {existing}",
                self.id
            )));
        }
        self.transaction_id = Some(transaction_id);
        Ok(())
    }
}

/// Report row to insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub group_id: ReportGroupId,
    pub version: i32,
    pub compliance_period: CompliancePeriod,
    pub organization_id: OrganizationId,
    pub current_status: ReportStatus,
    pub supplemental_initiator: Option<SupplementalInitiator>,
    pub legacy_id: Option<i64>,
}

impl NewReport {
    /// Version 0 of a new group
    pub fn original(organization_id: OrganizationId, compliance_period: CompliancePeriod) -> Self {
        Self {
            group_id: ReportGroupId::new(),
            version: 0,
            compliance_period,
            organization_id,
            current_status: ReportStatus::Draft,
            supplemental_initiator: None,
            legacy_id: None,
        }
    }

    /// Next version in the group of `base`
    pub fn supplemental(base: &ComplianceReport, version: i32, initiator: SupplementalInitiator) -> Self {
        Self {
            group_id: base.group_id,
            version,
            compliance_period: base.compliance_period,
            organization_id: base.organization_id,
            current_status: initiator.initial_status(),
            supplemental_initiator: Some(initiator),
            legacy_id: None,
        }
    }

    /// Display name shown to suppliers and staff
    pub fn nickname(&self) -> String {
        match self.supplemental_initiator {
            None => "Original Report".to_string(),
            Some(SupplementalInitiator::Supplier) => format!("Supplemental report {}", self.version),
            Some(SupplementalInitiator::Government) => format!("Government adjustment {}", self.version),
            Some(SupplementalInitiator::AnalystAdjustment) => format!("Analyst adjustment {}", self.version),
        }
    }
}

/// Status history row written on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub report_id: ComplianceReportId,
    pub from_status: Option<ReportStatus>,
    pub to_status: ReportStatus,
    pub username: String,
    pub recorded_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(
        report: &ComplianceReport,
        from_status: Option<ReportStatus>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            report_id: report.id,
            from_status,
            to_status: report.current_status,
            username: username.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: ReportStatus) -> ComplianceReport {
        let now = Utc::now();
        ComplianceReport {
            id: ComplianceReportId::new(1),
            group_id: ReportGroupId::new(),
            version: 0,
            compliance_period: CompliancePeriod::new(2024).unwrap(),
            organization_id: OrganizationId::new(7),
            current_status: status,
            nickname: "Original Report".into(),
            supplemental_initiator: None,
            transaction_id: None,
            legacy_id: None,
            create_date: now,
            update_date: now,
        }
    }

    #[test]
    fn test_illegal_transition_leaves_status() {
        let mut r = report(ReportStatus::Draft);
        assert!(r.transition_to(ReportStatus::Assessed).is_err());
        assert_eq!(r.current_status, ReportStatus::Draft);
        assert_eq!(r.transition_to(ReportStatus::Submitted).unwrap(), ReportStatus::Draft);
    }

    #[test]
    fn test_only_owner_edits_draft() {
        let r = report(ReportStatus::Draft);
        assert!(r.ensure_editable_by(&UserIdentity::supplier("owner", OrganizationId::new(7))).is_ok());
        let other = UserIdentity::supplier("other", OrganizationId::new(8));
        assert!(matches!(r.ensure_editable_by(&other), Err(ComplianceError::Forbidden(_))));
        let submitted = report(ReportStatus::Submitted);
        assert!(matches!(
            submitted.ensure_editable_by(&UserIdentity::supplier("owner", OrganizationId::new(7))),
            Err(ComplianceError::InvalidState(_))
        ));
    }

    #[test]
    fn test_second_reservation_rejected() {
        let mut r = report(ReportStatus::Submitted);
        r.attach_reservation(TransactionId::new(1)).unwrap();
        assert!(r.attach_reservation(TransactionId::new(2)).is_err());
    }
}
