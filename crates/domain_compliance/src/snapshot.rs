//! Organization snapshot frozen with each report
//!
//! Regulator-visible organization details must match what was submitted,
//! so a report keeps its own copy of the profile. The supplier may edit the
//! copy while the report is a draft; afterwards it is immutable.

use serde::{Deserialize, Serialize};
use validator::Validate;

use core_kernel::{ComplianceReportId, OrganizationId};

use crate::error::ComplianceError;

/// Current organization profile, as maintained outside the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct OrganizationProfile {
    pub organization_id: OrganizationId,
    #[validate(length(min = 1, max = 500))]
    pub name: String,
    #[validate(length(min = 1, max = 500))]
    pub operating_name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 1000))]
    pub service_address: String,
    #[validate(length(max = 1000))]
    pub attorney_address: Option<String>,
}

/// Frozen copy of the profile attached to one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSnapshot {
    pub report_id: ComplianceReportId,
    pub profile: OrganizationProfile,
    pub is_edited: bool,
}

impl OrganizationSnapshot {
    pub fn capture(report_id: ComplianceReportId, profile: &OrganizationProfile) -> Self {
        Self {
            report_id,
            profile: profile.clone(),
            is_edited: false,
        }
    }

    /// Copy carried to a new report version
    pub fn carried_to(&self, report_id: ComplianceReportId) -> Self {
        Self {
            report_id,
            profile: self.profile.clone(),
            is_edited: self.is_edited,
        }
    }

    /// Replaces the details; the organization itself cannot change
    pub fn edit(&mut self, profile: OrganizationProfile) -> Result<(), ComplianceError> {
        if profile.organization_id != self.profile.organization_id {
            return Err(ComplianceError::validation("snapshot belongs to another organization"));
        }
        profile
            .validate()
            .map_err(|e| ComplianceError::validation(e.to_string()))?;
        self.profile = profile;
        self.is_edited = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> OrganizationProfile {
        OrganizationProfile {
            organization_id: OrganizationId::new(1),
            name: "Fuel Supplier Ltd".into(),
            operating_name: "FSL".into(),
            email: Some("compliance@fsl.example".into()),
            phone: None,
            service_address: "1 Main St, Victoria BC".into(),
            attorney_address: None,
        }
    }

    #[test]
    fn test_edit_marks_snapshot() {
        let mut snapshot = OrganizationSnapshot::capture(ComplianceReportId::new(3), &profile());
        let mut edited = profile();
        edited.operating_name = "FSL Energy".into();
        snapshot.edit(edited).unwrap();
        assert!(snapshot.is_edited);
        assert_eq!(snapshot.profile.operating_name, "FSL Energy");
    }

    #[test]
    fn test_invalid_email_rejected() {
        let mut snapshot = OrganizationSnapshot::capture(ComplianceReportId::new(3), &profile());
        let mut edited = profile();
        edited.email = Some("not-an-email".into());
        assert!(matches!(snapshot.edit(edited), Err(ComplianceError::Validation(_))));
        assert!(!snapshot.is_edited);
    }

    #[test]
    fn test_other_organization_rejected() {
        let mut snapshot = OrganizationSnapshot::capture(ComplianceReportId::new(3), &profile());
        let mut edited = profile();
        edited.organization_id = OrganizationId::new(2);
        assert!(snapshot.edit(edited).is_err());
    }
}
