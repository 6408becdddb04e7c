//! Initiative agreements and administrative adjustments
//!
//! Both are single-sided credit movements issued by the regulator to one
//! organization. The units are reserved when an analyst recommends the
//! issuance and confirmed when the director approves it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{AdminAdjustmentId, InitiativeAgreementId, OrganizationId, TransactionId};

use crate::error::LedgerError;

/// Kind of regulator issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssuanceKind {
    InitiativeAgreement,
    AdminAdjustment,
}

impl IssuanceKind {
    pub fn entity_name(&self) -> &'static str {
        match self {
            IssuanceKind::InitiativeAgreement => "InitiativeAgreement",
            IssuanceKind::AdminAdjustment => "AdminAdjustment",
        }
    }
}

/// Identifier of either issuance kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssuanceId {
    InitiativeAgreement(InitiativeAgreementId),
    AdminAdjustment(AdminAdjustmentId),
}

impl IssuanceId {
    pub fn kind(&self) -> IssuanceKind {
        match self {
            IssuanceId::InitiativeAgreement(_) => IssuanceKind::InitiativeAgreement,
            IssuanceId::AdminAdjustment(_) => IssuanceKind::AdminAdjustment,
        }
    }

    /// Raw key within the kind's own table
    pub fn value(&self) -> i64 {
        match self {
            IssuanceId::InitiativeAgreement(id) => id.value(),
            IssuanceId::AdminAdjustment(id) => id.value(),
        }
    }

    pub fn from_parts(kind: IssuanceKind, value: i64) -> Self {
        match kind {
            IssuanceKind::InitiativeAgreement => {
                IssuanceId::InitiativeAgreement(InitiativeAgreementId::new(value))
            }
            IssuanceKind::AdminAdjustment => IssuanceId::AdminAdjustment(AdminAdjustmentId::new(value)),
        }
    }
}

impl fmt::Display for IssuanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssuanceId::InitiativeAgreement(id) => write!(f, "{id}"),
            IssuanceId::AdminAdjustment(id) => write!(f, "{id}"),
        }
    }
}

/// Issuance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssuanceStatus {
    Draft,
    Recommended,
    Approved,
    Deleted,
}

impl IssuanceStatus {
    pub const ALL: [IssuanceStatus; 4] = [
        IssuanceStatus::Draft,
        IssuanceStatus::Recommended,
        IssuanceStatus::Approved,
        IssuanceStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssuanceStatus::Draft => "Draft",
            IssuanceStatus::Recommended => "Recommended",
            IssuanceStatus::Approved => "Approved",
            IssuanceStatus::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for IssuanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssuanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssuanceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown issuance status: {s}"))
    }
}

/// An issuance to insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssuance {
    pub kind: IssuanceKind,
    pub organization_id: OrganizationId,
    pub compliance_units: i64,
    pub transaction_effective_date: Option<NaiveDate>,
    pub gov_comment: Option<String>,
}

impl NewIssuance {
    /// Initiative agreements only credit; admin adjustments may debit
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_units(self.kind, self.compliance_units)
    }
}

fn validate_units(kind: IssuanceKind, units: i64) -> Result<(), LedgerError> {
    match kind {
        IssuanceKind::InitiativeAgreement if units <= 0 => Err(LedgerError::Validation(format!(
            "initiative agreement units must be positive, got {units}"
        ))),
        IssuanceKind::AdminAdjustment if units == 0 => Err(LedgerError::Validation(
            "admin adjustment units cannot be zero".to_string(),
        )),
        _ => Ok(()),
    }
}

/// A regulator issuance to one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub id: IssuanceId,
    pub organization_id: OrganizationId,
    pub compliance_units: i64,
    pub current_status: IssuanceStatus,
    /// Reserved at Recommended, confirmed at Approved
    pub transaction_id: Option<TransactionId>,
    pub transaction_effective_date: Option<NaiveDate>,
    pub gov_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issuance {
    pub fn draft(id: IssuanceId, new: NewIssuance) -> Self {
        let now = Utc::now();
        Self {
            id,
            organization_id: new.organization_id,
            compliance_units: new.compliance_units,
            current_status: IssuanceStatus::Draft,
            transaction_id: None,
            transaction_effective_date: new.transaction_effective_date,
            gov_comment: new.gov_comment,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> IssuanceKind {
        self.id.kind()
    }

    pub fn can_transition_to(&self, to: IssuanceStatus) -> bool {
        use IssuanceStatus::*;
        matches!(
            (self.current_status, to),
            (Draft, Recommended)
                | (Draft, Deleted)
                | (Recommended, Draft)
                | (Recommended, Approved)
                | (Recommended, Deleted)
        )
    }

    pub fn transition_to(&mut self, to: IssuanceStatus) -> Result<(), LedgerError> {
        if !self.can_transition_to(to) {
            return Err(LedgerError::invalid_transition(self.current_status, to));
        }
        self.current_status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Changes the units of a draft issuance
    pub fn set_units(&mut self, units: i64) -> Result<(), LedgerError> {
        if self.current_status != IssuanceStatus::Draft {
            return Err(LedgerError::InvalidState(format!(
                "{} can only be edited in Draft, is {}",
                self.id, self.current_status
            )));
        }
        validate_units(self.kind(), units)?;
        self.compliance_units = units;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// One row of an issuance's status history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceHistoryEntry {
    pub issuance_id: IssuanceId,
    pub status: IssuanceStatus,
    pub username: String,
    pub recorded_at: DateTime<Utc>,
}

impl IssuanceHistoryEntry {
    pub fn new(issuance: &Issuance, username: impl Into<String>) -> Self {
        Self {
            issuance_id: issuance.id,
            status: issuance.current_status,
            username: username.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_issuance(kind: IssuanceKind, units: i64) -> NewIssuance {
        NewIssuance {
            kind,
            organization_id: OrganizationId::new(1),
            compliance_units: units,
            transaction_effective_date: None,
            gov_comment: None,
        }
    }

    #[test]
    fn test_initiative_agreement_must_credit() {
        assert!(new_issuance(IssuanceKind::InitiativeAgreement, 500).validate().is_ok());
        assert!(new_issuance(IssuanceKind::InitiativeAgreement, -500).validate().is_err());
    }

    #[test]
    fn test_admin_adjustment_may_debit() {
        assert!(new_issuance(IssuanceKind::AdminAdjustment, -500).validate().is_ok());
        assert!(new_issuance(IssuanceKind::AdminAdjustment, 0).validate().is_err());
    }

    #[test]
    fn test_status_chain() {
        let id = IssuanceId::from_parts(IssuanceKind::AdminAdjustment, 3);
        let mut issuance = Issuance::draft(id, new_issuance(IssuanceKind::AdminAdjustment, 10));
        issuance.transition_to(IssuanceStatus::Recommended).unwrap();
        issuance.transition_to(IssuanceStatus::Approved).unwrap();
        assert!(issuance.transition_to(IssuanceStatus::Deleted).is_err());
        assert_eq!(issuance.id.to_string(), "AA-3");
    }
}
