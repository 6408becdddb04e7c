//! Credit transfer aggregate
//!
//! A transfer moves compliance units from one organization to another. No
//! ledger entries exist until the director records it; at that point both
//! legs are written in one unit of work.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{OrganizationId, TransactionId, TransferId};

use crate::error::LedgerError;

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Being prepared by the sending organization
    Draft,
    /// Draft discarded
    Deleted,
    /// Awaiting the receiving organization's signature
    Sent,
    /// Signed by both parties, awaiting analyst review
    Submitted,
    /// Analyst has recommended Record or Refuse
    Recommended,
    /// Director approved; ledger legs written
    Recorded,
    /// Director refused
    Refused,
    /// Receiving organization declined
    Declined,
    /// Sending organization withdrew
    Rescinded,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 9] = [
        TransferStatus::Draft,
        TransferStatus::Deleted,
        TransferStatus::Sent,
        TransferStatus::Submitted,
        TransferStatus::Recommended,
        TransferStatus::Recorded,
        TransferStatus::Refused,
        TransferStatus::Declined,
        TransferStatus::Rescinded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Draft => "Draft",
            TransferStatus::Deleted => "Deleted",
            TransferStatus::Sent => "Sent",
            TransferStatus::Submitted => "Submitted",
            TransferStatus::Recommended => "Recommended",
            TransferStatus::Recorded => "Recorded",
            TransferStatus::Refused => "Refused",
            TransferStatus::Declined => "Declined",
            TransferStatus::Rescinded => "Rescinded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Deleted
                | TransferStatus::Recorded
                | TransferStatus::Refused
                | TransferStatus::Declined
                | TransferStatus::Rescinded
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown transfer status: {s}"))
    }
}

/// Pricing category assigned when a transfer is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferCategory {
    /// Agreement at most six months old
    A,
    /// Agreement at most twelve months old
    B,
    /// Agreement older than twelve months
    C,
    /// Set by the director only
    D,
}

impl TransferCategory {
    /// Category derived from the age of the agreement on the recording date
    pub fn from_agreement_age(agreement_date: NaiveDate, recorded_on: NaiveDate) -> Self {
        let six_months = agreement_date.checked_add_months(Months::new(6));
        let twelve_months = agreement_date.checked_add_months(Months::new(12));
        match (six_months, twelve_months) {
            (Some(six), _) if recorded_on <= six => TransferCategory::A,
            (_, Some(twelve)) if recorded_on <= twelve => TransferCategory::B,
            _ => TransferCategory::C,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferCategory::A => "A",
            TransferCategory::B => "B",
            TransferCategory::C => "C",
            TransferCategory::D => "D",
        }
    }
}

impl fmt::Display for TransferCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(TransferCategory::A),
            "B" => Ok(TransferCategory::B),
            "C" => Ok(TransferCategory::C),
            "D" => Ok(TransferCategory::D),
            other => Err(format!("unknown transfer category: {other}")),
        }
    }
}

/// Analyst recommendation to the director
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferRecommendation {
    Record,
    Refuse,
}

impl TransferRecommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferRecommendation::Record => "Record",
            TransferRecommendation::Refuse => "Refuse",
        }
    }
}

impl FromStr for TransferRecommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Record" => Ok(TransferRecommendation::Record),
            "Refuse" => Ok(TransferRecommendation::Refuse),
            other => Err(format!("unknown recommendation: {other}")),
        }
    }
}

/// Negotiated terms of a transfer, editable while in Draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTerms {
    pub to_organization_id: OrganizationId,
    pub agreement_date: NaiveDate,
    /// Positive number of compliance units
    pub quantity: i64,
    /// Dollars per unit, at most two decimal places
    pub price_per_unit: Decimal,
}

/// A transfer to insert; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_organization_id: OrganizationId,
    pub terms: TransferTerms,
}

/// A credit transfer between two organizations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_organization_id: OrganizationId,
    pub to_organization_id: OrganizationId,
    pub agreement_date: NaiveDate,
    /// Set when recorded
    pub transaction_effective_date: Option<NaiveDate>,
    pub quantity: i64,
    pub price_per_unit: Decimal,
    pub category: Option<TransferCategory>,
    pub current_status: TransferStatus,
    pub recommendation: Option<TransferRecommendation>,
    /// Debit leg, present once recorded
    pub from_transaction_id: Option<TransactionId>,
    /// Credit leg, present once recorded
    pub to_transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Builds a fresh draft from validated terms
    pub fn draft(id: TransferId, new: NewTransfer) -> Self {
        let now = Utc::now();
        Self {
            id,
            from_organization_id: new.from_organization_id,
            to_organization_id: new.terms.to_organization_id,
            agreement_date: new.terms.agreement_date,
            transaction_effective_date: None,
            quantity: new.terms.quantity,
            price_per_unit: new.terms.price_per_unit,
            category: None,
            current_status: TransferStatus::Draft,
            recommendation: None,
            from_transaction_id: None,
            to_transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks the legal edges of the transfer workflow
    pub fn can_transition_to(&self, to: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self.current_status, to),
            (Draft, Sent)
                | (Draft, Deleted)
                | (Sent, Submitted)
                | (Sent, Declined)
                | (Sent, Rescinded)
                | (Submitted, Rescinded)
                | (Submitted, Recommended)
                | (Recommended, Recorded)
                | (Recommended, Refused)
                | (Recommended, Submitted)
        )
    }

    /// Moves to a new status or fails with `InvalidStatusTransition`
    pub fn transition_to(&mut self, to: TransferStatus) -> Result<(), LedgerError> {
        if !self.can_transition_to(to) {
            return Err(LedgerError::invalid_transition(self.current_status, to));
        }
        self.current_status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replaces the negotiated terms of a draft
    pub fn amend(&mut self, terms: TransferTerms) -> Result<(), LedgerError> {
        if self.current_status != TransferStatus::Draft {
            return Err(LedgerError::InvalidState(format!(
                "transfer {} can only be edited in Draft, is {}",
                self.id, self.current_status
            )));
        }
        validate_terms(self.from_organization_id, &terms)?;
        self.to_organization_id = terms.to_organization_id;
        self.agreement_date = terms.agreement_date;
        self.quantity = terms.quantity;
        self.price_per_unit = terms.price_per_unit;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Total consideration paid for the units
    pub fn total_value(&self) -> Decimal {
        self.price_per_unit * Decimal::from(self.quantity)
    }

    /// Both organizations in ascending id order, the order locks are taken in
    pub fn lock_order(&self) -> [OrganizationId; 2] {
        let (a, b) = (self.from_organization_id, self.to_organization_id);
        if a <= b {
            [a, b]
        } else {
            [b, a]
        }
    }
}

/// Validates the structural rules on transfer terms
pub fn validate_terms(from: OrganizationId, terms: &TransferTerms) -> Result<(), LedgerError> {
    if terms.quantity <= 0 {
        return Err(LedgerError::Validation(format!(
            "quantity must be positive, got {}",
            terms.quantity
        )));
    }
    if terms.price_per_unit.is_sign_negative() && !terms.price_per_unit.is_zero() {
        return Err(LedgerError::Validation("price per unit cannot be negative".to_string()));
    }
    if terms.price_per_unit.normalize().scale() > 2 {
        return Err(LedgerError::Validation(format!(
            "price per unit {} has more than two decimal places",
            terms.price_per_unit
        )));
    }
    if from == terms.to_organization_id {
        return Err(LedgerError::Validation(
            "an organization cannot transfer units to itself".to_string(),
        ));
    }
    Ok(())
}

/// One row of a transfer's status history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHistoryEntry {
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    pub username: String,
    pub recorded_at: DateTime<Utc>,
}

impl TransferHistoryEntry {
    pub fn new(transfer: &Transfer, username: impl Into<String>) -> Self {
        Self {
            transfer_id: transfer.id,
            status: transfer.current_status,
            username: username.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn terms() -> TransferTerms {
        TransferTerms {
            to_organization_id: OrganizationId::new(2),
            agreement_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            quantity: 1_000,
            price_per_unit: dec!(250.00),
        }
    }

    fn create_test_transfer() -> Transfer {
        Transfer::draft(
            TransferId::new(1),
            NewTransfer {
                from_organization_id: OrganizationId::new(1),
                terms: terms(),
            },
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut transfer = create_test_transfer();
        for status in [
            TransferStatus::Sent,
            TransferStatus::Submitted,
            TransferStatus::Recommended,
            TransferStatus::Recorded,
        ] {
            transfer.transition_to(status).unwrap();
        }
        assert!(transfer.current_status.is_terminal());
    }

    #[test]
    fn test_cannot_record_from_draft() {
        let mut transfer = create_test_transfer();
        let result = transfer.transition_to(TransferStatus::Recorded);
        assert!(matches!(result, Err(LedgerError::InvalidStatusTransition { .. })));
        assert_eq!(transfer.current_status, TransferStatus::Draft);
    }

    #[test]
    fn test_category_by_agreement_age() {
        let agreed = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let cat = |y, m, d| TransferCategory::from_agreement_age(agreed, NaiveDate::from_ymd_opt(y, m, d).unwrap());
        assert_eq!(cat(2024, 7, 15), TransferCategory::A);
        assert_eq!(cat(2024, 7, 16), TransferCategory::B);
        assert_eq!(cat(2025, 1, 15), TransferCategory::B);
        assert_eq!(cat(2025, 1, 16), TransferCategory::C);
    }

    #[test]
    fn test_terms_validation() {
        let from = OrganizationId::new(1);
        assert!(validate_terms(from, &terms()).is_ok());

        let mut zero = terms();
        zero.quantity = 0;
        assert!(validate_terms(from, &zero).is_err());

        let mut fractional = terms();
        fractional.price_per_unit = dec!(1.005);
        assert!(validate_terms(from, &fractional).is_err());

        let mut own = terms();
        own.to_organization_id = from;
        assert!(validate_terms(from, &own).is_err());
    }

    #[test]
    fn test_amend_only_in_draft() {
        let mut transfer = create_test_transfer();
        let mut new_terms = terms();
        new_terms.quantity = 5;
        transfer.amend(new_terms.clone()).unwrap();
        assert_eq!(transfer.quantity, 5);

        transfer.transition_to(TransferStatus::Sent).unwrap();
        assert!(matches!(transfer.amend(new_terms), Err(LedgerError::InvalidState(_))));
    }

    #[test]
    fn test_lock_order_is_ascending() {
        let mut transfer = create_test_transfer();
        transfer.from_organization_id = OrganizationId::new(9);
        transfer.to_organization_id = OrganizationId::new(3);
        assert_eq!(transfer.lock_order(), [OrganizationId::new(3), OrganizationId::new(9)]);
    }

    #[test]
    fn test_status_parse() {
        for status in TransferStatus::ALL {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
    }
}
