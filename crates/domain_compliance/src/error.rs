//! Compliance domain errors

use rust_decimal::Decimal;
use thiserror::Error;

use core_kernel::{CoreError, ErrorKind, PortError};
use domain_ledger::LedgerError;

/// Errors that can occur in the compliance reporting domain
#[derive(Debug, Error)]
pub enum ComplianceError {
    /// Report, child record or summary not found
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    /// Operation not legal in the report's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid status transition
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: String,
        to: String,
    },

    /// Concurrent modification
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Structurally invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Energy of a record does not fit the regulated range
    #[error("Quantity out of range: {field} = {value}")]
    QuantityOutOfRange {
        field: &'static str,
        value: Decimal,
    },

    /// The request deadline passed between aggregation phases
    #[error("Deadline exceeded during {phase}")]
    DeadlineExceeded {
        phase: &'static str,
    },

    /// Caller lacks the role or organization ownership
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Ledger precondition or storage failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Storage failure
    #[error("Store error: {0}")]
    Port(#[from] PortError),
}

impl ComplianceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ComplianceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ComplianceError::InvalidState(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ComplianceError::Conflict(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ComplianceError::Validation(message.into())
    }

    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        ComplianceError::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ComplianceError::NotFound { .. } => ErrorKind::NotFound,
            ComplianceError::InvalidState(_) | ComplianceError::InvalidStatusTransition { .. } => {
                ErrorKind::InvalidState
            }
            ComplianceError::Conflict(_) => ErrorKind::Conflict,
            ComplianceError::Validation(_) | ComplianceError::QuantityOutOfRange { .. } => {
                ErrorKind::Validation
            }
            ComplianceError::DeadlineExceeded { .. } => ErrorKind::Unavailable,
            ComplianceError::Forbidden(_) => ErrorKind::Forbidden,
            ComplianceError::Ledger(e) => e.kind(),
            ComplianceError::Port(e) => e.kind(),
        }
    }

    /// True when the failure is the ledger refusing a debit
    pub fn is_insufficient_units(&self) -> bool {
        matches!(self, ComplianceError::Ledger(LedgerError::InsufficientUnits { .. }))
    }
}

impl From<CoreError> for ComplianceError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Forbidden(msg) => ComplianceError::Forbidden(msg),
            CoreError::NotFound(msg) => ComplianceError::NotFound { entity: "Entity", id: msg },
            CoreError::InvalidStateTransition(msg) => ComplianceError::InvalidState(msg),
            other => ComplianceError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::OrganizationId;

    #[test]
    fn test_insufficient_units_kind_passes_through() {
        let error: ComplianceError = LedgerError::InsufficientUnits {
            organization: OrganizationId::new(1),
            requested: 200,
            available: 100,
            shortfall: 100,
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::InsufficientUnits);
        assert!(error.is_insufficient_units());
        assert!(error.to_string().contains("short by 100"));
    }

    #[test]
    fn test_quantity_out_of_range_is_validation() {
        let error = ComplianceError::QuantityOutOfRange {
            field: "quantity",
            value: Decimal::from(10_000_000_000i64),
        };
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(error.to_string().contains("quantity"));
    }
}
