//! Ledger domain errors

use thiserror::Error;

use core_kernel::{CoreError, ErrorKind, OrganizationId, PortError, TransactionId};

/// Errors that can occur in the ledger domain
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Ledger entry not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Transfer, initiative agreement or admin adjustment not found
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    /// The entry or workflow is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid status transition
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: String,
        to: String,
    },

    /// A debit would drive the available balance below zero
    #[error(
        "Insufficient compliance units for {organization}: requested {requested}, available {available}, short by {shortfall}"
    )]
    InsufficientUnits {
        organization: OrganizationId,
        requested: i64,
        available: i64,
        shortfall: i64,
    },

    /// Structurally invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller lacks the role or organization ownership
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Storage failure
    #[error("Store error: {0}")]
    Port(#[from] PortError),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        LedgerError::InvalidStatusTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::TransactionNotFound(_) | LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::InvalidState(_) | LedgerError::InvalidStatusTransition { .. } => {
                ErrorKind::InvalidState
            }
            LedgerError::InsufficientUnits { .. } => ErrorKind::InsufficientUnits,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Forbidden(_) => ErrorKind::Forbidden,
            LedgerError::Port(e) => e.kind(),
        }
    }
}

impl From<CoreError> for LedgerError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Forbidden(msg) => LedgerError::Forbidden(msg),
            CoreError::NotFound(msg) => LedgerError::NotFound { entity: "Entity", id: msg },
            CoreError::InvalidStateTransition(msg) => LedgerError::InvalidState(msg),
            other => LedgerError::Validation(other.to_string()),
        }
    }
}
