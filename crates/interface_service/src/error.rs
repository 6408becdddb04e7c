//! Service error handling

use thiserror::Error;

use core_kernel::ErrorKind;
use domain_compliance::ComplianceError;
use domain_ledger::LedgerError;
use infra_db::DatabaseError;

use crate::auth::AuthError;

/// Errors surfaced by the service runtime
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    #[error("Tracing initialisation failed: {0}")]
    Telemetry(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Config(_) | ServiceError::InvalidConfig(_) | ServiceError::Telemetry(_) => {
                ErrorKind::Internal
            }
            ServiceError::Database(e) => e.kind(),
            ServiceError::Auth(_) => ErrorKind::Forbidden,
            ServiceError::Ledger(e) => e.kind(),
            ServiceError::Compliance(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_delegates() {
        assert_eq!(ServiceError::InvalidConfig("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(ServiceError::Auth(AuthError::TokenExpired).kind(), ErrorKind::Forbidden);
        assert_eq!(
            ServiceError::Database(DatabaseError::PoolExhausted).kind(),
            DatabaseError::PoolExhausted.kind()
        );
    }
}
