//! Database error types
//!
//! PostgreSQL error codes are mapped to specific variants so that the port
//! layer can tell a lost race (serialization failure, duplicate key) from a
//! broken query.

use thiserror::Error;

use core_kernel::{ErrorKind, PortError};

/// Errors that can occur during database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Entity not found in database
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Serialization failure or deadlock; the transaction may be retried
    #[error("Serialization conflict: {0}")]
    SerializationConflict(String),

    /// Transaction error
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A status name has no row in its reference table
    #[error("Unknown {table} status: {name}")]
    UnknownStatus { table: &'static str, name: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Pool exhaustion - no available connections
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Generic SQL error
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Creates a not found error for a specific entity type and identifier
    ///
    /// # Example
    ///
    /// ```rust
    /// use infra_db::DatabaseError;
    ///
    /// let error = DatabaseError::not_found("ComplianceReport", "CR-12");
    /// assert!(error.to_string().contains("ComplianceReport"));
    /// ```
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound(format!("{} with id '{}' not found", entity, id))
    }

    /// Creates a duplicate entry error
    pub fn duplicate(entity: &str, field: &str, value: impl std::fmt::Display) -> Self {
        DatabaseError::DuplicateEntry(format!("{} with {} '{}' already exists", entity, field, value))
    }

    /// Maps a stored value that fails to parse into its domain enum
    pub fn corrupt(column: &str, value: impl std::fmt::Display) -> Self {
        DatabaseError::SerializationError(format!("unexpected value '{}' in column {}", value, column))
    }

    /// Checks if this error indicates a record was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_))
    }

    /// Checks if this error is a constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry(_)
                | DatabaseError::ForeignKeyViolation(_)
                | DatabaseError::ConstraintViolation(_)
        )
    }

    /// Checks if this error is a connection-related issue
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted)
    }

    /// Refines a raw sqlx error by PostgreSQL error code
    pub fn classify(self) -> Self {
        match self {
            DatabaseError::SqlError(ref e) => DatabaseError::from(e),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::NotFound(_) => ErrorKind::NotFound,
            DatabaseError::DuplicateEntry(_) | DatabaseError::SerializationConflict(_) => ErrorKind::Conflict,
            DatabaseError::ForeignKeyViolation(_) | DatabaseError::ConstraintViolation(_) => ErrorKind::Validation,
            DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        }
    }
}

/// Converts SQLx errors to more specific DatabaseError variants
///
/// See <https://www.postgresql.org/docs/current/errcodes-appendix.html>.
impl From<&sqlx::Error> for DatabaseError {
    fn from(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Io(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => DatabaseError::DuplicateEntry(db_err.message().to_string()),
                Some("23503") => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                Some("23514") => DatabaseError::ConstraintViolation(db_err.message().to_string()),
                Some("40001") | Some("40P01") => DatabaseError::SerializationConflict(db_err.message().to_string()),
                _ => DatabaseError::QueryFailed(db_err.message().to_string()),
            },
            _ => DatabaseError::QueryFailed(error.to_string()),
        }
    }
}

impl From<DatabaseError> for PortError {
    fn from(error: DatabaseError) -> Self {
        match error.classify() {
            DatabaseError::NotFound(message) => PortError::NotFound {
                entity_type: "Record".to_string(),
                id: message,
            },
            DatabaseError::DuplicateEntry(message) | DatabaseError::SerializationConflict(message) => {
                PortError::Conflict { message }
            }
            DatabaseError::ForeignKeyViolation(message) | DatabaseError::ConstraintViolation(message) => {
                PortError::Validation { message, field: None }
            }
            DatabaseError::SerializationError(message) => PortError::Transformation { message },
            DatabaseError::ConnectionFailed(message) => PortError::Connection { message, source: None },
            DatabaseError::PoolExhausted => PortError::Connection {
                message: "connection pool exhausted".to_string(),
                source: None,
            },
            other => PortError::Internal {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

/// Shorthand used by adapters on every sqlx call
pub(crate) fn db_to_port_error(error: sqlx::Error) -> PortError {
    PortError::from(DatabaseError::from(&error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_conflict_is_a_conflict() {
        let port: PortError = DatabaseError::SerializationConflict("could not serialize access".into()).into();
        assert!(matches!(port, PortError::Conflict { .. }));
        assert_eq!(DatabaseError::SerializationConflict(String::new()).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let mapped = DatabaseError::from(&sqlx::Error::RowNotFound);
        assert!(mapped.is_not_found());
        assert!(matches!(PortError::from(mapped), PortError::NotFound { .. }));
    }

    #[test]
    fn test_pool_timeout_is_connection_error() {
        let mapped = DatabaseError::from(&sqlx::Error::PoolTimedOut);
        assert!(mapped.is_connection_error());
        assert_eq!(mapped.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_unknown_status_is_internal() {
        let error = DatabaseError::UnknownStatus {
            table: "compliance_report_status",
            name: "Archived".into(),
        };
        assert!(error.to_string().contains("Archived"));
        assert!(matches!(PortError::from(error), PortError::Internal { .. }));
    }
}
