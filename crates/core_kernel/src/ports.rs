//! Ports and Adapters Infrastructure
//!
//! Foundational types for the hexagonal layout used by the domain crates.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Application services (ledger, report workflow)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Port Traits                             │
//! │   TransactionStore, ReportStore, BalanceCache, TaskLock ...  │
//! │   Defined in each domain, depend only on core_kernel         │
//! └─────────────────────────────────────────────────────────────┘
//!                    ▲                         ▲
//!                    │                         │
//!         ┌─────────┴─────────┐     ┌────────┴────────┐
//!         │  infra_db adapter │     │ In-memory adapter│
//!         │   (PostgreSQL)    │     │  (feature mock)  │
//!         └───────────────────┘     └──────────────────┘
//! ```
//!
//! Every port method returns [`PortError`]; domain services translate it
//! into their own error enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::identity::UserIdentity;

/// Error type for port operations
#[derive(Debug, Error)]
pub enum PortError {
    /// The requested entity was not found
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// A validation error occurred
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The row is not in a state that allows the operation
    #[error("Invalid state: {message}")]
    InvalidState {
        message: String,
    },

    /// The operation conflicts with existing data or a concurrent writer
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
    },

    /// Connection to the underlying system failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A data transformation error occurred
    #[error("Transformation error: {message}")]
    Transformation {
        message: String,
    },

    /// An internal error occurred
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PortError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        PortError::InvalidState {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict {
            message: message.into(),
        }
    }

    /// Creates a Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this error indicates a transient failure that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Connection { .. } | PortError::Conflict { .. })
    }

    /// Returns true if this error indicates the entity was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PortError::NotFound { .. } => ErrorKind::NotFound,
            PortError::Validation { .. } => ErrorKind::Validation,
            PortError::InvalidState { .. } => ErrorKind::InvalidState,
            PortError::Conflict { .. } => ErrorKind::Conflict,
            PortError::Connection { .. } => ErrorKind::Unavailable,
            PortError::Transformation { .. } | PortError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

/// Marker trait for all domain ports
///
/// All port traits should extend this marker to ensure they are
/// thread-safe and can be used in async contexts.
pub trait DomainPort: Send + Sync + 'static {}

/// Health status for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Health check result for an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Adapter identifier
    pub adapter_id: String,
    /// Current health status
    pub status: AdapterHealth,
    /// Latency of the health check in milliseconds
    pub latency_ms: u64,
    /// Optional message with additional details
    pub message: Option<String>,
    /// Timestamp of the health check
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl HealthCheckResult {
    pub fn healthy(adapter_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Healthy,
            latency_ms,
            message: None,
            checked_at: chrono::Utc::now(),
        }
    }

    pub fn unhealthy(adapter_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Unhealthy,
            latency_ms: 0,
            message: Some(message.into()),
            checked_at: chrono::Utc::now(),
        }
    }
}

/// Trait for adapters that support health checks
#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    /// Performs a health check on the adapter
    async fn health_check(&self) -> HealthCheckResult;
}

/// Who a unit of work is attributed to
///
/// Every database transaction that mutates state begins by handing this to
/// the store, which exposes the username to the audit triggers as the
/// session-local `app.username` setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub username: String,
    /// Correlation ID for tracing across systems
    pub correlation_id: Option<String>,
}

impl AuditContext {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            correlation_id: None,
        }
    }

    pub fn for_user(user: &UserIdentity) -> Self {
        Self::new(user.username.clone())
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_error_not_found() {
        let error = PortError::not_found("Transaction", "TXN-123");
        assert!(error.is_not_found());
        assert!(!error.is_transient());
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(error.to_string().contains("TXN-123"));
    }

    #[test]
    fn test_port_error_transient() {
        let dropped = PortError::connection("pool closed");
        assert!(dropped.is_transient());
        assert_eq!(dropped.kind(), ErrorKind::Unavailable);

        assert!(PortError::conflict("serialization failure").is_transient());
        assert!(!PortError::validation("bad quantity").is_transient());
    }

    #[test]
    fn test_audit_context_for_user() {
        let user = UserIdentity::new("director", [crate::identity::Role::Director]);
        let ctx = AuditContext::for_user(&user).with_correlation_id("req-1");
        assert_eq!(ctx.username, "director");
        assert_eq!(ctx.correlation_id.as_deref(), Some("req-1"));
    }
}
