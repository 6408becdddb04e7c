//! Core Kernel - Foundational types shared by the LCFS compliance crates
//!
//! This crate provides the building blocks used across all domain modules:
//! - Strongly typed identifiers for ledger and report rows
//! - CAD money with half-away-from-zero rounding
//! - The compliance-period calendar
//! - Caller identity and audit attribution
//! - Port error and health-check primitives

pub mod error;
pub mod identifiers;
pub mod identity;
pub mod money;
pub mod period;
pub mod ports;

pub use error::{CoreError, ErrorKind};
pub use identifiers::{
    AdminAdjustmentId, ChildRecordId, ComplianceReportId, EntityGroupId, InitiativeAgreementId,
    OrganizationId, ReportGroupId, SummaryId, TransactionId, TransferId,
};
pub use identity::{Role, UserIdentity, SYSTEM_USERNAME};
pub use money::{round_half_away, round_to_i64, Money, MoneyError};
pub use period::{CompliancePeriod, PeriodError};
pub use ports::{
    AdapterHealth, AuditContext, DomainPort, HealthCheckResult, HealthCheckable, PortError,
};
