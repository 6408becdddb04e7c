//! Domain events for compliance reports
//!
//! Published to the notification collaborator after the unit of work that
//! produced them commits. Delivery (email, in-app) is the collaborator's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{ComplianceReportId, OrganizationId, TransactionId};

use crate::report::ComplianceReport;
use crate::status::{ReportStatus, SupplementalInitiator};

/// Notification types the email collaborator keys templates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    ReportCreated,
    ReportSubmitted,
    ReportRecommended,
    ReportAssessed,
    ReportReturned,
    ReportRejected,
    SupplementalCreated,
    ReportWithdrawn,
}

/// Domain events emitted by the report workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportEvent {
    /// Version 0 created
    ReportCreated {
        report_id: ComplianceReportId,
        organization_id: OrganizationId,
        timestamp: DateTime<Utc>,
    },

    /// Status changed along the workflow
    StatusChanged {
        report_id: ComplianceReportId,
        organization_id: OrganizationId,
        from: ReportStatus,
        to: ReportStatus,
        actor: String,
        timestamp: DateTime<Utc>,
    },

    /// Units reserved, confirmed or released for the report
    ReservationChanged {
        report_id: ComplianceReportId,
        transaction_id: TransactionId,
        compliance_units: i64,
        timestamp: DateTime<Utc>,
    },

    /// New version of an assessed report
    SupplementalCreated {
        report_id: ComplianceReportId,
        organization_id: OrganizationId,
        version: i32,
        initiator: SupplementalInitiator,
        timestamp: DateTime<Utc>,
    },
}

impl ReportEvent {
    pub fn status_changed(report: &ComplianceReport, from: ReportStatus, actor: &str) -> Self {
        ReportEvent::StatusChanged {
            report_id: report.id,
            organization_id: report.organization_id,
            from,
            to: report.current_status,
            actor: actor.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Returns the report ID associated with this event
    pub fn report_id(&self) -> ComplianceReportId {
        match self {
            ReportEvent::ReportCreated { report_id, .. } => *report_id,
            ReportEvent::StatusChanged { report_id, .. } => *report_id,
            ReportEvent::ReservationChanged { report_id, .. } => *report_id,
            ReportEvent::SupplementalCreated { report_id, .. } => *report_id,
        }
    }

    /// Returns the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ReportEvent::ReportCreated { timestamp, .. } => *timestamp,
            ReportEvent::StatusChanged { timestamp, .. } => *timestamp,
            ReportEvent::ReservationChanged { timestamp, .. } => *timestamp,
            ReportEvent::SupplementalCreated { timestamp, .. } => *timestamp,
        }
    }

    /// Template key for the email collaborator, if this event notifies anyone
    pub fn notification_type(&self) -> Option<NotificationType> {
        match self {
            ReportEvent::ReportCreated { .. } => Some(NotificationType::ReportCreated),
            ReportEvent::SupplementalCreated { .. } => Some(NotificationType::SupplementalCreated),
            ReportEvent::ReservationChanged { .. } => None,
            ReportEvent::StatusChanged { from, to, .. } => {
                use ReportStatus::*;
                Some(match (*from, *to) {
                    (Draft, Submitted) => NotificationType::ReportSubmitted,
                    (Submitted | AnalystAdjustment, RecommendedByAnalyst)
                    | (RecommendedByAnalyst, RecommendedByManager) => NotificationType::ReportRecommended,
                    (_, Assessed | Reassessed) => NotificationType::ReportAssessed,
                    (_, Rejected) => NotificationType::ReportRejected,
                    (_, NotSubmitted) => NotificationType::ReportWithdrawn,
                    _ => NotificationType::ReportReturned,
                })
            }
        }
    }
}
