//! Legacy system message consumer
//!
//! The legacy system announces report creation, submission and assessment
//! on a queue. Each message is applied in one compliance unit of work
//! together with the ledger write it implies, and is recorded by
//! `(legacy_id, action)` so redelivery is a no-op.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use core_kernel::{CompliancePeriod, ComplianceReportId, OrganizationId, UserIdentity};

use crate::error::ComplianceError;
use crate::events::ReportEvent;
use crate::ports::{ComplianceUnitOfWork, LegacyInbox};
use crate::report::ComplianceReport;
use crate::status::ReportStatus;
use crate::workflow::{transition, ReportWorkflow};

/// What the legacy system did to a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyAction {
    Create,
    Submit,
    Assess,
}

impl LegacyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyAction::Create => "create",
            LegacyAction::Submit => "submit",
            LegacyAction::Assess => "assess",
        }
    }
}

impl std::fmt::Display for LegacyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LegacyAction {
    type Err = ComplianceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(LegacyAction::Create),
            "submit" => Ok(LegacyAction::Submit),
            "assess" => Ok(LegacyAction::Assess),
            other => Err(ComplianceError::validation(format!("unknown legacy action: {other}"))),
        }
    }
}

/// Message body published by the legacy system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMessage {
    pub legacy_id: i64,
    pub organization_id: OrganizationId,
    pub compliance_period: i32,
    pub action: LegacyAction,
    /// Units the legacy system computed; used as the reservation on submit
    pub compliance_units: Option<i64>,
}

/// Message as delivered by the inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxMessage {
    pub message_id: i64,
    /// Deliveries so far, including this one
    pub attempts: u32,
    pub body: LegacyMessage,
}

/// Result of checking whether a message was already applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyCheckResult {
    NotProcessed,
    AlreadyProcessed(ComplianceReportId),
}

/// Outcome of one consumer poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub applied: usize,
    pub duplicates: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl PollOutcome {
    pub fn fetched(&self) -> usize {
        self.applied + self.duplicates + self.retried + self.dead_lettered
    }
}

/// Consumer tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    /// Deliveries before a failing message is dead-lettered
    pub max_attempts: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 20,
            max_attempts: 5,
        }
    }
}

/// Applies legacy messages to the report workflow and the ledger
pub struct LegacyConsumer {
    workflow: Arc<ReportWorkflow>,
    inbox: Arc<dyn LegacyInbox>,
    settings: ConsumerSettings,
}

impl LegacyConsumer {
    pub fn new(
        workflow: Arc<ReportWorkflow>,
        inbox: Arc<dyn LegacyInbox>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            workflow,
            inbox,
            settings,
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Fetches one batch and applies each message
    ///
    /// Failed messages are nacked for redelivery until `max_attempts`,
    /// then dead-lettered. Only inbox errors fail the poll itself.
    pub async fn poll_once(&self) -> Result<PollOutcome, ComplianceError> {
        let messages = self.inbox.fetch(self.settings.batch_size).await?;
        let mut outcome = PollOutcome::default();
        if messages.is_empty() {
            return Ok(outcome);
        }
        debug!(count = messages.len(), "fetched legacy messages");

        for message in messages {
            match self.process_message(&message.body).await {
                Ok(LegacyCheckResult::NotProcessed) => {
                    self.inbox.ack(message.message_id).await?;
                    outcome.applied += 1;
                }
                Ok(LegacyCheckResult::AlreadyProcessed(_)) => {
                    self.inbox.ack(message.message_id).await?;
                    outcome.duplicates += 1;
                }
                Err(e) if message.attempts >= self.settings.max_attempts => {
                    error!(
                        message_id = message.message_id,
                        legacy_id = message.body.legacy_id,
                        attempts = message.attempts,
                        error = %e,
                        "legacy message dead-lettered"
                    );
                    self.inbox.dead_letter(message.message_id, &e.to_string()).await?;
                    outcome.dead_lettered += 1;
                }
                Err(e) => {
                    warn!(
                        message_id = message.message_id,
                        legacy_id = message.body.legacy_id,
                        attempts = message.attempts,
                        error = %e,
                        "legacy message failed, returning to queue"
                    );
                    self.inbox.nack(message.message_id, &e.to_string()).await?;
                    outcome.retried += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Applies one message in its own unit of work
    ///
    /// Returns `AlreadyProcessed` without writing anything when the
    /// `(legacy_id, action)` pair was applied before.
    #[instrument(skip(self, message), fields(legacy_id = message.legacy_id, action = %message.action, organization = %message.organization_id))]
    pub async fn process_message(&self, message: &LegacyMessage) -> Result<LegacyCheckResult, ComplianceError> {
        let system = UserIdentity::system();
        let mut uow = self.workflow.begin(&system).await?;

        if let Some(report_id) = uow.legacy_processed(message.legacy_id, message.action).await? {
            debug!(report_id = %report_id, "legacy message already applied");
            return Ok(LegacyCheckResult::AlreadyProcessed(report_id));
        }

        let (report, events) = match message.action {
            LegacyAction::Create => {
                let period = CompliancePeriod::new(message.compliance_period)
                    .map_err(|e| ComplianceError::validation(e.to_string()))?;
                let report = self
                    .workflow
                    .create_original(uow.as_mut(), &system.username, message.organization_id, period, Some(message.legacy_id))
                    .await?;
                let event = ReportEvent::ReportCreated {
                    report_id: report.id,
                    organization_id: report.organization_id,
                    timestamp: chrono::Utc::now(),
                };
                (report, vec![event])
            }
            LegacyAction::Submit => self.submit(uow.as_mut(), message, &system.username).await?,
            LegacyAction::Assess => self.assess(uow.as_mut(), message, &system.username).await?,
        };

        uow.mark_legacy_processed(message.legacy_id, message.action, report.id)
            .await?;
        self.workflow.finish(uow, report.organization_id, events).await?;
        info!(report_id = %report.id, status = %report.current_status, "legacy message applied");
        Ok(LegacyCheckResult::NotProcessed)
    }

    async fn submit(
        &self,
        uow: &mut dyn ComplianceUnitOfWork,
        message: &LegacyMessage,
        username: &str,
    ) -> Result<(ComplianceReport, Vec<ReportEvent>), ComplianceError> {
        let mut report = self.legacy_report(uow, message).await?;
        let reference = self.workflow.reference_data(report.compliance_period).await?;

        let mut summary = self.workflow.compute(uow, &report, &reference, None).await?;
        if let Some(units) = message.compliance_units {
            summary.low_carbon.line_20 = units;
        }
        summary.is_locked = true;

        let mut events = self
            .workflow
            .reserve_units(uow, &mut report, summary.line_20())
            .await?;
        uow.save_summary(&summary).await?;
        events.push(transition(uow, &mut report, ReportStatus::Submitted, username).await?);
        Ok((report, events))
    }

    /// Walks a submitted report through both recommendations to assessment
    async fn assess(
        &self,
        uow: &mut dyn ComplianceUnitOfWork,
        message: &LegacyMessage,
        username: &str,
    ) -> Result<(ComplianceReport, Vec<ReportEvent>), ComplianceError> {
        let mut report = self.legacy_report(uow, message).await?;
        let assessed = if report.is_supplemental() {
            ReportStatus::Reassessed
        } else {
            ReportStatus::Assessed
        };

        let path = [
            ReportStatus::Submitted,
            ReportStatus::RecommendedByAnalyst,
            ReportStatus::RecommendedByManager,
            assessed,
        ];
        let start = path
            .iter()
            .position(|status| *status == report.current_status)
            .ok_or_else(|| {
                ComplianceError::invalid_state(format!(
                    "legacy report {} is {} and cannot be assessed",
                    message.legacy_id, report.current_status
                ))
            })?;

        let mut events = Vec::new();
        for to in &path[start + 1..] {
            events.push(transition(uow, &mut report, *to, username).await?);
        }

        if let Some(id) = report.transaction_id {
            let pending = uow.by_id(id).await?;
            if pending.is_some_and(|t| t.is_reserved()) {
                self.workflow.ledger().confirm_reservation(&mut *uow, id).await?;
            }
        }
        if let Some(mut summary) = uow.summary(report.id).await? {
            summary.is_locked = true;
            uow.save_summary(&summary).await?;
        }
        Ok((report, events))
    }

    async fn legacy_report(
        &self,
        uow: &mut dyn ComplianceUnitOfWork,
        message: &LegacyMessage,
    ) -> Result<ComplianceReport, ComplianceError> {
        let report = uow
            .report_by_legacy_id(message.legacy_id)
            .await?
            .ok_or_else(|| ComplianceError::not_found("Legacy report", message.legacy_id))?;
        if report.organization_id != message.organization_id {
            return Err(ComplianceError::validation(format!(
                "legacy report {} belongs to {}, not {}",
                message.legacy_id, report.organization_id, message.organization_id
            )));
        }
        uow.report_for_update(report.id)
            .await?
            .ok_or_else(|| ComplianceError::not_found("ComplianceReport", report.id))
    }
}

impl std::fmt::Debug for LegacyConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyConsumer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trips_through_str() {
        for action in [LegacyAction::Create, LegacyAction::Submit, LegacyAction::Assess] {
            assert_eq!(action.as_str().parse::<LegacyAction>().unwrap(), action);
        }
        assert!("approve".parse::<LegacyAction>().is_err());
    }

    #[test]
    fn test_message_json_shape() {
        let body: LegacyMessage = serde_json::from_str(
            r#"{"legacy_id":42,"organization_id":7,"compliance_period":2023,"action":"submit","compliance_units":-120}"#,
        )
        .unwrap();
        assert_eq!(body.action, LegacyAction::Submit);
        assert_eq!(body.compliance_units, Some(-120));
        assert_eq!(body.organization_id, OrganizationId::new(7));
    }

    #[test]
    fn test_default_settings() {
        let settings = ConsumerSettings::default();
        assert_eq!(settings.max_attempts, 5);
        assert!(settings.batch_size > 0);
    }
}
