//! Report state machine
//!
//! Every operation runs in one compliance unit of work: the report row is
//! locked, the status edge is checked, the summary is computed or locked,
//! the ledger reservation is created, confirmed or released, and a history
//! row is written. Events are published and the balance cache invalidated
//! only after the commit succeeds.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use core_kernel::{
    AuditContext, CompliancePeriod, ComplianceReportId, EntityGroupId, OrganizationId, Role, UserIdentity,
};
use domain_ledger::{LedgerError, LedgerService};

use crate::calculator::{BalanceInputs, CalculationInput, SummaryCalculator};
use crate::children::{effective_ids, group_head, ActionType, ChildPayload, ChildRecord, NewChildRecord};
use crate::error::ComplianceError;
use crate::events::ReportEvent;
use crate::ports::{ComplianceDatabase, ComplianceUnitOfWork, NotificationSink, ReferenceDataPort};
use crate::reference::{CategoryValues, FuelCategory, ReferenceData};
use crate::report::{ComplianceReport, NewReport, StatusHistoryEntry};
use crate::snapshot::{OrganizationProfile, OrganizationSnapshot};
use crate::status::{ReportStatus, SupplementalInitiator};
use crate::summary::{ReportSummary, SummaryInputs};
use crate::units::derive_units;

const GOVERNMENT_ROLES: [Role; 3] = [Role::Analyst, Role::ComplianceManager, Role::Director];

/// Service driving compliance reports through their statuses
pub struct ReportWorkflow {
    database: Arc<dyn ComplianceDatabase>,
    reference: Arc<dyn ReferenceDataPort>,
    notifications: Arc<dyn NotificationSink>,
    ledger: LedgerService,
    calculator: SummaryCalculator,
}

impl ReportWorkflow {
    /// Creates a new report workflow
    ///
    /// # Arguments
    ///
    /// * `database` - Opens compliance units of work
    /// * `reference` - Reference tables for unit derivation and the summary
    /// * `notifications` - Receives events after commit
    /// * `ledger` - Reservation gate
    /// * `calculator` - Summary calculator
    pub fn new(
        database: Arc<dyn ComplianceDatabase>,
        reference: Arc<dyn ReferenceDataPort>,
        notifications: Arc<dyn NotificationSink>,
        ledger: LedgerService,
        calculator: SummaryCalculator,
    ) -> Self {
        Self {
            database,
            reference,
            notifications,
            ledger,
            calculator,
        }
    }

    pub fn calculator(&self) -> &SummaryCalculator {
        &self.calculator
    }

    pub(crate) fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub(crate) async fn begin(&self, user: &UserIdentity) -> Result<Box<dyn ComplianceUnitOfWork>, ComplianceError> {
        Ok(self.database.begin_compliance(&AuditContext::for_user(user)).await?)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Creates version 0 of the organization's report for a period
    #[instrument(skip(self, user), fields(user = %user.username, organization = %organization, period = %period))]
    pub async fn create_report(
        &self,
        user: &UserIdentity,
        organization: OrganizationId,
        period: CompliancePeriod,
    ) -> Result<ComplianceReport, ComplianceError> {
        user.require_role(&[Role::Supplier])?;
        user.require_org(organization)?;

        let mut uow = self.begin(user).await?;
        let report = self
            .create_original(uow.as_mut(), &user.username, organization, period, None)
            .await?;
        let event = ReportEvent::ReportCreated {
            report_id: report.id,
            organization_id: organization,
            timestamp: Utc::now(),
        };
        self.finish(uow, organization, vec![event]).await?;
        Ok(report)
    }

    /// Inserts version 0 with its snapshot, summary and first history row
    pub(crate) async fn create_original(
        &self,
        uow: &mut dyn ComplianceUnitOfWork,
        username: &str,
        organization: OrganizationId,
        period: CompliancePeriod,
        legacy_id: Option<i64>,
    ) -> Result<ComplianceReport, ComplianceError> {
        uow.lock_organizations(&[organization]).await?;
        if let Some(group) = uow.group_for(organization, period).await? {
            warn!(group = %group, "report group already exists");
            return Err(ComplianceError::conflict(format!(
                "{organization} already has a report for {period}"
            )));
        }
        let profile = uow
            .organization_profile(organization)
            .await?
            .ok_or_else(|| ComplianceError::not_found("Organization profile", organization))?;

        let mut new_report = NewReport::original(organization, period);
        new_report.legacy_id = legacy_id;
        let report = uow.insert_report(new_report).await?;
        uow.save_organization_snapshot(&OrganizationSnapshot::capture(report.id, &profile))
            .await?;

        let mut summary = ReportSummary::empty(report.id);
        if let Some(previous) = period.previous() {
            if let Some(prior) = uow.latest_assessed(organization, previous).await? {
                if let Some(prior_summary) = uow.summary(prior.id).await? {
                    debug!(prior_report = %prior.id, "prefilling lines 7 and 9 from previous period");
                    for category in FuelCategory::ALL {
                        summary
                            .inputs
                            .get_mut(category)
                            .carry_retention(prior_summary.renewable.get(category));
                    }
                }
            }
        }
        uow.save_summary(&summary).await?;
        uow.record_status_history(&StatusHistoryEntry::new(&report, None, username))
            .await?;

        info!(report_id = %report.id, group = %report.group_id, "report created");
        Ok(report)
    }

    /// Supplier supplemental of an assessed report
    pub async fn create_supplemental(
        &self,
        user: &UserIdentity,
        assessed: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        self.fork(user, assessed, SupplementalInitiator::Supplier).await
    }

    /// Government-initiated supplemental, edited by the supplier
    pub async fn create_government_supplemental(
        &self,
        user: &UserIdentity,
        assessed: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        self.fork(user, assessed, SupplementalInitiator::Government).await
    }

    /// Analyst adjustment of an assessed report
    pub async fn create_analyst_adjustment(
        &self,
        user: &UserIdentity,
        assessed: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        self.fork(user, assessed, SupplementalInitiator::AnalystAdjustment).await
    }

    /// Creates the next version of a group from its latest assessed report
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id, initiator = initiator.as_str()))]
    async fn fork(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        initiator: SupplementalInitiator,
    ) -> Result<ComplianceReport, ComplianceError> {
        match initiator {
            SupplementalInitiator::Supplier => user.require_role(&[Role::Supplier])?,
            SupplementalInitiator::Government => user.require_role(&GOVERNMENT_ROLES)?,
            SupplementalInitiator::AnalystAdjustment => user.require_role(&[Role::Analyst])?,
        }

        let mut uow = self.begin(user).await?;
        let anchor = load_report(uow.as_mut(), report_id).await?;
        user.require_org(anchor.organization_id)?;

        let group = uow.lock_group(anchor.group_id).await?;
        if let Some(open) = group.iter().find(|r| !r.current_status.is_terminal()) {
            warn!(open_report = %open.id, status = %open.current_status, "group has a report in progress");
            return Err(ComplianceError::conflict(format!(
                "version {} of this report is already in progress; reload and try again",
                open.version
            )));
        }
        let base = group
            .iter()
            .filter(|r| r.current_status.is_assessed())
            .max_by_key(|r| r.version)
            .cloned()
            .ok_or_else(|| ComplianceError::invalid_state("report group has no assessed version"))?;
        let version = group.iter().map(|r| r.version).max().unwrap_or(base.version) + 1;

        let report = uow
            .insert_report(NewReport::supplemental(&base, version, initiator))
            .await?;

        for child in uow.children(base.id).await?.iter().filter(|c| c.is_effective) {
            uow.insert_child(NewChildRecord::carried_forward(child, report.id)).await?;
        }
        materialize_effective(uow.as_mut(), report.id).await?;

        if let Some(snapshot) = uow.organization_snapshot(base.id).await? {
            uow.save_organization_snapshot(&snapshot.carried_to(report.id)).await?;
        }

        let base_summary = uow
            .summary(base.id)
            .await?
            .ok_or_else(|| ComplianceError::not_found("Summary", base.id))?;
        let mut summary = ReportSummary::empty(report.id);
        summary.inputs = base_summary.inputs;
        for category in FuelCategory::ALL {
            summary
                .inputs
                .get_mut(category)
                .carry_retention(base_summary.renewable.get(category));
        }
        summary.lines_7_and_9_locked =
            self.calculator
                .retention_lines_locked(version, Some(initiator), report.compliance_period, true);
        uow.save_summary(&summary).await?;
        uow.record_status_history(&StatusHistoryEntry::new(&report, None, &user.username))
            .await?;

        info!(
            report_id = %report.id,
            version,
            lines_7_and_9_locked = summary.lines_7_and_9_locked,
            "supplemental created"
        );
        let event = ReportEvent::SupplementalCreated {
            report_id: report.id,
            organization_id: report.organization_id,
            version,
            initiator,
            timestamp: Utc::now(),
        };
        self.finish(uow, report.organization_id, vec![event]).await?;
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Draft editing
    // ------------------------------------------------------------------

    /// Adds a new child entity to an editable report
    #[instrument(skip(self, user, payload), fields(user = %user.username, report_id = %report_id, kind = %payload.kind()))]
    pub async fn add_child(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        payload: ChildPayload,
    ) -> Result<ChildRecord, ComplianceError> {
        payload.validate()?;
        let mut uow = self.begin(user).await?;
        let report = load_report_for_update(uow.as_mut(), report_id).await?;
        report.ensure_editable_by(user)?;

        let reference = self.reference_data(report.compliance_period).await?;
        let derived = derive_units(&payload, &reference, report.compliance_period, self.calculator.settings())?;
        let record = uow
            .insert_child(NewChildRecord::create(report.id, payload, derived))
            .await?;
        materialize_effective(uow.as_mut(), report.id).await?;
        uow.commit().await?;

        info!(group = %record.group_uuid, units = record.compliance_units(), "child record created");
        Ok(record)
    }

    /// Writes the next version of a child entity
    ///
    /// `expected_version` is the version the caller last read; a newer
    /// version in the store fails with `Conflict`.
    #[instrument(skip(self, user, payload), fields(user = %user.username, report_id = %report_id, group = %group))]
    pub async fn update_child(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        group: EntityGroupId,
        expected_version: i32,
        payload: ChildPayload,
    ) -> Result<ChildRecord, ComplianceError> {
        payload.validate()?;
        let mut uow = self.begin(user).await?;
        let report = load_report_for_update(uow.as_mut(), report_id).await?;
        report.ensure_editable_by(user)?;

        let reference = self.reference_data(report.compliance_period).await?;
        let derived = derive_units(&payload, &reference, report.compliance_period, self.calculator.settings())?;
        let children = uow.children(report.id).await?;
        let head = group_head(&children, group).ok_or_else(|| ComplianceError::not_found("Child record", group))?;
        let next = NewChildRecord::next_version(head, expected_version, ActionType::Update, payload, derived)?;
        let record = uow.insert_child(next).await?;
        materialize_effective(uow.as_mut(), report.id).await?;
        uow.commit().await?;

        info!(version = record.version, "child record updated");
        Ok(record)
    }

    /// Appends a DELETE version to a child entity
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id, group = %group))]
    pub async fn delete_child(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        group: EntityGroupId,
        expected_version: i32,
    ) -> Result<ChildRecord, ComplianceError> {
        let mut uow = self.begin(user).await?;
        let report = load_report_for_update(uow.as_mut(), report_id).await?;
        report.ensure_editable_by(user)?;

        let children = uow.children(report.id).await?;
        let head = group_head(&children, group).ok_or_else(|| ComplianceError::not_found("Child record", group))?;
        let next = NewChildRecord::next_version(
            head,
            expected_version,
            ActionType::Delete,
            head.payload.clone(),
            head.derived.clone(),
        )?;
        let record = uow.insert_child(next).await?;
        materialize_effective(uow.as_mut(), report.id).await?;
        uow.commit().await?;

        info!(version = record.version, "child record deleted");
        Ok(record)
    }

    /// Child versions attached to a report
    pub async fn children(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        effective_only: bool,
    ) -> Result<Vec<ChildRecord>, ComplianceError> {
        let mut uow = self.begin(user).await?;
        let report = load_report(uow.as_mut(), report_id).await?;
        user.require_org(report.organization_id)?;
        let mut children = uow.children(report.id).await?;
        if effective_only {
            children.retain(|c| c.is_effective);
        }
        Ok(children)
    }

    /// Replaces the supplier-entered values of lines 6 to 9
    ///
    /// Locked lines 7 and 9 keep their carried values; a request that
    /// changes them fails validation.
    #[instrument(skip(self, user, inputs), fields(user = %user.username, report_id = %report_id))]
    pub async fn update_summary_inputs(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        inputs: CategoryValues<SummaryInputs>,
    ) -> Result<ReportSummary, ComplianceError> {
        for (_, values) in inputs.iter() {
            values.validate()?;
        }
        let mut uow = self.begin(user).await?;
        let report = load_report_for_update(uow.as_mut(), report_id).await?;
        report.ensure_editable_by(user)?;

        let mut summary = uow
            .summary(report.id)
            .await?
            .unwrap_or_else(|| ReportSummary::empty(report.id));
        if summary.lines_7_and_9_locked {
            for (category, requested) in inputs.iter() {
                let current = summary.inputs.get(category);
                let changes_locked = requested.previously_retained != current.previously_retained
                    || requested.obligation_added != current.obligation_added;
                if changes_locked {
                    return Err(ComplianceError::validation(format!(
                        "lines 7 and 9 are locked for {category}"
                    )));
                }
            }
        }
        summary.inputs = inputs;
        uow.save_summary(&summary).await?;
        uow.commit().await?;
        Ok(summary)
    }

    /// The report's frozen organization details
    pub async fn organization_snapshot(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
    ) -> Result<OrganizationSnapshot, ComplianceError> {
        let mut uow = self.begin(user).await?;
        let report = load_report(uow.as_mut(), report_id).await?;
        user.require_org(report.organization_id)?;
        uow.organization_snapshot(report.id)
            .await?
            .ok_or_else(|| ComplianceError::not_found("Organization snapshot", report.id))
    }

    /// Edits the organization snapshot of a draft
    #[instrument(skip(self, user, profile), fields(user = %user.username, report_id = %report_id))]
    pub async fn update_organization_snapshot(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        profile: OrganizationProfile,
    ) -> Result<OrganizationSnapshot, ComplianceError> {
        let mut uow = self.begin(user).await?;
        let report = load_report_for_update(uow.as_mut(), report_id).await?;
        if report.current_status != ReportStatus::Draft {
            return Err(ComplianceError::invalid_state(format!(
                "organization snapshot of report {} is frozen once it leaves Draft",
                report.id
            )));
        }
        report.ensure_editable_by(user)?;

        let mut snapshot = uow
            .organization_snapshot(report.id)
            .await?
            .ok_or_else(|| ComplianceError::not_found("Organization snapshot", report.id))?;
        snapshot.edit(profile)?;
        uow.save_organization_snapshot(&snapshot).await?;
        uow.commit().await?;
        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn report(&self, user: &UserIdentity, report_id: ComplianceReportId) -> Result<ComplianceReport, ComplianceError> {
        let mut uow = self.begin(user).await?;
        let report = load_report(uow.as_mut(), report_id).await?;
        user.require_org(report.organization_id)?;
        Ok(report)
    }

    /// Summary of a report
    ///
    /// A locked summary is returned verbatim. Otherwise the summary is
    /// recomputed and stored; when `deadline` passes mid-computation the
    /// stored summary is left as it was.
    #[instrument(skip(self, user, deadline), fields(user = %user.username, report_id = %report_id))]
    pub async fn summary(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        deadline: Option<Instant>,
    ) -> Result<ReportSummary, ComplianceError> {
        let mut uow = self.begin(user).await?;
        let report = load_report(uow.as_mut(), report_id).await?;
        user.require_org(report.organization_id)?;

        if let Some(stored) = uow.summary(report.id).await? {
            if stored.is_locked {
                debug!("returning locked summary");
                return Ok(stored);
            }
        }
        let reference = self.reference_data(report.compliance_period).await?;
        let summary = self.compute(uow.as_mut(), &report, &reference, deadline).await?;
        uow.save_summary(&summary).await?;
        uow.commit().await?;
        Ok(summary)
    }

    /// Draft supplementals untouched since `cutoff`
    pub async fn stale_supplemental_drafts(
        &self,
        user: &UserIdentity,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ComplianceReport>, ComplianceError> {
        user.require_role(&GOVERNMENT_ROLES)?;
        let mut uow = self.begin(user).await?;
        Ok(uow.stale_supplemental_drafts(cutoff).await?)
    }

    // ------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------

    /// Draft → Submitted
    ///
    /// Computes and freezes the summary and reserves its line 20. On
    /// `InsufficientUnits` nothing is written and the report stays a draft.
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id))]
    pub async fn submit(&self, user: &UserIdentity, report_id: ComplianceReportId) -> Result<ComplianceReport, ComplianceError> {
        user.require_role(&[Role::Supplier])?;
        let mut uow = self.begin(user).await?;
        let mut report = load_report_for_update(uow.as_mut(), report_id).await?;
        user.require_org(report.organization_id)?;
        ensure_edge(&report, ReportStatus::Submitted)?;

        let reference = self.reference_data(report.compliance_period).await?;
        let mut events = self.lock_and_reserve(uow.as_mut(), &mut report, &reference).await?;
        events.push(transition(uow.as_mut(), &mut report, ReportStatus::Submitted, &user.username).await?);

        self.finish(uow, report.organization_id, events).await?;
        Ok(report)
    }

    /// Submitted → Recommended_by_analyst, or Analyst_adjustment → Recommended_by_analyst
    ///
    /// An analyst adjustment never passed through a supplier submit, so its
    /// summary is frozen and its units reserved at this edge.
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id))]
    pub async fn analyst_recommend(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        user.require_role(&[Role::Analyst])?;
        let mut uow = self.begin(user).await?;
        let mut report = load_report_for_update(uow.as_mut(), report_id).await?;
        ensure_edge(&report, ReportStatus::RecommendedByAnalyst)?;

        let mut events = Vec::new();
        if report.current_status == ReportStatus::AnalystAdjustment {
            let reference = self.reference_data(report.compliance_period).await?;
            events = self.lock_and_reserve(uow.as_mut(), &mut report, &reference).await?;
        }
        events.push(transition(uow.as_mut(), &mut report, ReportStatus::RecommendedByAnalyst, &user.username).await?);

        self.finish(uow, report.organization_id, events).await?;
        Ok(report)
    }

    /// Recommended_by_analyst → Recommended_by_manager
    pub async fn manager_recommend(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        self.move_status(user, report_id, &[Role::ComplianceManager], ReportStatus::RecommendedByManager)
            .await
    }

    /// Recommended_by_analyst → Submitted
    pub async fn return_to_analyst(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        self.move_status(user, report_id, &[Role::ComplianceManager], ReportStatus::Submitted)
            .await
    }

    /// Recommended_by_manager → Recommended_by_analyst
    pub async fn return_to_manager(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        self.move_status(user, report_id, &[Role::Director], ReportStatus::RecommendedByAnalyst)
            .await
    }

    /// Recommended_by_manager → Assessed (version 0) or Reassessed
    ///
    /// Recomputes the summary; if its line 20 no longer matches the held
    /// reservation the assessment fails with `Conflict` and nothing moves.
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id))]
    pub async fn director_assess(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        user.require_role(&[Role::Director])?;
        let mut uow = self.begin(user).await?;
        let mut report = load_report_for_update(uow.as_mut(), report_id).await?;
        let to = if report.is_supplemental() {
            ReportStatus::Reassessed
        } else {
            ReportStatus::Assessed
        };
        ensure_edge(&report, to)?;

        let reference = self.reference_data(report.compliance_period).await?;
        let mut summary = self.compute(uow.as_mut(), &report, &reference, None).await?;
        let reserved_units = match report.transaction_id {
            Some(id) => uow
                .by_id(id)
                .await?
                .map(|t| t.compliance_units)
                .ok_or(LedgerError::TransactionNotFound(id))?,
            None => 0,
        };
        if summary.line_20() != reserved_units {
            warn!(
                line_20 = summary.line_20(),
                reserved_units, "summary changed since submission"
            );
            return Err(ComplianceError::conflict(format!(
                "report {} now computes {} units but {} were reserved; return it to the supplier",
                report.id,
                summary.line_20(),
                reserved_units
            )));
        }

        let mut events = Vec::new();
        if let Some(id) = report.transaction_id {
            let confirmed = self.ledger.confirm_reservation(uow.as_mut(), id).await?;
            events.push(ReportEvent::ReservationChanged {
                report_id: report.id,
                transaction_id: confirmed.id,
                compliance_units: confirmed.compliance_units,
                timestamp: Utc::now(),
            });
        }
        summary.is_locked = true;
        uow.save_summary(&summary).await?;
        events.push(transition(uow.as_mut(), &mut report, to, &user.username).await?);

        self.finish(uow, report.organization_id, events).await?;
        Ok(report)
    }

    /// Submitted or Recommended_by_* → Rejected, releasing the reservation
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id))]
    pub async fn reject(&self, user: &UserIdentity, report_id: ComplianceReportId) -> Result<ComplianceReport, ComplianceError> {
        self.release_and_move(user, report_id, &GOVERNMENT_ROLES, ReportStatus::Rejected)
            .await
    }

    /// Submitted → Draft, releasing the reservation
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id))]
    pub async fn return_to_supplier(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
    ) -> Result<ComplianceReport, ComplianceError> {
        self.release_and_move(user, report_id, &GOVERNMENT_ROLES, ReportStatus::Draft)
            .await
    }

    /// Draft supplemental or analyst adjustment without a reservation → Not_submitted
    #[instrument(skip(self, user), fields(user = %user.username, report_id = %report_id))]
    pub async fn withdraw(&self, user: &UserIdentity, report_id: ComplianceReportId) -> Result<ComplianceReport, ComplianceError> {
        let mut uow = self.begin(user).await?;
        let mut report = load_report_for_update(uow.as_mut(), report_id).await?;
        user.require_org(report.organization_id)?;
        if report.current_status == ReportStatus::AnalystAdjustment {
            user.require_role(&GOVERNMENT_ROLES)?;
        }
        if !report.is_supplemental() {
            return Err(ComplianceError::invalid_state("the original report cannot be withdrawn"));
        }
        if report.transaction_id.is_some() {
            return Err(ComplianceError::invalid_state(format!(
                "report {} holds a reservation",
                report.id
            )));
        }
        let event = transition(uow.as_mut(), &mut report, ReportStatus::NotSubmitted, &user.username).await?;
        self.finish(uow, report.organization_id, vec![event]).await?;
        Ok(report)
    }

    async fn move_status(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        roles: &[Role],
        to: ReportStatus,
    ) -> Result<ComplianceReport, ComplianceError> {
        user.require_role(roles)?;
        let mut uow = self.begin(user).await?;
        let mut report = load_report_for_update(uow.as_mut(), report_id).await?;
        let event = transition(uow.as_mut(), &mut report, to, &user.username).await?;
        self.finish(uow, report.organization_id, vec![event]).await?;
        Ok(report)
    }

    async fn release_and_move(
        &self,
        user: &UserIdentity,
        report_id: ComplianceReportId,
        roles: &[Role],
        to: ReportStatus,
    ) -> Result<ComplianceReport, ComplianceError> {
        user.require_role(roles)?;
        let mut uow = self.begin(user).await?;
        let mut report = load_report_for_update(uow.as_mut(), report_id).await?;
        ensure_edge(&report, to)?;

        let mut events = Vec::new();
        if let Some(id) = report.transaction_id.take() {
            let released = self.ledger.release_reservation(uow.as_mut(), id).await?;
            events.push(ReportEvent::ReservationChanged {
                report_id: report.id,
                transaction_id: released.id,
                compliance_units: released.compliance_units,
                timestamp: Utc::now(),
            });
        }
        if let Some(mut summary) = uow.summary(report.id).await? {
            summary.is_locked = false;
            uow.save_summary(&summary).await?;
        }
        events.push(transition(uow.as_mut(), &mut report, to, &user.username).await?);

        self.finish(uow, report.organization_id, events).await?;
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------

    /// Computes, freezes and stores the summary and reserves its line 20
    async fn lock_and_reserve(
        &self,
        uow: &mut dyn ComplianceUnitOfWork,
        report: &mut ComplianceReport,
        reference: &ReferenceData,
    ) -> Result<Vec<ReportEvent>, ComplianceError> {
        let mut summary = self.compute(uow, report, reference, None).await?;
        summary.is_locked = true;
        let events = self.reserve_units(uow, report, summary.line_20()).await?;
        uow.save_summary(&summary).await?;
        Ok(events)
    }

    /// Reserves `units` for the report; nothing is written for zero
    pub(crate) async fn reserve_units(
        &self,
        uow: &mut dyn ComplianceUnitOfWork,
        report: &mut ComplianceReport,
        units: i64,
    ) -> Result<Vec<ReportEvent>, ComplianceError> {
        if units == 0 {
            return Ok(Vec::new());
        }
        let reservation = self.ledger.reserve(&mut *uow, report.organization_id, units).await?;
        report.attach_reservation(reservation.id)?;
        Ok(vec![ReportEvent::ReservationChanged {
            report_id: report.id,
            transaction_id: reservation.id,
            compliance_units: units,
            timestamp: Utc::now(),
        }])
    }

    /// Computes the summary of a report from its effective children
    pub(crate) async fn compute(
        &self,
        uow: &mut dyn ComplianceUnitOfWork,
        report: &ComplianceReport,
        reference: &ReferenceData,
        deadline: Option<Instant>,
    ) -> Result<ReportSummary, ComplianceError> {
        let children: Vec<ChildRecord> = uow
            .children(report.id)
            .await?
            .into_iter()
            .filter(|c| c.is_effective)
            .collect();

        let parent = if report.is_supplemental() {
            match uow
                .latest_assessed(report.organization_id, report.compliance_period)
                .await?
            {
                Some(assessed) if assessed.version < report.version => uow.summary(assessed.id).await?,
                _ => None,
            }
        } else {
            None
        };

        let stored = uow.summary(report.id).await?;
        let inputs = stored.as_ref().map(|s| s.inputs).unwrap_or_default();
        let balances = BalanceInputs {
            at_period_start: self
                .ledger
                .committed_balance_as_of(&mut *uow, report.organization_id, report.compliance_period.start())
                .await?,
            at_deadline: self
                .ledger
                .committed_balance_as_of(&mut *uow, report.organization_id, report.compliance_period.compliance_deadline())
                .await?,
        };

        let summary = self.calculator.calculate(
            &CalculationInput {
                report_id: report.id,
                period: report.compliance_period,
                version: report.version,
                initiator: report.supplemental_initiator,
                children: &children,
                reference,
                parent: parent.as_ref(),
                inputs,
                balances,
            },
            deadline,
        )?;
        Ok(summary.stamped(stored.as_ref(), Utc::now()))
    }

    pub(crate) async fn reference_data(&self, period: CompliancePeriod) -> Result<ReferenceData, ComplianceError> {
        Ok(self.reference.reference_data(period).await?)
    }

    /// Commits, then invalidates the organization's cached balance and publishes events
    pub(crate) async fn finish(
        &self,
        uow: Box<dyn ComplianceUnitOfWork>,
        organization: OrganizationId,
        events: Vec<ReportEvent>,
    ) -> Result<(), ComplianceError> {
        uow.commit().await?;
        self.ledger.invalidate(&[organization]).await;
        for event in events {
            if let Err(e) = self.notifications.publish(&event).await {
                warn!(report_id = %event.report_id(), error = %e, "notification publish failed");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReportWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportWorkflow")
            .field("calculator", &self.calculator)
            .finish_non_exhaustive()
    }
}

/// Moves a report along an edge and records the history row
pub(crate) async fn transition(
    uow: &mut dyn ComplianceUnitOfWork,
    report: &mut ComplianceReport,
    to: ReportStatus,
    username: &str,
) -> Result<ReportEvent, ComplianceError> {
    let from = report.transition_to(to)?;
    uow.update_report(report).await?;
    uow.record_status_history(&StatusHistoryEntry::new(report, Some(from), username))
        .await?;
    info!(report_id = %report.id, %from, %to, "report status changed");
    Ok(ReportEvent::status_changed(report, from, username))
}

fn ensure_edge(report: &ComplianceReport, to: ReportStatus) -> Result<(), ComplianceError> {
    if report.current_status.can_transition_to(to) {
        Ok(())
    } else {
        Err(ComplianceError::invalid_transition(report.current_status, to))
    }
}

pub(crate) async fn load_report(
    uow: &mut dyn ComplianceUnitOfWork,
    id: ComplianceReportId,
) -> Result<ComplianceReport, ComplianceError> {
    uow.report(id)
        .await?
        .ok_or_else(|| ComplianceError::not_found("ComplianceReport", id))
}

pub(crate) async fn load_report_for_update(
    uow: &mut dyn ComplianceUnitOfWork,
    id: ComplianceReportId,
) -> Result<ComplianceReport, ComplianceError> {
    uow.report_for_update(id)
        .await?
        .ok_or_else(|| ComplianceError::not_found("ComplianceReport", id))
}

/// Recomputes and stores the `is_effective` flags of a report's children
async fn materialize_effective(
    uow: &mut dyn ComplianceUnitOfWork,
    report: ComplianceReportId,
) -> Result<(), ComplianceError> {
    let children = uow.children(report).await?;
    uow.set_effective(report, &effective_ids(&children)).await?;
    Ok(())
}
