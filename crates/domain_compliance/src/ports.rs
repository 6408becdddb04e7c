//! Compliance Domain Ports
//!
//! Report storage is reached through a unit of work that also exposes the
//! ledger's transaction store, so a status change and the reservation it
//! implies commit together.
//!
//! - **Internal Adapter**: PostgreSQL (infra_db)
//! - **Mock Adapter**: in-memory snapshot store behind the `mock` feature
//!
//! Notification delivery, reference tables, the task lock and the legacy
//! inbox are separate ports used outside the unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use core_kernel::{
    AuditContext, ChildRecordId, CompliancePeriod, ComplianceReportId, DomainPort, OrganizationId, PortError,
    ReportGroupId,
};
use domain_ledger::TransactionStore;

use crate::children::{ChildRecord, NewChildRecord};
use crate::events::ReportEvent;
use crate::legacy::{InboxMessage, LegacyAction};
use crate::reference::ReferenceData;
use crate::report::{ComplianceReport, NewReport, StatusHistoryEntry};
use crate::snapshot::{OrganizationProfile, OrganizationSnapshot};
use crate::summary::ReportSummary;

/// Storage of compliance reports, their children and snapshots
#[async_trait]
pub trait ReportStore: Send {
    async fn insert_report(&mut self, report: NewReport) -> Result<ComplianceReport, PortError>;

    async fn report(&mut self, id: ComplianceReportId) -> Result<Option<ComplianceReport>, PortError>;

    /// Loads a report and locks its row until the unit of work ends
    async fn report_for_update(&mut self, id: ComplianceReportId) -> Result<Option<ComplianceReport>, PortError>;

    async fn update_report(&mut self, report: &ComplianceReport) -> Result<(), PortError>;

    /// Locks every version of a group; returned in version order
    async fn lock_group(&mut self, group: ReportGroupId) -> Result<Vec<ComplianceReport>, PortError>;

    /// Group holding the organization's reports for a period
    async fn group_for(
        &mut self,
        organization: OrganizationId,
        period: CompliancePeriod,
    ) -> Result<Option<ReportGroupId>, PortError>;

    /// Highest assessed or reassessed version for the organization and period
    async fn latest_assessed(
        &mut self,
        organization: OrganizationId,
        period: CompliancePeriod,
    ) -> Result<Option<ComplianceReport>, PortError>;

    async fn report_by_legacy_id(&mut self, legacy_id: i64) -> Result<Option<ComplianceReport>, PortError>;

    /// Draft supplementals (version ≥ 1) last updated before `cutoff`
    async fn stale_supplemental_drafts(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<ComplianceReport>, PortError>;

    async fn insert_child(&mut self, child: NewChildRecord) -> Result<ChildRecord, PortError>;

    /// Every child version attached to the report
    async fn children(&mut self, report: ComplianceReportId) -> Result<Vec<ChildRecord>, PortError>;

    /// Rewrites the materialized `is_effective` flags of the report's children
    async fn set_effective(
        &mut self,
        report: ComplianceReportId,
        effective: &[ChildRecordId],
    ) -> Result<(), PortError>;

    async fn summary(&mut self, report: ComplianceReportId) -> Result<Option<ReportSummary>, PortError>;

    async fn save_summary(&mut self, summary: &ReportSummary) -> Result<(), PortError>;

    async fn organization_snapshot(
        &mut self,
        report: ComplianceReportId,
    ) -> Result<Option<OrganizationSnapshot>, PortError>;

    async fn save_organization_snapshot(&mut self, snapshot: &OrganizationSnapshot) -> Result<(), PortError>;

    async fn organization_profile(
        &mut self,
        organization: OrganizationId,
    ) -> Result<Option<OrganizationProfile>, PortError>;

    async fn record_status_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), PortError>;

    /// Report produced by an already processed legacy message
    async fn legacy_processed(
        &mut self,
        legacy_id: i64,
        action: LegacyAction,
    ) -> Result<Option<ComplianceReportId>, PortError>;

    async fn mark_legacy_processed(
        &mut self,
        legacy_id: i64,
        action: LegacyAction,
        report: ComplianceReportId,
    ) -> Result<(), PortError>;
}

/// One transaction over report storage and the ledger
#[async_trait]
pub trait ComplianceUnitOfWork: TransactionStore + ReportStore {
    async fn commit(self: Box<Self>) -> Result<(), PortError>;
}

/// Opens compliance units of work
#[async_trait]
pub trait ComplianceDatabase: DomainPort {
    async fn begin_compliance(&self, audit: &AuditContext) -> Result<Box<dyn ComplianceUnitOfWork>, PortError>;
}

/// Fire-and-forget notification collaborator
#[async_trait]
pub trait NotificationSink: DomainPort {
    async fn publish(&self, event: &ReportEvent) -> Result<(), PortError>;
}

/// Read-only reference tables
#[async_trait]
pub trait ReferenceDataPort: DomainPort {
    async fn reference_data(&self, period: CompliancePeriod) -> Result<ReferenceData, PortError>;
}

/// Cross-process mutual exclusion by task name
#[async_trait]
pub trait TaskLock: DomainPort {
    /// Returns false when another holder has the lock
    async fn try_lock(&self, name: &str) -> Result<bool, PortError>;

    async fn unlock(&self, name: &str) -> Result<(), PortError>;
}

/// Queue of inbound legacy-system messages
#[async_trait]
pub trait LegacyInbox: DomainPort {
    /// Claims up to `limit` pending messages
    async fn fetch(&self, limit: u32) -> Result<Vec<InboxMessage>, PortError>;

    async fn ack(&self, message_id: i64) -> Result<(), PortError>;

    /// Returns the message to the queue for redelivery
    async fn nack(&self, message_id: i64, error: &str) -> Result<(), PortError>;

    /// Parks the message after its last failed attempt
    async fn dead_letter(&self, message_id: i64, error: &str) -> Result<(), PortError>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    //! In-memory adapters
    //!
    //! `MemoryDatabase` serves both ledger and compliance units of work over
    //! one state, so transfers and reports see the same balances.

    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    use core_kernel::{TransactionId, TransferId};
    use domain_ledger::ports::mock::LedgerState;
    use domain_ledger::{
        BalanceView, IssuanceStore, LedgerDatabase, LedgerUnitOfWork, NewTransaction, NewTransfer, Transaction,
        TransactionFilter, TransferHistoryEntry, TransferStore, Transfer, UnitSumQuery,
    };
    use domain_ledger::{Issuance, IssuanceHistoryEntry, IssuanceId, NewIssuance};

    use crate::status::ReportStatus;

    /// Ledger and report tables, cloned as a snapshot per unit of work
    #[derive(Debug, Clone, Default)]
    pub struct ComplianceState {
        pub ledger: LedgerState,
        pub reports: BTreeMap<ComplianceReportId, ComplianceReport>,
        pub children: BTreeMap<ChildRecordId, ChildRecord>,
        pub summaries: HashMap<ComplianceReportId, ReportSummary>,
        pub snapshots: HashMap<ComplianceReportId, OrganizationSnapshot>,
        pub profiles: HashMap<OrganizationId, OrganizationProfile>,
        pub status_history: Vec<StatusHistoryEntry>,
        pub legacy_processed: HashMap<(i64, LegacyAction), ComplianceReportId>,
        next_id: i64,
    }

    impl ComplianceState {
        fn next_id(&mut self) -> i64 {
            self.next_id += 1;
            self.next_id
        }

        /// Registers an organization with a profile and a committed opening balance
        pub fn open_organization(&mut self, profile: OrganizationProfile, opening_units: i64) {
            self.ledger.open_organization(profile.organization_id, opening_units);
            self.profiles.insert(profile.organization_id, profile);
        }

        pub fn reports_in_group(&self, group: ReportGroupId) -> Vec<&ComplianceReport> {
            let mut reports: Vec<&ComplianceReport> = self.reports.values().filter(|r| r.group_id == group).collect();
            reports.sort_by_key(|r| r.version);
            reports
        }

        fn insert_report(&mut self, report: NewReport) -> ComplianceReport {
            let id = ComplianceReportId::new(self.next_id());
            let now = Utc::now();
            let report = ComplianceReport {
                id,
                nickname: report.nickname(),
                group_id: report.group_id,
                version: report.version,
                compliance_period: report.compliance_period,
                organization_id: report.organization_id,
                current_status: report.current_status,
                supplemental_initiator: report.supplemental_initiator,
                transaction_id: None,
                legacy_id: report.legacy_id,
                create_date: now,
                update_date: now,
            };
            self.reports.insert(id, report.clone());
            report
        }

        fn insert_child(&mut self, child: NewChildRecord) -> Result<ChildRecord, PortError> {
            if !self.reports.contains_key(&child.report_id) {
                return Err(PortError::not_found("ComplianceReport", child.report_id));
            }
            let duplicate = self.children.values().any(|c| {
                c.report_id == child.report_id && c.group_uuid == child.group_uuid && c.version == child.version
            });
            if duplicate {
                return Err(PortError::conflict(format!(
                    "version {} of {} already exists",
                    child.version, child.group_uuid
                )));
            }
            let id = ChildRecordId::new(self.next_id());
            let record = ChildRecord {
                id,
                report_id: child.report_id,
                group_uuid: child.group_uuid,
                version: child.version,
                action_type: child.action_type,
                is_effective: false,
                payload: child.payload,
                derived: child.derived,
                create_date: Utc::now(),
            };
            self.children.insert(id, record.clone());
            Ok(record)
        }
    }

    /// In-memory ledger and compliance database
    #[derive(Debug, Clone, Default)]
    pub struct MemoryDatabase {
        state: Arc<Mutex<ComplianceState>>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_state(state: ComplianceState) -> Self {
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }

        /// Pre-populates organizations with profiles and opening balances
        pub fn with_organizations(organizations: &[(OrganizationProfile, i64)]) -> Self {
            let mut state = ComplianceState::default();
            for (profile, units) in organizations {
                state.open_organization(profile.clone(), *units);
            }
            Self::from_state(state)
        }

        /// Snapshot of the committed state
        pub async fn snapshot(&self) -> ComplianceState {
            self.state.lock().await.clone()
        }

        /// Mutates the committed state directly
        pub async fn update<R>(&self, f: impl FnOnce(&mut ComplianceState) -> R) -> R {
            let mut state = self.state.lock().await;
            f(&mut state)
        }

        async fn begin(&self) -> MemoryUnitOfWork {
            let guard = self.state.clone().lock_owned().await;
            let mut working = guard.clone();
            working.ledger.lock_log.clear();
            MemoryUnitOfWork { guard, working }
        }
    }

    impl DomainPort for MemoryDatabase {}

    #[async_trait]
    impl ComplianceDatabase for MemoryDatabase {
        async fn begin_compliance(&self, _audit: &AuditContext) -> Result<Box<dyn ComplianceUnitOfWork>, PortError> {
            Ok(Box::new(self.begin().await))
        }
    }

    #[async_trait]
    impl LedgerDatabase for MemoryDatabase {
        async fn begin_ledger(&self, _audit: &AuditContext) -> Result<Box<dyn LedgerUnitOfWork>, PortError> {
            Ok(Box::new(self.begin().await))
        }
    }

    /// Unit of work over a private copy of the state
    pub struct MemoryUnitOfWork {
        guard: OwnedMutexGuard<ComplianceState>,
        working: ComplianceState,
    }

    impl MemoryUnitOfWork {
        fn publish(self) {
            let MemoryUnitOfWork { mut guard, working } = self;
            *guard = working;
        }
    }

    #[async_trait]
    impl TransactionStore for MemoryUnitOfWork {
        async fn lock_organizations(&mut self, organizations: &[OrganizationId]) -> Result<(), PortError> {
            self.working.ledger.lock_organizations(organizations)
        }

        async fn append(&mut self, entry: NewTransaction) -> Result<Transaction, PortError> {
            self.working.ledger.append(entry)
        }

        async fn confirm(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
            self.working.ledger.confirm(id)
        }

        async fn release(&mut self, id: TransactionId) -> Result<Transaction, PortError> {
            self.working.ledger.release(id)
        }

        async fn by_id(&mut self, id: TransactionId) -> Result<Option<Transaction>, PortError> {
            Ok(self.working.ledger.transactions.get(&id).cloned())
        }

        async fn by_org(
            &mut self,
            organization: OrganizationId,
            filter: &TransactionFilter,
        ) -> Result<Vec<Transaction>, PortError> {
            Ok(self.working.ledger.by_org(organization, filter))
        }

        async fn sum_units(&mut self, query: &UnitSumQuery) -> Result<i64, PortError> {
            Ok(self.working.ledger.sum_units(query))
        }

        async fn write_balance_view(&mut self, view: &BalanceView) -> Result<(), PortError> {
            self.working.ledger.balance_views.insert(view.organization_id, view.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl TransferStore for MemoryUnitOfWork {
        async fn insert_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer, PortError> {
            Ok(self.working.ledger.insert_transfer(transfer))
        }

        async fn transfer_for_update(&mut self, id: TransferId) -> Result<Option<Transfer>, PortError> {
            Ok(self.working.ledger.transfers.get(&id).cloned())
        }

        async fn update_transfer(&mut self, transfer: &Transfer) -> Result<(), PortError> {
            self.working.ledger.update_transfer(transfer)
        }

        async fn record_transfer_history(&mut self, entry: &TransferHistoryEntry) -> Result<(), PortError> {
            self.working.ledger.transfer_history.push(entry.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl IssuanceStore for MemoryUnitOfWork {
        async fn insert_issuance(&mut self, issuance: NewIssuance) -> Result<Issuance, PortError> {
            Ok(self.working.ledger.insert_issuance(issuance))
        }

        async fn issuance_for_update(&mut self, id: IssuanceId) -> Result<Option<Issuance>, PortError> {
            Ok(self.working.ledger.issuances.get(&id).cloned())
        }

        async fn update_issuance(&mut self, issuance: &Issuance) -> Result<(), PortError> {
            self.working.ledger.update_issuance(issuance)
        }

        async fn record_issuance_history(&mut self, entry: &IssuanceHistoryEntry) -> Result<(), PortError> {
            self.working.ledger.issuance_history.push(entry.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl LedgerUnitOfWork for MemoryUnitOfWork {
        async fn commit(self: Box<Self>) -> Result<(), PortError> {
            self.publish();
            Ok(())
        }
    }

    #[async_trait]
    impl ReportStore for MemoryUnitOfWork {
        async fn insert_report(&mut self, report: NewReport) -> Result<ComplianceReport, PortError> {
            if !self.working.ledger.organizations.contains(&report.organization_id) {
                return Err(PortError::not_found("Organization", report.organization_id));
            }
            let taken = self
                .working
                .reports
                .values()
                .any(|r| r.group_id == report.group_id && r.version == report.version);
            if taken {
                return Err(PortError::conflict(format!(
                    "version {} of group {} already exists",
                    report.version, report.group_id
                )));
            }
            Ok(self.working.insert_report(report))
        }

        async fn report(&mut self, id: ComplianceReportId) -> Result<Option<ComplianceReport>, PortError> {
            Ok(self.working.reports.get(&id).cloned())
        }

        async fn report_for_update(&mut self, id: ComplianceReportId) -> Result<Option<ComplianceReport>, PortError> {
            Ok(self.working.reports.get(&id).cloned())
        }

        async fn update_report(&mut self, report: &ComplianceReport) -> Result<(), PortError> {
            match self.working.reports.get_mut(&report.id) {
                Some(existing) => {
                    *existing = report.clone();
                    Ok(())
                }
                None => Err(PortError::not_found("ComplianceReport", report.id)),
            }
        }

        async fn lock_group(&mut self, group: ReportGroupId) -> Result<Vec<ComplianceReport>, PortError> {
            Ok(self.working.reports_in_group(group).into_iter().cloned().collect())
        }

        async fn group_for(
            &mut self,
            organization: OrganizationId,
            period: CompliancePeriod,
        ) -> Result<Option<ReportGroupId>, PortError> {
            Ok(self
                .working
                .reports
                .values()
                .find(|r| r.organization_id == organization && r.compliance_period == period)
                .map(|r| r.group_id))
        }

        async fn latest_assessed(
            &mut self,
            organization: OrganizationId,
            period: CompliancePeriod,
        ) -> Result<Option<ComplianceReport>, PortError> {
            Ok(self
                .working
                .reports
                .values()
                .filter(|r| {
                    r.organization_id == organization
                        && r.compliance_period == period
                        && r.current_status.is_assessed()
                })
                .max_by_key(|r| r.version)
                .cloned())
        }

        async fn report_by_legacy_id(&mut self, legacy_id: i64) -> Result<Option<ComplianceReport>, PortError> {
            Ok(self
                .working
                .reports
                .values()
                .find(|r| r.legacy_id == Some(legacy_id))
                .cloned())
        }

        async fn stale_supplemental_drafts(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<ComplianceReport>, PortError> {
            Ok(self
                .working
                .reports
                .values()
                .filter(|r| r.current_status == ReportStatus::Draft && r.version >= 1 && r.update_date <= cutoff)
                .cloned()
                .collect())
        }

        async fn insert_child(&mut self, child: NewChildRecord) -> Result<ChildRecord, PortError> {
            self.working.insert_child(child)
        }

        async fn children(&mut self, report: ComplianceReportId) -> Result<Vec<ChildRecord>, PortError> {
            Ok(self
                .working
                .children
                .values()
                .filter(|c| c.report_id == report)
                .cloned()
                .collect())
        }

        async fn set_effective(
            &mut self,
            report: ComplianceReportId,
            effective: &[ChildRecordId],
        ) -> Result<(), PortError> {
            let effective: HashSet<&ChildRecordId> = effective.iter().collect();
            for child in self.working.children.values_mut().filter(|c| c.report_id == report) {
                child.is_effective = effective.contains(&child.id);
            }
            Ok(())
        }

        async fn summary(&mut self, report: ComplianceReportId) -> Result<Option<ReportSummary>, PortError> {
            Ok(self.working.summaries.get(&report).cloned())
        }

        async fn save_summary(&mut self, summary: &ReportSummary) -> Result<(), PortError> {
            self.working.summaries.insert(summary.report_id, summary.clone());
            Ok(())
        }

        async fn organization_snapshot(
            &mut self,
            report: ComplianceReportId,
        ) -> Result<Option<OrganizationSnapshot>, PortError> {
            Ok(self.working.snapshots.get(&report).cloned())
        }

        async fn save_organization_snapshot(&mut self, snapshot: &OrganizationSnapshot) -> Result<(), PortError> {
            self.working.snapshots.insert(snapshot.report_id, snapshot.clone());
            Ok(())
        }

        async fn organization_profile(
            &mut self,
            organization: OrganizationId,
        ) -> Result<Option<OrganizationProfile>, PortError> {
            Ok(self.working.profiles.get(&organization).cloned())
        }

        async fn record_status_history(&mut self, entry: &StatusHistoryEntry) -> Result<(), PortError> {
            self.working.status_history.push(entry.clone());
            Ok(())
        }

        async fn legacy_processed(
            &mut self,
            legacy_id: i64,
            action: LegacyAction,
        ) -> Result<Option<ComplianceReportId>, PortError> {
            Ok(self.working.legacy_processed.get(&(legacy_id, action)).copied())
        }

        async fn mark_legacy_processed(
            &mut self,
            legacy_id: i64,
            action: LegacyAction,
            report: ComplianceReportId,
        ) -> Result<(), PortError> {
            self.working.legacy_processed.insert((legacy_id, action), report);
            Ok(())
        }
    }

    #[async_trait]
    impl ComplianceUnitOfWork for MemoryUnitOfWork {
        async fn commit(self: Box<Self>) -> Result<(), PortError> {
            self.publish();
            Ok(())
        }
    }

    /// Notification sink that records events
    #[derive(Debug, Default)]
    pub struct RecordingNotificationSink {
        events: Mutex<Vec<ReportEvent>>,
    }

    impl RecordingNotificationSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn events(&self) -> Vec<ReportEvent> {
            self.events.lock().await.clone()
        }
    }

    impl DomainPort for RecordingNotificationSink {}

    #[async_trait]
    impl NotificationSink for RecordingNotificationSink {
        async fn publish(&self, event: &ReportEvent) -> Result<(), PortError> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    /// Reference tables fixed at construction
    #[derive(Debug, Clone, Default)]
    pub struct StaticReferenceData {
        data: ReferenceData,
    }

    impl StaticReferenceData {
        pub fn new(data: ReferenceData) -> Self {
            Self { data }
        }
    }

    impl DomainPort for StaticReferenceData {}

    #[async_trait]
    impl ReferenceDataPort for StaticReferenceData {
        async fn reference_data(&self, _period: CompliancePeriod) -> Result<ReferenceData, PortError> {
            Ok(self.data.clone())
        }
    }

    /// Process-local task lock
    #[derive(Debug, Default)]
    pub struct MemoryTaskLock {
        held: Mutex<HashSet<String>>,
    }

    impl MemoryTaskLock {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn is_held(&self, name: &str) -> bool {
            self.held.lock().await.contains(name)
        }
    }

    impl DomainPort for MemoryTaskLock {}

    #[async_trait]
    impl TaskLock for MemoryTaskLock {
        async fn try_lock(&self, name: &str) -> Result<bool, PortError> {
            Ok(self.held.lock().await.insert(name.to_string()))
        }

        async fn unlock(&self, name: &str) -> Result<(), PortError> {
            self.held.lock().await.remove(name);
            Ok(())
        }
    }

    /// Inbox queue state
    #[derive(Debug, Default, Clone)]
    pub struct InboxState {
        pub pending: VecDeque<InboxMessage>,
        pub in_flight: HashMap<i64, InboxMessage>,
        pub acked: Vec<i64>,
        pub dead_letters: Vec<(InboxMessage, String)>,
    }

    /// In-memory legacy inbox with redelivery
    #[derive(Debug, Default)]
    pub struct MemoryLegacyInbox {
        state: Mutex<InboxState>,
    }

    impl MemoryLegacyInbox {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn push(&self, message: InboxMessage) {
            self.state.lock().await.pending.push_back(message);
        }

        pub async fn state(&self) -> InboxState {
            self.state.lock().await.clone()
        }
    }

    impl DomainPort for MemoryLegacyInbox {}

    #[async_trait]
    impl LegacyInbox for MemoryLegacyInbox {
        async fn fetch(&self, limit: u32) -> Result<Vec<InboxMessage>, PortError> {
            let mut state = self.state.lock().await;
            let mut claimed = Vec::new();
            while claimed.len() < limit as usize {
                let Some(mut message) = state.pending.pop_front() else {
                    break;
                };
                message.attempts += 1;
                state.in_flight.insert(message.message_id, message.clone());
                claimed.push(message);
            }
            Ok(claimed)
        }

        async fn ack(&self, message_id: i64) -> Result<(), PortError> {
            let mut state = self.state.lock().await;
            state
                .in_flight
                .remove(&message_id)
                .ok_or_else(|| PortError::not_found("InboxMessage", message_id))?;
            state.acked.push(message_id);
            Ok(())
        }

        async fn nack(&self, message_id: i64, _error: &str) -> Result<(), PortError> {
            let mut state = self.state.lock().await;
            let message = state
                .in_flight
                .remove(&message_id)
                .ok_or_else(|| PortError::not_found("InboxMessage", message_id))?;
            state.pending.push_back(message);
            Ok(())
        }

        async fn dead_letter(&self, message_id: i64, error: &str) -> Result<(), PortError> {
            let mut state = self.state.lock().await;
            let message = state
                .in_flight
                .remove(&message_id)
                .ok_or_else(|| PortError::not_found("InboxMessage", message_id))?;
            state.dead_letters.push((message, error.to_string()));
            Ok(())
        }
    }
}
